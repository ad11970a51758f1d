//! 控制层：Proposer、Strategy Planner、Planner-LLM 适配、主循环与过程事件

pub mod events;
pub mod loop_;
pub mod planner;
pub mod proposer;
pub mod strategy;

pub use events::LoopEvent;
pub use loop_::{continuation_input, LoopController};
pub use planner::{summarize_tools, LlmPlanner, PlanProposer, PlannerPrompts};
pub use proposer::{LlmProposer, Perception, Proposer};
pub use strategy::{
    exclude_failed, filter_by_hint, PlanMode, PlanRequest, StepContext, StrategyPlanner,
};
