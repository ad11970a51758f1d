//! Lifeline - 任务求解智能体的规划/执行控制核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、Session/Step/Attempt 状态、关闭与中止、运行时构建
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **memory**: 会话事件日志、会话日志持久化、历史会话索引
//! - **observability**: tracing 初始化
//! - **plan**: 计划模型与解析校验、沙箱执行器（调用预算、参数隔离）
//! - **react**: Proposer、Strategy Planner、Planner-LLM 适配、Step × 生命线主循环
//! - **tools**: ToolSpec / Provider 注册、路由、响应归一化、内置演示 Provider

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use crate::core::{create_runtime, AbortHandle, Outcome, Runtime, RuntimeBuilder};
pub use crate::react::LoopController;
