//! 核心层：错误与恢复、会话状态、生命周期（关闭/中止）、运行时构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use builder::{create_runtime, Runtime, RuntimeBuilder};
pub use error::{AgentError, RecoveryAction, ToolError};
pub use recovery::RecoveryEngine;
pub use shutdown::{
    AbortHandle, HistoricalIndexCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
pub use state::{AttemptOutcome, AttemptRecord, Outcome, Session, StepRecord};
