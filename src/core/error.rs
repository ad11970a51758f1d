//! 错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定重试本条生命线、换更省的计划、升级到下一步或终止会话。
//! 除 SessionAborted 外，所有错误都在 LoopController 的重试逻辑内部消化，调用方只拿到 Outcome。

use thiserror::Error;

/// 工具路由层错误（UnknownTool / ProviderError / ProviderTimeout / MalformedResponse）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Provider '{provider}' failed on '{tool}': {raw}")]
    ProviderError {
        provider: String,
        tool: String,
        /// Provider 原始错误文本
        raw: String,
    },

    #[error("Provider timeout on tool: {0}")]
    ProviderTimeout(String),

    #[error("Malformed response from '{tool}': {detail}")]
    MalformedResponse { tool: String, detail: String },

    #[error("Invocation of '{0}' cancelled")]
    Cancelled(String),
}

impl ToolError {
    /// 出错的工具名（用于加入下一次 Attempt 的 failed-tool 集合）
    pub fn tool(&self) -> &str {
        match self {
            ToolError::UnknownTool(t)
            | ToolError::ProviderTimeout(t)
            | ToolError::Cancelled(t) => t,
            ToolError::ProviderError { tool, .. } | ToolError::MalformedResponse { tool, .. } => tool,
        }
    }
}

/// 控制循环中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Proposer timeout")]
    ProposerTimeout,

    #[error("Proposer error: {0}")]
    ProposerError(String),

    #[error("Planner timeout")]
    PlannerTimeout,

    #[error("Planner error: {0}")]
    PlannerError(String),

    /// 计划缺少终止标记或结构非法；未调用任何工具
    #[error("Plan malformed: {0}")]
    PlanMalformed(String),

    #[error("Tool invocation error: {0}")]
    ToolInvocation(#[from] ToolError),

    #[error("Tool-call budget exceeded: at most {limit} calls per plan")]
    BudgetExceeded { limit: usize },

    #[error("Lifelines exhausted at step {step}")]
    LifelinesExhausted { step: usize },

    #[error("Session aborted: {0}")]
    SessionAborted(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否对会话致命（不再重试）
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::SessionAborted(_))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 消耗一条生命线后重试，并在下一次 Attempt 中排除该工具
    RetryExcluding(String),
    /// 消耗一条生命线后重试，下一次 Attempt 改用更省的（conservative）计划
    RetryCheaper,
    /// 消耗一条生命线后原样重试（计划非法、Proposer/Planner 超时等）
    Retry,
    /// 升级到下一个 Step（或 Exhausted）
    Escalate,
    /// 终止会话
    Abort(String),
}
