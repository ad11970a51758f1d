//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 LoopController 决定是排除工具重试、换省预算计划、升级还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作；不对失败原因去重，只由调用方计数
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolInvocation(e) => RecoveryAction::RetryExcluding(e.tool().to_string()),
            AgentError::BudgetExceeded { .. } => RecoveryAction::RetryCheaper,
            AgentError::ProposerTimeout
            | AgentError::ProposerError(_)
            | AgentError::PlannerTimeout
            | AgentError::PlannerError(_)
            | AgentError::PlanMalformed(_) => RecoveryAction::Retry,
            AgentError::LifelinesExhausted { .. } => RecoveryAction::Escalate,
            AgentError::SessionAborted(reason) => RecoveryAction::Abort(reason.clone()),
            AgentError::ConfigError(msg) => RecoveryAction::Abort(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;

    #[test]
    fn test_recovery_tool_error_excludes_tool() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolInvocation(ToolError::ProviderError {
            provider: "web".to_string(),
            tool: "fetch".to_string(),
            raw: "503".to_string(),
        });
        assert_eq!(
            engine.handle(&err),
            RecoveryAction::RetryExcluding("fetch".to_string())
        );
    }

    #[test]
    fn test_recovery_unknown_tool() {
        let engine = RecoveryEngine::new();
        let err = AgentError::ToolInvocation(ToolError::UnknownTool("fake_tool".to_string()));
        match engine.handle(&err) {
            RecoveryAction::RetryExcluding(tool) => assert_eq!(tool, "fake_tool"),
            other => panic!("Expected RetryExcluding, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_budget_prefers_cheaper() {
        let engine = RecoveryEngine::new();
        let err = AgentError::BudgetExceeded { limit: 5 };
        assert_eq!(engine.handle(&err), RecoveryAction::RetryCheaper);
    }

    #[test]
    fn test_recovery_malformed_plan_retries() {
        let engine = RecoveryEngine::new();
        let err = AgentError::PlanMalformed("no terminal marker".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Retry);
        assert_eq!(engine.handle(&AgentError::ProposerTimeout), RecoveryAction::Retry);
    }

    #[test]
    fn test_recovery_aborted() {
        let engine = RecoveryEngine::new();
        let err = AgentError::SessionAborted("user".to_string());
        assert!(err.is_fatal());
        assert!(matches!(engine.handle(&err), RecoveryAction::Abort(_)));
    }

    #[test]
    fn test_recovery_lifelines_exhausted() {
        let engine = RecoveryEngine::new();
        let err = AgentError::LifelinesExhausted { step: 2 };
        assert_eq!(engine.handle(&err), RecoveryAction::Escalate);
    }
}
