//! 控制循环过程事件：可序列化为 JSON 供前端或日志消费

use serde::Serialize;

/// 单个过程事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    SessionStarted { session_id: String, goal: String },
    /// 进入第 step 步
    StepStarted { step: usize, max_steps: usize },
    /// 第 attempt 条生命线开始（模式、工具集）
    AttemptStarted {
        step: usize,
        attempt: usize,
        mode: String,
        tools: Vec<String>,
        force_replan: bool,
    },
    ToolCall { tool: String, args: serde_json::Value },
    /// 工具返回（预览）
    Observation { tool: String, ok: bool, preview: String },
    /// 生命线失败及恢复动作
    AttemptFailed {
        step: usize,
        attempt: usize,
        error: String,
        action: String,
    },
    /// FURTHER_PROCESSING_REQUIRED：携带内容进入下一步
    Continuation { step: usize, preview: String },
    /// 本步生命线用尽
    StepExhausted { step: usize },
    /// 会话结束（answered / exhausted / aborted）
    Finished { outcome: String },
}
