//! 会话状态：Session / Step / Attempt 记录与终止结果
//!
//! Session 独占其 Step 与 Attempt；MemoryItem 由 SessionMemory 持有。调用方最终只拿到一个 Outcome。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::SessionMemory;

/// 会话终止结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Answered(String),
    Exhausted,
    Aborted(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Answered(_) => "answered",
            Outcome::Exhausted => "exhausted",
            Outcome::Aborted(_) => "aborted",
        }
    }
}

/// 单条生命线的执行结果
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum AttemptOutcome {
    FinalAnswer(String),
    Continue(String),
    Failed(String),
}

/// 一次 Attempt（生命线）
#[derive(Clone, Debug, Serialize)]
pub struct AttemptRecord {
    /// 从 1 开始
    pub index: usize,
    pub mode: String,
    pub tools: Vec<String>,
    pub force_replan: bool,
    /// Planner-LLM 原始输出（Proposer/Planner 失败时为 None）
    pub plan_source: Option<String>,
    pub tool_calls: usize,
    pub outcome: AttemptOutcome,
    /// 贡献给下一次 Attempt 的失败工具
    pub failed_tools: Vec<String>,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Failed(_))
    }
}

/// 一个 Step
#[derive(Clone, Debug, Serialize)]
pub struct StepRecord {
    /// 1..=max_steps
    pub index: usize,
    pub input: String,
    pub attempts: Vec<AttemptRecord>,
    /// FURTHER_PROCESSING_REQUIRED 时转交下一步的内容
    pub forwarded: Option<String>,
}

impl StepRecord {
    pub fn new(index: usize, input: impl Into<String>) -> Self {
        Self {
            index,
            input: input.into(),
            attempts: Vec::new(),
            forwarded: None,
        }
    }
}

/// 一个用户目标的完整生命周期
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub memory: SessionMemory,
    pub entities: Vec<String>,
    pub outcome: Option<Outcome>,
}

impl Session {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        let id = id.into();
        let goal = goal.into();
        let mut memory = SessionMemory::new(id.clone());
        memory.record_run_metadata(&goal);
        Self {
            id,
            goal,
            created_at: Utc::now(),
            steps: Vec::new(),
            memory,
            entities: Vec::new(),
            outcome: None,
        }
    }

    pub fn total_attempts(&self) -> usize {
        self.steps.iter().map(|s| s.attempts.len()).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }

    /// 合并 Proposer 提取的实体（去重，保持首次出现顺序）
    pub fn add_entities(&mut self, entities: &[String]) {
        for e in entities {
            if !self.entities.contains(e) {
                self.entities.push(e.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new_records_metadata() {
        let s = Session::new("abc", "factorial of 5");
        assert_eq!(s.memory.user_query(), Some("factorial of 5"));
        assert_eq!(s.memory.len(), 1);
        assert!(!s.is_closed());
    }

    #[test]
    fn test_outcome_serde() {
        let v = serde_json::to_value(Outcome::Answered("72.0".to_string())).unwrap();
        assert_eq!(v["status"], "answered");
        assert_eq!(v["detail"], "72.0");
        assert_eq!(Outcome::Exhausted.label(), "exhausted");
    }

    #[test]
    fn test_add_entities_dedup() {
        let mut s = Session::new("a", "g");
        s.add_entities(&["x".to_string(), "y".to_string()]);
        s.add_entities(&["y".to_string(), "z".to_string()]);
        assert_eq!(s.entities, vec!["x", "y", "z"]);
    }
}
