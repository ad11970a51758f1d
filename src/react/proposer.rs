//! Proposer：从输入文本中提取意图、实体、工具提示与候选 Provider
//!
//! 控制循环只依赖 Proposer trait；LlmProposer 是基于 LlmClient 的实现。输出不是合法 JSON 时返回
//! Perception::no_hint()，不视为错误；LLM 调用本身失败才返回 ProposerError（消耗一条生命线）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};

/// Proposer 输出
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Perception {
    pub intent: String,
    pub entities: Vec<String>,
    /// 工具名或类别提示（如 "factorial"、"search"）
    pub tool_hint: Option<String>,
    /// 候选 Provider id；为空表示全部
    #[serde(alias = "selected_servers")]
    pub selected_providers: Vec<String>,
}

impl Perception {
    /// 「无提示」：不筛选 Provider，也不提示工具
    pub fn no_hint() -> Self {
        Self::default()
    }

    /// 从 LLM 回复中提取 JSON；缺失或非法时返回 no_hint
    pub fn parse(output: &str) -> Self {
        let trimmed = output.trim();
        let json_str = if let Some(start) = trimmed.find("```json") {
            let rest = &trimmed[start + 7..];
            rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
        } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if end > start {
                &trimmed[start..=end]
            } else {
                return Self::no_hint();
            }
        } else {
            return Self::no_hint();
        };

        match serde_json::from_str::<Perception>(json_str) {
            Ok(mut p) => {
                p.tool_hint = p
                    .tool_hint
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case("none"));
                p
            }
            Err(e) => {
                tracing::debug!(error = %e, "Proposer output not parseable, treating as no hint");
                Self::no_hint()
            }
        }
    }
}

/// Proposer 外部能力
#[async_trait]
pub trait Proposer: Send + Sync {
    async fn perceive(
        &self,
        text: &str,
        history_context: Option<&str>,
    ) -> Result<Perception, AgentError>;
}

const DEFAULT_PROPOSER_PROMPT: &str = "You analyse a user request for a tool-using agent.\n\
Available providers and their tools:\n{providers}\n\n\
Reply with a single JSON object and nothing else:\n\
{\"intent\": \"...\", \"entities\": [\"...\"], \"tool_hint\": \"tool name or category, or null\", \
\"selected_providers\": [\"provider ids that are relevant\"]}";

/// 基于 LlmClient 的 Proposer
pub struct LlmProposer {
    llm: Arc<dyn LlmClient>,
    /// 含 `{providers}` 占位符的 system prompt
    prompt: String,
    providers_summary: String,
}

impl LlmProposer {
    pub fn new(llm: Arc<dyn LlmClient>, providers_summary: impl Into<String>) -> Self {
        Self {
            llm,
            prompt: DEFAULT_PROPOSER_PROMPT.to_string(),
            providers_summary: providers_summary.into(),
        }
    }

    /// 使用自定义模板（需包含 `{providers}`）
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl Proposer for LlmProposer {
    async fn perceive(
        &self,
        text: &str,
        history_context: Option<&str>,
    ) -> Result<Perception, AgentError> {
        let system = self.prompt.replace("{providers}", &self.providers_summary);
        let mut messages = vec![Message::system(system)];
        if let Some(ctx) = history_context.filter(|c| !c.is_empty()) {
            messages.push(Message::system(ctx.to_string()));
        }
        messages.push(Message::user(text));

        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::ProposerError)?;
        Ok(Perception::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_valid() {
        let p = Perception::parse(
            r#"{"intent": "compute", "entities": ["144", "3"], "tool_hint": "factorial", "selected_servers": ["math"]}"#,
        );
        assert_eq!(p.intent, "compute");
        assert_eq!(p.tool_hint.as_deref(), Some("factorial"));
        assert_eq!(p.selected_providers, vec!["math".to_string()]);
    }

    #[test]
    fn test_parse_malformed_is_no_hint() {
        assert_eq!(Perception::parse("sorry, I cannot"), Perception::no_hint());
        assert_eq!(Perception::parse("{not json}"), Perception::no_hint());
        assert_eq!(Perception::parse(""), Perception::no_hint());
        let p = Perception::parse(r#"{"tool_hint": "None"}"#);
        assert_eq!(p.tool_hint, None);
    }

    #[tokio::test]
    async fn test_llm_proposer() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "```json\n{\"intent\": \"search\", \"tool_hint\": \"search\"}\n```",
        ]));
        let proposer = LlmProposer::new(llm.clone(), "- web: search");
        let p = proposer.perceive("find news", Some("history")).await.unwrap();
        assert_eq!(p.tool_hint.as_deref(), Some("search"));
        let sent = &llm.received()[0];
        assert_eq!(sent.len(), 3);
        assert!(sent[0].content.contains("- web: search"));

        let err = proposer.perceive("again", None).await.unwrap_err();
        assert!(matches!(err, AgentError::ProposerError(_)));
    }
}
