//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点，作为 Proposer / Planner-LLM 的后端。
//! 模型、base_url、温度与请求超时取自 `[llm]` 配置段。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::llm::{LlmClient, Message, Role};

/// 累计 token 用量；克隆共享同一计数
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    prompt: Arc<AtomicU64>,
    completion: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn record(&self, prompt: u64, completion: u64) {
        self.prompt.fetch_add(prompt, Ordering::Relaxed);
        self.completion.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn snapshot(&self) -> (u64, u64, u64) {
        let p = self.prompt.load(Ordering::Relaxed);
        let c = self.completion.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
    usage: TokenUsage,
}

impl OpenAiClient {
    /// `api_key` 为 None 时读取 OPENAI_API_KEY；自建代理可不需要 key
    pub fn from_section(section: &LlmSection, api_key: Option<&str>) -> Self {
        let key = api_key
            .map(str::to_string)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();
        let config = match section.base_url.as_deref() {
            Some(url) => OpenAIConfig::new().with_api_key(key).with_api_base(url),
            None => OpenAIConfig::new().with_api_key(key),
        };
        Self {
            client: Client::with_config(config),
            model: section.model.clone(),
            temperature: section.temperature,
            timeout: Duration::from_secs(section.request_timeout_secs.max(1)),
            usage: TokenUsage::default(),
        }
    }
}

fn to_request_message(m: &Message) -> Result<ChatCompletionRequestMessage, String> {
    let built = match m.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(m.content.as_str())
            .build()
            .map(Into::into),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(m.content.as_str())
            .build()
            .map(Into::into),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(m.content.as_str())
            .build()
            .map(Into::into),
    };
    built.map_err(|e| format!("invalid {:?} message: {}", m.role, e))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.as_str()).messages(messages);
        if let Some(t) = self.temperature {
            args.temperature(t);
        }
        let request = args.build().map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| format!("LLM request timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        if let Some(u) = &response.usage {
            self.usage
                .record(u64::from(u.prompt_tokens), u64::from(u.completion_tokens));
        }
        tracing::debug!(model = %self.model, choices = response.choices.len(), "LLM completion");

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "LLM returned no content".to_string())
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.snapshot()
    }
}
