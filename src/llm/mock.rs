//! Mock / 脚本化 LLM 客户端（无需 API）
//!
//! MockLlmClient 把最后一条 User 消息包装成零调用计划，便于离线跑通控制循环；
//! ScriptedLlmClient 按顺序返回预置回复，测试用来驱动特定场景。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.lines().next().unwrap_or_default())
            .unwrap_or("(no input)");

        Ok(format!("FINAL_ANSWER: Echo from Mock: {}", last_user))
    }
}

/// 脚本化客户端：依次弹出预置回复，用尽后返回错误；同时记录收到的消息
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| Ok(s.into())).collect()),
            received: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条错误回复
    pub fn push_error(&self, err: impl Into<String>) {
        self.lock_replies().push_back(Err(err.into()));
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_wraps_last_user_message() {
        let out = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("hello\nmore")])
            .await
            .unwrap();
        assert_eq!(out, "FINAL_ANSWER: Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlmClient::new(["one", "two"]);
        llm.push_error("down");
        assert_eq!(llm.complete(&[]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "down");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.calls(), 4);
    }
}
