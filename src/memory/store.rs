//! 会话记忆：只追加的事件日志
//!
//! 一个会话内「发生了什么」的唯一事实来源：run_metadata / tool_call / tool_output / final_answer。
//! 写入后不修改、不重排；tool_output 必然跟在同 seq、同工具名的 tool_call 之后。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单条记忆（serde 以 `type` 字段区分种类）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryItem {
    RunMetadata {
        session_id: String,
        user_query: String,
        timestamp: DateTime<Utc>,
    },
    ToolCall {
        /// 会话内调用序号（从 1 开始），与对应 tool_output 一致
        seq: u64,
        tool_name: String,
        arguments: Value,
        step: usize,
        attempt: usize,
        timestamp: DateTime<Utc>,
    },
    ToolOutput {
        seq: u64,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    FinalAnswer {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

impl MemoryItem {
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryItem::RunMetadata { .. } => "run_metadata",
            MemoryItem::ToolCall { .. } => "tool_call",
            MemoryItem::ToolOutput { .. } => "tool_output",
            MemoryItem::FinalAnswer { .. } => "final_answer",
        }
    }
}

/// 会话记忆：只提供追加与只读视图
#[derive(Debug, Clone, Default)]
pub struct SessionMemory {
    session_id: String,
    items: Vec<MemoryItem>,
    next_seq: u64,
    /// 已写出 tool_call 但尚未写出 tool_output 的 seq
    open_calls: Vec<(u64, String)>,
}

impl SessionMemory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            items: Vec::new(),
            next_seq: 1,
            open_calls: Vec::new(),
        }
    }

    /// 从持久化日志恢复（仅用于重建索引等只读场景）
    pub fn from_items(session_id: impl Into<String>, items: Vec<MemoryItem>) -> Self {
        let next_seq = items
            .iter()
            .filter_map(|i| match i {
                MemoryItem::ToolCall { seq, .. } => Some(*seq + 1),
                _ => None,
            })
            .max()
            .unwrap_or(1);
        Self {
            session_id: session_id.into(),
            items,
            next_seq,
            open_calls: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn items(&self) -> &[MemoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn record_run_metadata(&mut self, user_query: &str) {
        self.items.push(MemoryItem::RunMetadata {
            session_id: self.session_id.clone(),
            user_query: user_query.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// 记录一次即将发往 Provider 的调用，返回其 seq
    pub fn record_tool_call(&mut self, tool_name: &str, arguments: Value, step: usize, attempt: usize) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(MemoryItem::ToolCall {
            seq,
            tool_name: tool_name.to_string(),
            arguments,
            step,
            attempt,
            timestamp: Utc::now(),
        });
        self.open_calls.push((seq, tool_name.to_string()));
        seq
    }

    /// 记录调用结果；seq 必须对应一条尚未闭合的 tool_call，否则忽略并告警
    pub fn record_tool_output(&mut self, seq: u64, outcome: Result<Value, String>) {
        let Some(pos) = self.open_calls.iter().position(|(s, _)| *s == seq) else {
            tracing::warn!(seq, "tool_output without matching open tool_call, dropped");
            return;
        };
        let (_, tool_name) = self.open_calls.remove(pos);
        let (result, error, success) = match outcome {
            Ok(v) => (Some(v), None, true),
            Err(e) => (None, Some(e), false),
        };
        self.items.push(MemoryItem::ToolOutput {
            seq,
            tool_name,
            result,
            error,
            success,
            timestamp: Utc::now(),
        });
    }

    pub fn record_final_answer(&mut self, text: &str) {
        self.items.push(MemoryItem::FinalAnswer {
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn user_query(&self) -> Option<&str> {
        self.items.iter().find_map(|i| match i {
            MemoryItem::RunMetadata { user_query, .. } => Some(user_query.as_str()),
            _ => None,
        })
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.items.iter().rev().find_map(|i| match i {
            MemoryItem::FinalAnswer { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// 最近成功过的工具（由近及远、去重、最多 limit 个），供策略层做记忆回退
    pub fn recent_successful_tools(&self, limit: usize) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for item in self.items.iter().rev() {
            if tools.len() >= limit {
                break;
            }
            if let MemoryItem::ToolOutput {
                tool_name,
                success: true,
                ..
            } = item
            {
                if !tools.contains(tool_name) {
                    tools.push(tool_name.clone());
                }
            }
        }
        tools
    }

    /// 按首次出现顺序列出本会话实际调用过的工具
    pub fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for item in &self.items {
            if let MemoryItem::ToolOutput { tool_name, .. } = item {
                if !tools.contains(tool_name) {
                    tools.push(tool_name.clone());
                }
            }
        }
        tools
    }

    /// 因果顺序检查：每条 tool_output 之前都有同 seq、同工具名的 tool_call
    pub fn is_causally_ordered(&self) -> bool {
        let mut seen: Vec<(u64, &str)> = Vec::new();
        for item in &self.items {
            match item {
                MemoryItem::ToolCall { seq, tool_name, .. } => seen.push((*seq, tool_name)),
                MemoryItem::ToolOutput { seq, tool_name, .. } => {
                    if !seen.iter().any(|(s, t)| s == seq && *t == tool_name) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}
