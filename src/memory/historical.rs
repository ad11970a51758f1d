//! 历史会话索引
//!
//! 会话结束后从其 SessionMemory 派生一条 HistoricalEntry（查询、答案、用过的工具、实体、成功标记、时间戳），
//! 按 session_id upsert：同一会话重复索引只会替换，不会重复。检索按查询词重叠数打分（确定、随共享词单调），
//! 同分按完成时间由近及远。索引文档可选落盘为单个 JSON 文件，进程内以 Arc 共享，多会话并发写安全。
//! upsert 只改内存；落盘走 `persist().await`（tokio::fs），不阻塞运行时线程。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::memory::tokenizer::{shared_terms, terms};
use crate::memory::{MemoryItem, SessionLogStore, SessionMemory};

/// 索引文件默认名
pub const INDEX_FILE_NAME: &str = "historical_conversation_store.json";

/// 答案预览最大字符数
const ANSWER_PREVIEW_CHARS: usize = 200;

/// 已完成会话的检索摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub session_id: String,
    pub query: String,
    pub answer: Option<String>,
    pub tools_used: Vec<String>,
    pub entities: Vec<String>,
    pub success: bool,
    pub completed_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
}

impl HistoricalEntry {
    /// 从会话记忆派生；没有 run_metadata（无查询文本）时返回 None
    pub fn from_memory(
        memory: &SessionMemory,
        entities: &[String],
        completed_at: DateTime<Utc>,
    ) -> Option<Self> {
        let query = memory.user_query()?.to_string();
        let answer = memory.final_answer().map(str::to_string);
        let mut entities: Vec<String> = entities.to_vec();
        entities.sort();
        entities.dedup();
        Some(Self {
            session_id: memory.session_id().to_string(),
            query,
            success: answer.is_some(),
            answer,
            tools_used: memory.tools_used(),
            entities,
            completed_at,
            indexed_at: Utc::now(),
        })
    }
}

/// 历史会话索引（进程级共享，显式 open / flush）
#[derive(Debug, Default)]
pub struct HistoricalIndex {
    entries: RwLock<HashMap<String, HistoricalEntry>>,
    path: Option<PathBuf>,
    /// 串行化落盘；快照在锁内获取，文件内容不回退
    persist_lock: Mutex<()>,
}

impl HistoricalIndex {
    /// 纯内存索引（不落盘）
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 打开（或新建）落盘索引；文件损坏时告警并从空索引开始
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| Ok(serde_json::from_str::<Vec<HistoricalEntry>>(&s)?))
            {
                Ok(list) => {
                    for e in list {
                        entries.insert(e.session_id.clone(), e);
                    }
                    tracing::info!(count = entries.len(), "Loaded historical conversations");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load historical index, starting empty");
                }
            }
        }
        Self {
            entries: RwLock::new(entries),
            path: Some(path),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, session_id: &str) -> Option<HistoricalEntry> {
        self.read().get(session_id).cloned()
    }

    /// 全部条目（按 session_id 排序）
    pub fn entries(&self) -> Vec<HistoricalEntry> {
        let mut list: Vec<HistoricalEntry> = self.read().values().cloned().collect();
        list.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        list
    }

    /// 按 session_id upsert（仅内存）；返回是否替换了已有条目
    pub fn index(&self, entry: HistoricalEntry) -> bool {
        let session_id = entry.session_id.clone();
        let replaced = self.write().insert(session_id.clone(), entry).is_some();
        tracing::info!(session_id = %session_id, replaced, "Indexed session");
        replaced
    }

    /// 从会话记忆派生并索引；无查询文本时跳过
    pub fn index_memory(
        &self,
        memory: &SessionMemory,
        entities: &[String],
        completed_at: DateTime<Utc>,
    ) -> Option<HistoricalEntry> {
        let entry = HistoricalEntry::from_memory(memory, entities, completed_at)?;
        self.index(entry.clone());
        Some(entry)
    }

    /// 扫描记忆目录中的 session-*.json 并（重新）索引比现有条目新的会话，返回索引条数
    ///
    /// 同步读盘，启动时放在 `spawn_blocking` 中调用；不落盘。
    pub fn index_all_sessions(&self, dir: impl AsRef<Path>) -> anyhow::Result<usize> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(0);
        }
        tracing::info!(dir = %dir.display(), "Scanning memory directory for sessions");
        let mut indexed = 0;
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy();
            if !entry.file_type().is_file()
                || name == INDEX_FILE_NAME
                || !name.starts_with("session-")
                || !name.ends_with(".json")
            {
                continue;
            }
            let modified: Option<DateTime<Utc>> = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            let log = match SessionLogStore::load(entry.path()) {
                Ok(log) => log,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable session log");
                    continue;
                }
            };
            let up_to_date = match (self.get(&log.session_id), modified) {
                (Some(existing), Some(m)) => existing.indexed_at >= m,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if up_to_date {
                continue;
            }
            let completed_at = log
                .items
                .iter()
                .rev()
                .find_map(item_timestamp)
                .unwrap_or(log.created_at);
            if self
                .index_memory(&log.memory(), &log.entities, completed_at)
                .is_some()
            {
                indexed += 1;
            }
        }
        tracing::info!(indexed, "Indexed new/updated sessions");
        Ok(indexed)
    }

    /// 带分数的检索：分数为查询与条目查询的共享词数，0 分不返回；同分按完成时间由近及远
    pub fn search_scored(&self, query: &str, k: usize) -> Vec<(usize, HistoricalEntry)> {
        if k == 0 {
            return Vec::new();
        }
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, HistoricalEntry)> = self
            .read()
            .values()
            .map(|e| (shared_terms(&query_terms, &terms(&e.query)), e))
            .filter(|(s, _)| *s > 0)
            .map(|(s, e)| (s, e.clone()))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.completed_at.cmp(&a.completed_at))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        scored.truncate(k);
        scored
    }

    /// 检索最相似的 k 条历史会话
    pub fn search(&self, query: &str, k: usize) -> Vec<HistoricalEntry> {
        self.search_scored(query, k)
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }

    /// 相似的成功会话中用过的工具（按相似度顺序去重）
    pub fn successful_tools_for(&self, query: &str, k: usize) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for entry in self.search(query, k).into_iter().filter(|e| e.success) {
            for t in entry.tools_used {
                if !tools.contains(&t) {
                    tools.push(t);
                }
            }
        }
        tools
    }

    /// 供 prompt 使用的历史上下文段落；无命中时返回空字符串
    pub fn relevant_context(&self, query: &str, limit: usize) -> String {
        format_entries(&self.search(query, limit))
    }

    /// 把当前全部条目写入索引文件；纯内存索引直接返回
    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let data = serde_json::to_vec_pretty(&self.entries())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        tracing::debug!(path = %path.display(), "Historical index persisted");
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HistoricalEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HistoricalEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// 将历史条目格式化为「Relevant Historical Conversations」段落
pub fn format_entries(entries: &[HistoricalEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut parts = vec!["## Relevant Historical Conversations".to_string()];
    for (i, entry) in entries.iter().enumerate() {
        parts.push(format!("{}. Query: {}", i + 1, entry.query));
        if let Some(answer) = &entry.answer {
            let preview: String = answer.chars().take(ANSWER_PREVIEW_CHARS).collect();
            if answer.chars().count() > ANSWER_PREVIEW_CHARS {
                parts.push(format!("   Answer: {}...", preview));
            } else {
                parts.push(format!("   Answer: {}", preview));
            }
        }
        if !entry.tools_used.is_empty() {
            parts.push(format!("   Tools used: {}", entry.tools_used.join(", ")));
        }
    }
    parts.join("\n")
}

fn item_timestamp(item: &MemoryItem) -> Option<DateTime<Utc>> {
    match item {
        MemoryItem::RunMetadata { timestamp, .. }
        | MemoryItem::ToolCall { timestamp, .. }
        | MemoryItem::ToolOutput { timestamp, .. }
        | MemoryItem::FinalAnswer { timestamp, .. } => Some(*timestamp),
    }
}
