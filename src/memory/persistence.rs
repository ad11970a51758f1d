//! 会话日志持久化
//!
//! 每个会话结束后写成一个 JSON 文件：`<root>/<YYYY>/<MM>/<DD>/session-<id>.json`（按创建日期分目录），
//! 内容为会话头（id、query、创建时间、实体）加全部 MemoryItem；历史索引可据此重建。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{MemoryItem, SessionMemory};

/// 落盘的会话日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    pub session_id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub items: Vec<MemoryItem>,
}

impl SessionLog {
    pub fn new(memory: &SessionMemory, created_at: DateTime<Utc>, entities: &[String]) -> Self {
        Self {
            session_id: memory.session_id().to_string(),
            query: memory.user_query().unwrap_or_default().to_string(),
            created_at,
            entities: entities.to_vec(),
            items: memory.items().to_vec(),
        }
    }

    pub fn memory(&self) -> SessionMemory {
        SessionMemory::from_items(self.session_id.clone(), self.items.clone())
    }
}

/// 简单的文件持久化：每会话一个 JSON 文件
#[derive(Debug, Clone)]
pub struct SessionLogStore {
    root: PathBuf,
}

impl SessionLogStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, session_id: &str, created_at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{:04}", created_at.year()))
            .join(format!("{:02}", created_at.month()))
            .join(format!("{:02}", created_at.day()))
            .join(format!("session-{}.json", session_id))
    }

    /// 写入会话日志（tokio::fs）；父目录不存在时自动创建；同一会话重复写入即覆盖
    pub async fn save(&self, log: &SessionLog) -> anyhow::Result<PathBuf> {
        let path = self.path_for(&log.session_id, log.created_at);
        let data = serde_json::to_vec_pretty(log)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// 同步读取（索引重建在 blocking 线程中调用）
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<SessionLog> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionLogStore::new(dir.path());

        let mut memory = SessionMemory::new("abc");
        memory.record_run_metadata("factorial of 5");
        let seq = memory.record_tool_call("factorial", json!({"n": 5}), 1, 1);
        memory.record_tool_output(seq, Ok(json!(120)));
        memory.record_final_answer("120");

        let created = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        let log = SessionLog::new(&memory, created, &["5".to_string()]);
        let path = store.save(&log).await.unwrap();
        assert!(path.ends_with("2026/03/07/session-abc.json"));

        let loaded = SessionLogStore::load(&path).unwrap();
        assert_eq!(loaded.session_id, "abc");
        assert_eq!(loaded.query, "factorial of 5");
        assert_eq!(loaded.items, memory.items().to_vec());
        assert!(loaded.memory().is_causally_ordered());
    }
}
