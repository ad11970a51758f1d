//! 记忆层：会话事件日志、会话日志持久化、检索分词、历史会话索引

pub mod historical;
pub mod persistence;
pub mod store;
pub mod tokenizer;

pub use historical::{format_entries, HistoricalEntry, HistoricalIndex, INDEX_FILE_NAME};
pub use persistence::{SessionLog, SessionLogStore};
pub use store::{MemoryItem, SessionMemory};
