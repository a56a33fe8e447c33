//! State store and payload storage
//!
//! The state store is the durable record of files, per-node administrative
//! state and the operations audit log. It owns no decision logic; the
//! scheduler reads a snapshot from it and writes back through it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Plan Builder / Migration Executor / Drain          │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │       StateStore trait        │ │    PayloadStore trait     │
//! └───────────────────────────────┘ └───────────────────────────┘
//!          │               │                     │
//!          ▼               ▼                     ▼
//! ┌────────────────┐ ┌────────────────┐ ┌───────────────────────┐
//! │ SqliteStateStore│ │MemoryStateStore│ │   LocalPayloadStore   │
//! └────────────────┘ └────────────────┘ └───────────────────────┘
//! ```

pub mod memory;
pub mod payload;
pub mod sqlite;
#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{FileRecord, HistoryEvent, NewFileRecord, NodeState, OperationRecord};

pub use memory::MemoryStateStore;
pub use payload::{LocalPayloadStore, PayloadStore};
pub use sqlite::SqliteStateStore;

/// Errors raised by state store implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while opening the store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file record does not exist
    #[error("File record {0} not found")]
    FileNotFound(i64),

    /// A conditional update found the record on a different node
    #[error("File record {id} is no longer on node {expected}")]
    NodeMismatch { id: i64, expected: String },

    /// A lock guarding the store was poisoned by a panicking writer
    #[error("State store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// New location and history for a file, applied as one write
///
/// The write only applies while the record is still on `expected_node`.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub expected_node: String,
    pub node: String,
    pub path: String,
    pub history: Vec<HistoryEvent>,
}

/// Durable record of files, node states and operations
pub trait StateStore: Send + Sync {
    /// All file records, newest first
    fn get_files(&self) -> StoreResult<Vec<FileRecord>>;

    /// Single file record by id
    fn get_file(&self, id: i64) -> StoreResult<Option<FileRecord>>;

    /// Insert a new file record and return it with its assigned id
    fn create_file_record(&self, record: NewFileRecord) -> StoreResult<FileRecord>;

    /// Atomically replace node, path and history of a file
    fn update_file_record(&self, id: i64, update: &FileUpdate) -> StoreResult<FileRecord>;

    /// Remove a file record; returns whether a record was removed
    fn delete_file_record(&self, id: i64) -> StoreResult<bool>;

    /// Persisted node states (nodes never touched are absent)
    fn get_node_states(&self) -> StoreResult<Vec<NodeState>>;

    /// Upsert the administrative state of a node
    fn set_node_state(&self, node: &str, drained: bool, reason: Option<&str>)
        -> StoreResult<NodeState>;

    /// Append an audit entry and return its id
    fn record_operation(&self, entry: &OperationRecord) -> StoreResult<i64>;

    /// Most recent audit entries, newest first
    fn list_operations(&self, limit: usize) -> StoreResult<Vec<OperationRecord>>;

    /// Files currently owned by `node`, newest first
    fn get_files_by_node(&self, node: &str) -> StoreResult<Vec<FileRecord>> {
        Ok(self
            .get_files()?
            .into_iter()
            .filter(|f| f.node == node)
            .collect())
    }
}

/// Thread-safe shared store handle
pub type SharedStateStore = Arc<dyn StateStore>;

/// Create a shared SQLite store at `path`
pub fn create_sqlite_store(path: impl AsRef<Path>) -> StoreResult<SharedStateStore> {
    Ok(Arc::new(SqliteStateStore::new(path)?))
}

/// Create a shared in-memory store
pub fn create_memory_store() -> SharedStateStore {
    Arc::new(MemoryStateStore::new())
}
