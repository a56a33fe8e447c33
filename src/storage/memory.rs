//! In-memory state store
//!
//! Useful for tests and for running without a database file.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::{FileUpdate, StateStore, StoreError, StoreResult};
use crate::models::{FileRecord, NewFileRecord, NodeState, OperationRecord};

#[derive(Default)]
struct Inner {
    files: HashMap<i64, FileRecord>,
    next_file_id: i64,
    node_states: HashMap<String, NodeState>,
    operations: Vec<OperationRecord>,
}

/// In-memory implementation of [`StateStore`]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn get_files(&self) -> StoreResult<Vec<FileRecord>> {
        let inner = self.read()?;
        let mut files: Vec<FileRecord> = inner.files.values().cloned().collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(files)
    }

    fn get_file(&self, id: i64) -> StoreResult<Option<FileRecord>> {
        Ok(self.read()?.files.get(&id).cloned())
    }

    fn create_file_record(&self, record: NewFileRecord) -> StoreResult<FileRecord> {
        let mut inner = self.write()?;
        inner.next_file_id += 1;
        let file = FileRecord {
            id: inner.next_file_id,
            uuid: record.uuid,
            filename: record.filename,
            size_bytes: record.size_bytes,
            node: record.node,
            path: record.path,
            created_at: Utc::now(),
            history: record.history,
        };
        inner.files.insert(file.id, file.clone());
        Ok(file)
    }

    fn update_file_record(&self, id: i64, update: &FileUpdate) -> StoreResult<FileRecord> {
        let mut inner = self.write()?;
        let file = inner.files.get_mut(&id).ok_or(StoreError::FileNotFound(id))?;
        if file.node != update.expected_node {
            return Err(StoreError::NodeMismatch {
                id,
                expected: update.expected_node.clone(),
            });
        }
        file.node = update.node.clone();
        file.path = update.path.clone();
        file.history = update.history.clone();
        Ok(file.clone())
    }

    fn delete_file_record(&self, id: i64) -> StoreResult<bool> {
        Ok(self.write()?.files.remove(&id).is_some())
    }

    fn get_node_states(&self) -> StoreResult<Vec<NodeState>> {
        let inner = self.read()?;
        let mut states: Vec<NodeState> = inner.node_states.values().cloned().collect();
        states.sort_by(|a, b| a.node.cmp(&b.node));
        Ok(states)
    }

    fn set_node_state(
        &self,
        node: &str,
        drained: bool,
        reason: Option<&str>,
    ) -> StoreResult<NodeState> {
        let state = NodeState {
            node: node.to_string(),
            drained,
            reason: reason.map(String::from),
            updated_at: Some(Utc::now()),
        };
        self.write()?
            .node_states
            .insert(node.to_string(), state.clone());
        Ok(state)
    }

    fn record_operation(&self, entry: &OperationRecord) -> StoreResult<i64> {
        let mut inner = self.write()?;
        let id = inner.operations.len() as i64 + 1;
        let mut stored = entry.clone();
        stored.id = Some(id);
        inner.operations.push(stored);
        Ok(id)
    }

    fn list_operations(&self, limit: usize) -> StoreResult<Vec<OperationRecord>> {
        let inner = self.read()?;
        Ok(inner.operations.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryEvent, ACTION_UPLOAD};

    #[test]
    fn test_file_ids_are_sequential() {
        let store = MemoryStateStore::new();
        assert!(store.get_files().unwrap().is_empty());

        let ids: Vec<i64> = ["u1", "u2"]
            .iter()
            .map(|uuid| {
                store
                    .create_file_record(NewFileRecord {
                        uuid: uuid.to_string(),
                        filename: "f.bin".to_string(),
                        size_bytes: 1,
                        node: "zk1".to_string(),
                        path: "/tmp/zk1/f.bin".to_string(),
                        history: vec![HistoryEvent::created(ACTION_UPLOAD, "zk1")],
                    })
                    .unwrap()
                    .id
            })
            .collect();

        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.get_files().unwrap().len(), 2);
    }
}
