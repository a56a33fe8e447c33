//! State store with switchable failures, for exercising error paths

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{FileUpdate, MemoryStateStore, StateStore, StoreError, StoreResult};
use crate::models::{FileRecord, NewFileRecord, NodeState, OperationRecord};

/// [`MemoryStateStore`] wrapper whose operations can be made to fail
#[derive(Default)]
pub struct FaultyStateStore {
    inner: MemoryStateStore,
    fail_snapshots: AtomicBool,
    fail_file_updates: AtomicBool,
    fail_node_state_writes: AtomicBool,
}

impl FaultyStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_files` and `get_node_states` fail
    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Make `update_file_record` fail
    pub fn fail_file_updates(&self, fail: bool) {
        self.fail_file_updates.store(fail, Ordering::SeqCst);
    }

    /// Make `set_node_state` fail
    pub fn fail_node_state_writes(&self, fail: bool) {
        self.fail_node_state_writes.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, operation: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{operation}: disk unavailable"),
            )));
        }
        Ok(())
    }
}

impl StateStore for FaultyStateStore {
    fn get_files(&self) -> StoreResult<Vec<FileRecord>> {
        Self::check(&self.fail_snapshots, "get_files")?;
        self.inner.get_files()
    }

    fn get_file(&self, id: i64) -> StoreResult<Option<FileRecord>> {
        self.inner.get_file(id)
    }

    fn create_file_record(&self, record: NewFileRecord) -> StoreResult<FileRecord> {
        self.inner.create_file_record(record)
    }

    fn update_file_record(&self, id: i64, update: &FileUpdate) -> StoreResult<FileRecord> {
        Self::check(&self.fail_file_updates, "update_file_record")?;
        self.inner.update_file_record(id, update)
    }

    fn delete_file_record(&self, id: i64) -> StoreResult<bool> {
        self.inner.delete_file_record(id)
    }

    fn get_node_states(&self) -> StoreResult<Vec<NodeState>> {
        Self::check(&self.fail_snapshots, "get_node_states")?;
        self.inner.get_node_states()
    }

    fn set_node_state(
        &self,
        node: &str,
        drained: bool,
        reason: Option<&str>,
    ) -> StoreResult<NodeState> {
        Self::check(&self.fail_node_state_writes, "set_node_state")?;
        self.inner.set_node_state(node, drained, reason)
    }

    fn record_operation(&self, entry: &OperationRecord) -> StoreResult<i64> {
        self.inner.record_operation(entry)
    }

    fn list_operations(&self, limit: usize) -> StoreResult<Vec<OperationRecord>> {
        self.inner.list_operations(limit)
    }
}
