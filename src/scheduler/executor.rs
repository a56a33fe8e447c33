//! Migration executor
//!
//! Carries out a plan that recommends a migration. The steps run in a fixed
//! order and each must succeed before the next starts:
//!
//! 1. re-check that the candidate is still on the source node
//! 2. move the payload (bounded by a timeout); after a timeout any copy
//!    that reached the target is discarded or moved back
//! 3. append history and move the record in one conditional store write;
//!    on failure the payload is moved back
//! 4. write through to the metadata registry (best effort)
//! 5. record an audit entry
//!
//! The store is only updated after the payload has moved, so a failed cycle
//! never leaves a record pointing at a node that does not hold its payload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::plan::{tally, SchedulerPlan};
use crate::models::{
    FileSummary, HistoryEvent, NodeCounts, OperationRecord, OperationStatus, ACTION_AUTO_MIGRATE,
};
use crate::registry::{FileMetadata, SharedRegistry};
use crate::storage::{FileUpdate, PayloadStore, SharedStateStore};

/// Actor recorded on audit entries written by the scheduler
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Result of executing one plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub executed: bool,
    pub migrated_file: Option<FileSummary>,
    pub source_node: Option<String>,
    pub target_node: Option<String>,
    /// Counts recomputed after the move
    pub after_counts: Option<NodeCounts>,
    /// Whether the registry accepted the write-through
    pub registry_synced: bool,
    /// Audit entry id, when one was recorded
    pub operation_id: Option<i64>,
}

impl MigrationResult {
    /// Result for a plan that did not recommend a migration
    pub fn skipped() -> Self {
        Self {
            executed: false,
            migrated_file: None,
            source_node: None,
            target_node: None,
            after_counts: None,
            registry_synced: false,
            operation_id: None,
        }
    }
}

/// Applies migration plans to the store, the payloads and the registry
pub struct MigrationExecutor {
    store: SharedStateStore,
    payloads: Arc<dyn PayloadStore>,
    registry: SharedRegistry,
    configured_nodes: Vec<String>,
    move_timeout: Duration,
}

impl MigrationExecutor {
    pub fn new(
        store: SharedStateStore,
        payloads: Arc<dyn PayloadStore>,
        registry: SharedRegistry,
        configured_nodes: Vec<String>,
        move_timeout: Duration,
    ) -> Self {
        Self {
            store,
            payloads,
            registry,
            configured_nodes,
            move_timeout,
        }
    }

    /// Execute `plan`
    ///
    /// Plans that do not recommend a migration return a skipped result
    /// without touching anything.
    pub async fn execute(&self, plan: &SchedulerPlan) -> SchedulerResult<MigrationResult> {
        let (Some(candidate), Some(source), Some(target)) = (
            plan.candidate.as_ref(),
            plan.source_node.as_deref(),
            plan.target_node.as_deref(),
        ) else {
            return Ok(MigrationResult::skipped());
        };
        if !plan.should_migrate || source == target {
            return Ok(MigrationResult::skipped());
        }

        let record = self
            .store
            .get_file(candidate.id)
            .map_err(|e| SchedulerError::store_read("get_file", e))?
            .filter(|record| record.node == source)
            .ok_or_else(|| SchedulerError::CandidateVanished {
                file_id: candidate.id,
                expected_node: source.to_string(),
            })?;

        let old_path = PathBuf::from(&record.path);
        let new_path = self.payloads.path_for(target, &record.filename);

        debug!(
            file_id = record.id,
            from = %old_path.display(),
            to = %new_path.display(),
            "Moving payload"
        );

        if let Err(err) = self.move_payload(record.id, source, target, &old_path, &new_path).await {
            if matches!(err, SchedulerError::MoveTimeout { .. }) {
                self.clean_up_timed_out_move(record.id, &old_path, &new_path).await;
            }
            self.audit_failure(plan, source, target, &err);
            return Err(err);
        }

        let mut history = record.history.clone();
        history.push(HistoryEvent::moved(ACTION_AUTO_MIGRATE, source, target));
        let update = FileUpdate {
            expected_node: source.to_string(),
            node: target.to_string(),
            path: new_path.to_string_lossy().into_owned(),
            history,
        };

        let updated = match self.store.update_file_record(record.id, &update) {
            Ok(updated) => updated,
            Err(e) => {
                let err = SchedulerError::StoreWriteFailed {
                    file_id: record.id,
                    reason: e.to_string(),
                };
                self.roll_back(record.id, &new_path, &old_path).await;
                self.audit_failure(plan, source, target, &err);
                return Err(err);
            }
        };

        let registry_synced = match self.write_through(&FileMetadata::from(&updated)).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    file_id = updated.id,
                    error = %err,
                    "Registry write-through failed; state store remains authoritative"
                );
                false
            }
        };

        let after_counts = self.recount(plan, source, target);
        let entry = OperationRecord::new(SCHEDULER_ACTOR, ACTION_AUTO_MIGRATE, OperationStatus::Success)
            .with_nodes([source, target])
            .with_metrics(Some(plan.counts.clone()), Some(after_counts.clone()))
            .with_details(format!(
                "Moved file {} ({}) from {} to {}",
                updated.id, updated.filename, source, target
            ));
        let operation_id = match self.store.record_operation(&entry) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(file_id = updated.id, error = %e, "Failed to record migration audit entry");
                None
            }
        };

        info!(
            file_id = updated.id,
            source = %source,
            target = %target,
            delta = plan.delta,
            registry_synced,
            "Migrated file"
        );

        Ok(MigrationResult {
            executed: true,
            migrated_file: Some(updated.summary()),
            source_node: Some(source.to_string()),
            target_node: Some(target.to_string()),
            after_counts: Some(after_counts),
            registry_synced,
            operation_id,
        })
    }

    async fn move_payload(
        &self,
        file_id: i64,
        source: &str,
        target: &str,
        from: &Path,
        to: &Path,
    ) -> SchedulerResult<()> {
        match tokio::time::timeout(self.move_timeout, self.payloads.relocate(from, to)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SchedulerError::MoveFailed {
                file_id,
                from: source.to_string(),
                to: target.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(SchedulerError::MoveTimeout {
                file_id,
                after: self.move_timeout,
            }),
        }
    }

    /// Undo whatever a timed-out move left on the target
    ///
    /// The record still points at the source, so the source payload wins:
    /// a copy next to an intact source is deleted, a payload that only
    /// exists on the target is moved back.
    async fn clean_up_timed_out_move(&self, file_id: i64, original: &Path, moved_to: &Path) {
        let (landed, source_intact) = match (
            self.payloads.exists(moved_to).await,
            self.payloads.exists(original).await,
        ) {
            (Ok(landed), Ok(source_intact)) => (landed, source_intact),
            (Err(e), _) | (_, Err(e)) => {
                error!(file_id, error = %e, "Could not inspect payloads after timed-out move");
                return;
            }
        };

        match (landed, source_intact) {
            (true, true) => match self.payloads.remove(moved_to).await {
                Ok(()) => warn!(
                    file_id,
                    path = %moved_to.display(),
                    "Removed copy left on target by timed-out move"
                ),
                Err(e) => error!(
                    file_id,
                    path = %moved_to.display(),
                    error = %e,
                    "Failed to remove copy left by timed-out move"
                ),
            },
            (true, false) => self.roll_back(file_id, moved_to, original).await,
            (false, _) => {}
        }
    }

    async fn roll_back(&self, file_id: i64, moved_to: &Path, original: &Path) {
        match tokio::time::timeout(self.move_timeout, self.payloads.relocate(moved_to, original)).await {
            Ok(Ok(())) => {
                warn!(file_id, path = %original.display(), "Moved payload back to its source node")
            }
            Ok(Err(e)) => error!(
                file_id,
                path = %moved_to.display(),
                error = %e,
                "Rollback failed; payload left on target"
            ),
            Err(_) => error!(
                file_id,
                path = %moved_to.display(),
                "Rollback timed out; payload left on target"
            ),
        }
    }

    async fn write_through(&self, metadata: &FileMetadata) -> SchedulerResult<()> {
        self.registry
            .register_file_metadata(&metadata.uuid, metadata)
            .await
            .map_err(|e| SchedulerError::RegistryWriteFailed {
                key: metadata.uuid.clone(),
                reason: e.to_string(),
            })
    }

    /// Counts after a successful move, read back from the store
    ///
    /// Falls back to adjusting the plan counts if the read fails.
    fn recount(&self, plan: &SchedulerPlan, source: &str, target: &str) -> NodeCounts {
        match self.store.get_files() {
            Ok(files) => tally(&files, &self.configured_nodes).0,
            Err(e) => {
                warn!(error = %e, "Could not recount files after migration");
                let mut counts = plan.counts.clone();
                counts.decrement(source);
                counts.increment(target);
                counts
            }
        }
    }

    fn audit_failure(&self, plan: &SchedulerPlan, source: &str, target: &str, err: &SchedulerError) {
        let entry = OperationRecord::new(SCHEDULER_ACTOR, ACTION_AUTO_MIGRATE, OperationStatus::Failed)
            .with_nodes([source, target])
            .with_metrics(Some(plan.counts.clone()), Some(plan.counts.clone()))
            .with_details(err.to_string());
        if let Err(e) = self.store.record_operation(&entry) {
            error!(error = %e, "Failed to record failed migration audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::models::{NewFileRecord, ACTION_UPLOAD};
    use crate::registry::{MemoryRegistry, MetadataRegistry, RegistryError, RegistryResult};
    use crate::scheduler::plan::build_plan;
    use crate::storage::testing::FaultyStateStore;
    use crate::storage::{LocalPayloadStore, MemoryStateStore, StateStore};

    /// Registry that refuses every write
    struct UnreachableRegistry;

    #[async_trait]
    impl MetadataRegistry for UnreachableRegistry {
        async fn register_file_metadata(
            &self,
            _key: &str,
            _metadata: &FileMetadata,
        ) -> RegistryResult<()> {
            Err(RegistryError::Connection("connection refused".to_string()))
        }

        async fn list_registered_files(&self) -> RegistryResult<Vec<(String, FileMetadata)>> {
            Ok(Vec::new())
        }
    }

    /// Where the first relocate stalls
    #[derive(Debug, Clone, Copy)]
    enum Stall {
        BeforeMove,
        AfterCopy,
        AfterRename,
    }

    /// Payload store whose first relocate never finishes in time
    struct StallingPayloadStore {
        inner: Arc<LocalPayloadStore>,
        stall: Stall,
        armed: AtomicBool,
    }

    #[async_trait]
    impl PayloadStore for StallingPayloadStore {
        fn path_for(&self, node: &str, filename: &str) -> PathBuf {
            self.inner.path_for(node, filename)
        }

        async fn ensure_node_dirs(&self, nodes: &[String]) -> io::Result<()> {
            self.inner.ensure_node_dirs(nodes).await
        }

        async fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
            if !self.armed.swap(false, Ordering::SeqCst) {
                return self.inner.relocate(from, to).await;
            }
            tokio::fs::create_dir_all(to.parent().unwrap()).await?;
            match self.stall {
                Stall::BeforeMove => {}
                Stall::AfterCopy => {
                    tokio::fs::copy(from, to).await?;
                }
                Stall::AfterRename => tokio::fs::rename(from, to).await?,
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn import(&self, source: &Path, node: &str, filename: &str) -> io::Result<(PathBuf, u64)> {
            self.inner.import(source, node, filename).await
        }

        async fn exists(&self, path: &Path) -> io::Result<bool> {
            self.inner.exists(path).await
        }

        async fn remove(&self, path: &Path) -> io::Result<()> {
            self.inner.remove(path).await
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: SharedStateStore,
        payloads: Arc<LocalPayloadStore>,
        registry: Arc<MemoryRegistry>,
        executor: MigrationExecutor,
    }

    fn nodes() -> Vec<String> {
        vec!["zk1".to_string(), "zk2".to_string(), "zk3".to_string()]
    }

    fn fixture() -> Fixture {
        build(Arc::new(MemoryStateStore::new()), None, None)
    }

    fn build(store: SharedStateStore, registry: Option<SharedRegistry>, stall: Option<Stall>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let payloads = Arc::new(LocalPayloadStore::new(dir.path()));
        let mirror = Arc::new(MemoryRegistry::new("/demo/files"));

        let (moves, move_timeout): (Arc<dyn PayloadStore>, Duration) = match stall {
            Some(stall) => (
                Arc::new(StallingPayloadStore {
                    inner: payloads.clone(),
                    stall,
                    armed: AtomicBool::new(true),
                }),
                Duration::from_millis(100),
            ),
            None => (payloads.clone(), Duration::from_secs(5)),
        };
        let registry = registry.unwrap_or_else(|| mirror.clone() as SharedRegistry);

        let executor = MigrationExecutor::new(store.clone(), moves, registry, nodes(), move_timeout);
        Fixture {
            _dir: dir,
            store,
            payloads,
            registry: mirror,
            executor,
        }
    }

    async fn add_file(fx: &Fixture, n: usize, node: &str) {
        let filename = format!("f{n}.bin");
        let path = fx.payloads.path_for(node, &filename);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"data").await.unwrap();
        fx.store
            .create_file_record(NewFileRecord {
                uuid: format!("u{n}"),
                filename,
                size_bytes: 4,
                node: node.to_string(),
                path: path.to_string_lossy().into_owned(),
                history: vec![HistoryEvent::created(ACTION_UPLOAD, node)],
            })
            .unwrap();
    }

    async fn seeded(fx: &Fixture) -> SchedulerPlan {
        for n in 0..3 {
            add_file(fx, n, "zk1").await;
        }
        let plan = plan(fx, 2);
        assert!(plan.should_migrate);
        plan
    }

    fn plan(fx: &Fixture, threshold: u32) -> SchedulerPlan {
        build_plan(
            &fx.store.get_files().unwrap(),
            &fx.store.get_node_states().unwrap(),
            &nodes(),
            threshold,
        )
    }

    #[tokio::test]
    async fn test_execute_moves_file() {
        let fx = fixture();
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();

        let result = fx.executor.execute(&plan).await.unwrap();

        assert!(result.executed);
        assert!(result.registry_synced);
        assert_eq!(result.target_node.as_deref(), Some("zk2"));
        let after = result.after_counts.unwrap();
        assert_eq!(after.get("zk1"), Some(2));
        assert_eq!(after.get("zk2"), Some(1));

        let record = fx.store.get_file(candidate.id).unwrap().unwrap();
        assert_eq!(record.node, "zk2");
        assert_eq!(record.history.len(), 2);
        assert!(record.history_consistent());
        assert!(Path::new(&record.path).exists());

        let mirrored = fx.registry.get(&record.uuid).await.unwrap();
        assert_eq!(mirrored.node, "zk2");

        let ops = fx.store.list_operations(10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Success);
        assert_eq!(ops[0].actor, SCHEDULER_ACTOR);
        assert_eq!(ops[0].before_metrics.as_ref().unwrap().get("zk1"), Some(3));
    }

    #[tokio::test]
    async fn test_execute_skips_when_not_recommended() {
        let fx = fixture();
        add_file(&fx, 0, "zk1").await;
        let plan = plan(&fx, 5);
        assert!(!plan.should_migrate);

        let result = fx.executor.execute(&plan).await.unwrap();
        assert_eq!(result, MigrationResult::skipped());
        assert!(fx.store.list_operations(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_detects_vanished_candidate() {
        let fx = fixture();
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();
        fx.store.delete_file_record(candidate.id).unwrap();

        let err = fx.executor.execute(&plan).await.unwrap_err();
        assert!(matches!(err, SchedulerError::CandidateVanished { .. }));
    }

    #[tokio::test]
    async fn test_execute_missing_payload_fails_cleanly() {
        let fx = fixture();
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();
        let record = fx.store.get_file(candidate.id).unwrap().unwrap();
        tokio::fs::remove_file(&record.path).await.unwrap();

        let err = fx.executor.execute(&plan).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MoveFailed { .. }));

        let unchanged = fx.store.get_file(candidate.id).unwrap().unwrap();
        assert_eq!(unchanged.node, "zk1");
        assert_eq!(unchanged.history.len(), 1);

        let ops = fx.store.list_operations(10).unwrap();
        assert_eq!(ops[0].status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn test_registry_failure_does_not_abort_migration() {
        let fx = build(
            Arc::new(MemoryStateStore::new()),
            Some(Arc::new(UnreachableRegistry)),
            None,
        );
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();

        let result = fx.executor.execute(&plan).await.unwrap();

        assert!(result.executed);
        assert!(!result.registry_synced);
        let record = fx.store.get_file(candidate.id).unwrap().unwrap();
        assert_eq!(record.node, "zk2");
        assert!(Path::new(&record.path).exists());

        let ops = fx.store.list_operations(10).unwrap();
        assert_eq!(ops[0].status, OperationStatus::Success);
    }

    #[tokio::test]
    async fn test_store_write_failure_moves_payload_back() {
        let store = Arc::new(FaultyStateStore::new());
        let fx = build(store.clone(), None, None);
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();
        let source_path = PathBuf::from(&fx.store.get_file(candidate.id).unwrap().unwrap().path);
        let target_path = fx.payloads.path_for("zk2", &candidate.filename);
        store.fail_file_updates(true);

        let err = fx.executor.execute(&plan).await.unwrap_err();

        assert_eq!(err.code(), "store_write_failed");
        assert!(source_path.exists());
        assert!(!target_path.exists());

        let record = fx.store.get_file(candidate.id).unwrap().unwrap();
        assert_eq!(record.node, "zk1");
        assert_eq!(record.history.len(), 1);

        let ops = fx.store.list_operations(10).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Failed);
        assert!(fx.registry.get(&record.uuid).await.is_none());
    }

    async fn timed_out_move(stall: Stall) -> (Fixture, FileSummary, PathBuf, PathBuf) {
        let fx = build(Arc::new(MemoryStateStore::new()), None, Some(stall));
        let plan = seeded(&fx).await;
        let candidate = plan.candidate.clone().unwrap();
        let source_path = PathBuf::from(&fx.store.get_file(candidate.id).unwrap().unwrap().path);
        let target_path = fx.payloads.path_for("zk2", &candidate.filename);

        let err = fx.executor.execute(&plan).await.unwrap_err();
        assert_eq!(err.code(), "move_timeout");

        let record = fx.store.get_file(candidate.id).unwrap().unwrap();
        assert_eq!(record.node, "zk1");
        assert_eq!(record.history.len(), 1);
        assert_eq!(fx.store.list_operations(10).unwrap()[0].status, OperationStatus::Failed);

        (fx, candidate, source_path, target_path)
    }

    #[tokio::test]
    async fn test_move_timeout_leaves_record_untouched() {
        let (_fx, _, source_path, target_path) = timed_out_move(Stall::BeforeMove).await;
        assert!(source_path.exists());
        assert!(!target_path.exists());
    }

    #[tokio::test]
    async fn test_move_timeout_discards_stray_copy() {
        let (_fx, _, source_path, target_path) = timed_out_move(Stall::AfterCopy).await;
        assert!(source_path.exists());
        assert!(!target_path.exists());
    }

    #[tokio::test]
    async fn test_move_timeout_after_rename_moves_payload_back() {
        let (fx, candidate, source_path, target_path) = timed_out_move(Stall::AfterRename).await;
        assert!(source_path.exists());
        assert!(!target_path.exists());

        // The record and payload agree again, so the next cycle can retry.
        let retry = fx.executor.execute(&plan(&fx, 2)).await.unwrap();
        assert_eq!(retry.migrated_file.unwrap().id, candidate.id);
    }
}
