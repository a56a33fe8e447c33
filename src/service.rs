//! Service wiring
//!
//! [`BalancerService`] assembles the state store, payload store, metadata
//! registry and scheduler from a [`Config`] and exposes the operations used
//! by the CLI: diagnostics, run-once, drain/undrain, ingest and listings.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    FileRecord, HistoryEvent, NewFileRecord, OperationRecord, OperationStatus, ACTION_UPLOAD,
};
use crate::registry::{create_registry, FileMetadata, SharedRegistry};
use crate::scheduler::{
    least_loaded, CycleReport, DrainAck, DrainController, LoopSettings, MigrationExecutor,
    SchedulerError, SchedulerLoop, SchedulerPlan,
};
use crate::storage::{create_sqlite_store, LocalPayloadStore, PayloadStore, SharedStateStore};
use crate::utils::sanitize_filename;

/// Fully wired rebalancer
pub struct BalancerService {
    config: Config,
    nodes: Vec<String>,
    store: SharedStateStore,
    payloads: Arc<dyn PayloadStore>,
    registry: SharedRegistry,
    scheduler: Arc<SchedulerLoop>,
    drain: DrainController,
}

impl BalancerService {
    /// Build every component described by `config`
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate().map_err(|e| Error::config(e.to_string()))?;

        let store = create_sqlite_store(&config.database.sqlite_path)?;
        let payloads: Arc<dyn PayloadStore> =
            Arc::new(LocalPayloadStore::new(config.cluster.storage_root.clone()));
        let registry = create_registry(&config.registry).await?;

        Self::with_components(config, store, payloads, registry).await
    }

    /// Build the service around existing components
    pub async fn with_components(
        config: Config,
        store: SharedStateStore,
        payloads: Arc<dyn PayloadStore>,
        registry: SharedRegistry,
    ) -> Result<Self> {
        let nodes = config.node_ids();
        payloads.ensure_node_dirs(&nodes).await?;

        let executor = MigrationExecutor::new(
            store.clone(),
            payloads.clone(),
            registry.clone(),
            nodes.clone(),
            config.move_timeout(),
        );
        let scheduler = Arc::new(SchedulerLoop::new(
            store.clone(),
            executor,
            LoopSettings {
                nodes: nodes.clone(),
                threshold: config.scheduler.threshold,
                interval: config.interval(),
            },
        ));
        let drain = DrainController::new(store.clone(), nodes.clone());

        info!(
            nodes = ?nodes,
            threshold = config.scheduler.threshold,
            interval_secs = config.scheduler.interval_secs,
            "Balancer service ready"
        );

        Ok(Self {
            config,
            nodes,
            store,
            payloads,
            registry,
            scheduler,
            drain,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configured node ids, in configured order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Shared handle to the scheduling loop
    pub fn scheduler(&self) -> Arc<SchedulerLoop> {
        Arc::clone(&self.scheduler)
    }

    /// Current plan; read-only
    pub fn diagnostics(&self) -> Result<SchedulerPlan> {
        Ok(self.scheduler.diagnostics()?)
    }

    /// One manual cycle
    ///
    /// Failures are reported inside the returned [`CycleReport`].
    pub async fn run_once(&self) -> CycleReport {
        self.scheduler.run_once().await
    }

    pub fn drain(&self, node: &str, reason: Option<&str>, actor: &str) -> Result<DrainAck> {
        Ok(self.drain.drain(node, reason, actor)?)
    }

    pub fn undrain(&self, node: &str, actor: &str) -> Result<DrainAck> {
        Ok(self.drain.undrain(node, actor)?)
    }

    /// Copy a local file into the pool
    ///
    /// The file lands on `node` when given, otherwise on the least-loaded
    /// node that is not drained.
    pub async fn ingest(&self, source: &Path, node: Option<&str>, actor: &str) -> Result<FileRecord> {
        let node = match node.map(str::trim) {
            Some(node) if self.nodes.iter().any(|n| n == node) => node.to_string(),
            Some(node) => return Err(SchedulerError::unknown_node(node, &self.nodes).into()),
            None => self.placement_node()?,
        };

        let original = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let uuid = Uuid::new_v4().simple().to_string();
        let filename = format!("{uuid}_{}", sanitize_filename(&original));

        let (path, size_bytes) = self.payloads.import(source, &node, &filename).await?;

        let record = match self.store.create_file_record(NewFileRecord {
            uuid,
            filename,
            size_bytes,
            node: node.clone(),
            path: path.to_string_lossy().into_owned(),
            history: vec![HistoryEvent::created(ACTION_UPLOAD, node.as_str())],
        }) {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = self.payloads.remove(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "Failed to remove orphaned payload");
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .registry
            .register_file_metadata(&record.uuid, &FileMetadata::from(&record))
            .await
        {
            warn!(file_id = record.id, error = %e, "Registry write failed for ingested file");
        }

        let entry = OperationRecord::new(actor, ACTION_UPLOAD, OperationStatus::Success)
            .with_nodes([node.as_str()])
            .with_details(format!(
                "Ingested {} ({} bytes) as file {}",
                original, record.size_bytes, record.id
            ));
        if let Err(e) = self.store.record_operation(&entry) {
            warn!(file_id = record.id, error = %e, "Failed to record upload audit entry");
        }

        info!(file_id = record.id, node = %record.node, size = record.size_bytes, "Ingested file");
        Ok(record)
    }

    /// File records, newest first
    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.store.get_files()?)
    }

    /// Audit entries, newest first
    ///
    /// Without a limit the configured listing limit applies.
    pub fn list_operations(&self, limit: Option<usize>) -> Result<Vec<OperationRecord>> {
        let limit = limit.unwrap_or(self.config.database.operations_limit);
        Ok(self.store.list_operations(limit)?)
    }

    /// Documents currently mirrored in the registry
    pub async fn registered_files(&self) -> Result<Vec<(String, FileMetadata)>> {
        Ok(self.registry.list_registered_files().await?)
    }

    fn placement_node(&self) -> Result<String> {
        let plan = self.scheduler.diagnostics()?;
        least_loaded(&plan.counts, &plan.drained_nodes)
            .or_else(|| least_loaded(&plan.counts, &[]))
            .map(String::from)
            .ok_or_else(|| Error::config("no storage nodes configured"))
    }
}
