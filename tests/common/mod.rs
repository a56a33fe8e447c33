//! Common test utilities

#![allow(dead_code)]

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use filebalancer::config::Config;
use filebalancer::models::{FileRecord, HistoryEvent, NewFileRecord, ACTION_UPLOAD};
use filebalancer::registry::MemoryRegistry;
use filebalancer::service::BalancerService;
use filebalancer::storage::{LocalPayloadStore, SharedStateStore, SqliteStateStore, StateStore};

/// A service backed by a SQLite file and payload directories in a temp dir
pub struct TestCluster {
    pub dir: TempDir,
    pub store: SharedStateStore,
    pub registry: Arc<MemoryRegistry>,
    pub service: BalancerService,
}

impl TestCluster {
    pub async fn new(threshold: u32) -> Self {
        let dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.cluster.storage_root = dir.path().join("uploads");
        config.database.sqlite_path = dir.path().join("state.db");
        config.scheduler.threshold = threshold;

        let store: SharedStateStore =
            Arc::new(SqliteStateStore::new(&config.database.sqlite_path).unwrap());
        let registry = Arc::new(MemoryRegistry::new(config.registry.root_path.clone()));
        let payloads = Arc::new(LocalPayloadStore::new(config.cluster.storage_root.clone()));

        let service =
            BalancerService::with_components(config, store.clone(), payloads, registry.clone())
                .await
                .unwrap();

        Self {
            dir,
            store,
            registry,
            service,
        }
    }

    /// Create `count` files with payloads on `node`
    pub async fn seed(&self, node: &str, count: usize) {
        let root = self.dir.path().join("uploads").join(node);
        tokio::fs::create_dir_all(&root).await.unwrap();

        for _ in 0..count {
            let uuid = Uuid::new_v4().simple().to_string();
            let filename = format!("{uuid}_seed.bin");
            let path = root.join(&filename);
            tokio::fs::write(&path, uuid.as_bytes()).await.unwrap();

            self.store
                .create_file_record(NewFileRecord {
                    uuid,
                    filename,
                    size_bytes: 32,
                    node: node.to_string(),
                    path: path.to_string_lossy().into_owned(),
                    history: vec![HistoryEvent::created(ACTION_UPLOAD, node)],
                })
                .unwrap();
        }
    }

    /// Seed the pool with one count per node, in node order
    pub async fn seed_counts(&self, counts: &[(&str, usize)]) {
        for (node, count) in counts {
            self.seed(node, *count).await;
        }
    }
}

/// In-memory file record for pure planning tests
pub fn file_record(id: i64, node: &str) -> FileRecord {
    FileRecord {
        id,
        uuid: format!("uuid-{id}"),
        filename: format!("file-{id}.bin"),
        size_bytes: 64,
        node: node.to_string(),
        path: format!("/data/{node}/file-{id}.bin"),
        created_at: Utc::now() - Duration::seconds(id),
        history: vec![HistoryEvent::created(ACTION_UPLOAD, node)],
    }
}
