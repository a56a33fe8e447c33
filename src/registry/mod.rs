//! Metadata registry mirror
//!
//! Third-party consumers read file→node assignments from an external
//! key-value tree. The scheduler writes through to it after every migration;
//! the registry is a best-effort mirror and never the source of truth.
//!
//! Keys follow a path layout, `<root_path>/<file uuid>`, with a JSON
//! [`FileMetadata`] document as the value.
//!
//! # Example
//!
//! ```rust,ignore
//! use filebalancer::registry::{MemoryRegistry, MetadataRegistry};
//!
//! let registry = MemoryRegistry::new("/demo/files");
//! registry.register_file_metadata("abc123", &metadata).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::RegistryConfig;
use crate::models::{FileRecord, HistoryEvent};
use crate::utils::retry::{with_retry, RetryConfig};

/// Errors raised by registry backends
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Could not obtain a connection
    #[error("Registry connection failed: {0}")]
    Connection(String),

    /// The backend rejected a command
    #[error("Registry command failed: {0}")]
    Command(#[from] redis::RedisError),

    /// Metadata document could not be encoded
    #[error("Registry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The write did not complete in time
    #[error("Registry write timed out after {0:?}")]
    Timeout(Duration),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Document mirrored for each file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: i64,
    pub uuid: String,
    pub filename: String,
    pub size: u64,
    pub node: String,
    pub path: String,
    pub history: Vec<HistoryEvent>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FileRecord> for FileMetadata {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            uuid: record.uuid.clone(),
            filename: record.filename.clone(),
            size: record.size_bytes,
            node: record.node.clone(),
            path: record.path.clone(),
            history: record.history.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// External key-value mirror of file placement
#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    /// Create or replace the metadata stored under `key`
    async fn register_file_metadata(&self, key: &str, metadata: &FileMetadata)
        -> RegistryResult<()>;

    /// All registered documents keyed by their full path
    async fn list_registered_files(&self) -> RegistryResult<Vec<(String, FileMetadata)>>;
}

/// Thread-safe shared registry handle
pub type SharedRegistry = Arc<dyn MetadataRegistry>;

fn full_key(root_path: &str, key: &str) -> String {
    format!("{}/{}", root_path.trim_end_matches('/'), key)
}

// ============================================================================
// In-memory registry
// ============================================================================

/// Registry kept in process memory
///
/// Used when no external registry is configured, and in tests.
pub struct MemoryRegistry {
    root_path: String,
    entries: RwLock<BTreeMap<String, FileMetadata>>,
}

impl MemoryRegistry {
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Look up the document stored for `key`
    pub async fn get(&self, key: &str) -> Option<FileMetadata> {
        self.entries
            .read()
            .await
            .get(&full_key(&self.root_path, key))
            .cloned()
    }
}

#[async_trait]
impl MetadataRegistry for MemoryRegistry {
    async fn register_file_metadata(
        &self,
        key: &str,
        metadata: &FileMetadata,
    ) -> RegistryResult<()> {
        self.entries
            .write()
            .await
            .insert(full_key(&self.root_path, key), metadata.clone());
        Ok(())
    }

    async fn list_registered_files(&self) -> RegistryResult<Vec<(String, FileMetadata)>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ============================================================================
// Redis registry
// ============================================================================

/// Registry backed by Redis keys laid out as a path tree
pub struct RedisRegistry {
    pool: Pool,
    root_path: String,
    timeout: Duration,
    retry: RetryConfig,
}

impl RedisRegistry {
    /// Connect to Redis and verify the connection with `PING`
    pub async fn connect(url: &str, config: &RegistryConfig) -> RegistryResult<Self> {
        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| RegistryError::Connection(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RegistryError::Connection(format!("Failed to create pool: {e}")))?;

        let registry = Self {
            pool,
            root_path: config.root_path.clone(),
            timeout: config.timeout(),
            retry: RetryConfig::new(config.retries),
        };

        registry
            .bounded(async {
                let mut conn = registry.connection().await?;
                let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
                Ok(())
            })
            .await?;

        tracing::info!(url = %url, root = %registry.root_path, "Connected to metadata registry");
        Ok(registry)
    }

    async fn connection(&self) -> RegistryResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| RegistryError::Connection(e.to_string()))
    }

    async fn bounded<T, F>(&self, fut: F) -> RegistryResult<T>
    where
        F: std::future::Future<Output = RegistryResult<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RegistryError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl MetadataRegistry for RedisRegistry {
    async fn register_file_metadata(
        &self,
        key: &str,
        metadata: &FileMetadata,
    ) -> RegistryResult<()> {
        let path = full_key(&self.root_path, key);
        let payload = serde_json::to_vec(metadata)?;
        let (path_ref, payload_ref) = (path.as_str(), payload.as_slice());

        with_retry(&self.retry, move || {
            self.bounded(async move {
                let mut conn = self.connection().await?;
                let _: () = conn.set(path_ref, payload_ref).await?;
                Ok(())
            })
        })
        .await?;

        tracing::debug!(key = %path, node = %metadata.node, "Registered file metadata");
        Ok(())
    }

    async fn list_registered_files(&self) -> RegistryResult<Vec<(String, FileMetadata)>> {
        let pattern = format!("{}/*", self.root_path.trim_end_matches('/'));

        self.bounded(async {
            let mut conn = self.connection().await?;
            let keys: Vec<String> = redis::cmd("KEYS")
                .arg(&pattern)
                .query_async(&mut *conn)
                .await?;

            let mut entries = Vec::with_capacity(keys.len());
            for key in keys {
                let raw: Option<Vec<u8>> = conn.get(&key).await?;
                let Some(raw) = raw else { continue };
                match serde_json::from_slice::<FileMetadata>(&raw) {
                    Ok(metadata) => entries.push((key, metadata)),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping unreadable registry entry")
                    }
                }
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
        .await
    }
}

/// Build the registry described by `config`
///
/// Without a URL an in-process [`MemoryRegistry`] is used.
pub async fn create_registry(config: &RegistryConfig) -> RegistryResult<SharedRegistry> {
    match &config.url {
        Some(url) => Ok(Arc::new(RedisRegistry::connect(url, config).await?)),
        None => {
            tracing::info!(root = %config.root_path, "No registry URL configured, using in-memory registry");
            Ok(Arc::new(MemoryRegistry::new(config.root_path.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACTION_UPLOAD;

    fn metadata(uuid: &str, node: &str) -> FileMetadata {
        FileMetadata {
            id: 1,
            uuid: uuid.to_string(),
            filename: format!("{uuid}.bin"),
            size: 512,
            node: node.to_string(),
            path: format!("/data/{node}/{uuid}.bin"),
            history: vec![HistoryEvent::created(ACTION_UPLOAD, node)],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_key() {
        assert_eq!(full_key("/demo/files", "abc"), "/demo/files/abc");
        assert_eq!(full_key("/demo/files/", "abc"), "/demo/files/abc");
    }

    #[tokio::test]
    async fn test_memory_registry_create_or_update() {
        let registry = MemoryRegistry::new("/demo/files");

        registry
            .register_file_metadata("abc", &metadata("abc", "zk1"))
            .await
            .unwrap();
        registry
            .register_file_metadata("abc", &metadata("abc", "zk3"))
            .await
            .unwrap();

        assert_eq!(registry.get("abc").await.unwrap().node, "zk3");

        let listed = registry.list_registered_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "/demo/files/abc");
    }

    #[tokio::test]
    async fn test_create_registry_without_url() {
        let config = RegistryConfig::default();
        let registry = create_registry(&config).await.unwrap();
        assert!(registry.list_registered_files().await.unwrap().is_empty());
    }
}
