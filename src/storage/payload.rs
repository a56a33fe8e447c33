//! Physical file payloads
//!
//! Payloads live under `<root>/<node>/<filename>`. Moving a file between
//! nodes is a rename inside the root; when the rename crosses devices the
//! payload is copied and the source removed.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Storage of file payloads, one directory per node
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Location a payload named `filename` would have on `node`
    fn path_for(&self, node: &str, filename: &str) -> PathBuf;

    /// Make sure every node directory exists
    async fn ensure_node_dirs(&self, nodes: &[String]) -> io::Result<()>;

    /// Move a payload from `from` to `to`, creating parent directories
    async fn relocate(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy an external file onto `node`; returns the new path and its size
    async fn import(&self, source: &Path, node: &str, filename: &str) -> io::Result<(PathBuf, u64)>;

    /// Whether a payload exists at `path`
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Delete the payload at `path`
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Payload store on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalPayloadStore {
    root: PathBuf,
}

impl LocalPayloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl PayloadStore for LocalPayloadStore {
    fn path_for(&self, node: &str, filename: &str) -> PathBuf {
        self.root.join(node).join(filename)
    }

    async fn ensure_node_dirs(&self, nodes: &[String]) -> io::Result<()> {
        for node in nodes {
            tokio::fs::create_dir_all(self.root.join(node)).await?;
        }
        Ok(())
    }

    async fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        if !tokio::fs::try_exists(from).await? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("payload not found on disk: {}", from.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
            Err(e) => {
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %e,
                    "Rename failed, falling back to copy"
                );
                tokio::fs::copy(from, to).await?;
                tokio::fs::remove_file(from).await
            }
        }
    }

    async fn import(&self, source: &Path, node: &str, filename: &str) -> io::Result<(PathBuf, u64)> {
        let destination = self.path_for(node, filename);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = tokio::fs::copy(source, &destination).await?;
        Ok((destination, size))
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_relocate_moves_payload() {
        let dir = TempDir::new().unwrap();
        let store = LocalPayloadStore::new(dir.path());
        store
            .ensure_node_dirs(&["zk1".to_string(), "zk2".to_string()])
            .await
            .unwrap();

        let from = store.path_for("zk1", "a.bin");
        tokio::fs::write(&from, b"payload").await.unwrap();
        let to = store.path_for("zk2", "a.bin");

        store.relocate(&from, &to).await.unwrap();

        assert!(!from.exists());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_relocate_missing_source() {
        let dir = TempDir::new().unwrap();
        let store = LocalPayloadStore::new(dir.path());
        let err = store
            .relocate(&store.path_for("zk1", "gone.bin"), &store.path_for("zk2", "gone.bin"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_import_copies_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("upload.txt");
        tokio::fs::write(&source, b"hello").await.unwrap();

        let store = LocalPayloadStore::new(dir.path().join("root"));
        let (path, size) = store.import(&source, "zk3", "u1_upload.txt").await.unwrap();

        assert_eq!(size, 5);
        assert_eq!(path, dir.path().join("root").join("zk3").join("u1_upload.txt"));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_exists_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = LocalPayloadStore::new(dir.path());
        store.ensure_node_dirs(&["zk1".to_string()]).await.unwrap();
        let path = store.path_for("zk1", "b.bin");

        assert!(!store.exists(&path).await.unwrap());
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(store.exists(&path).await.unwrap());

        store.remove(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        assert_eq!(store.remove(&path).await.unwrap_err().kind(), io::ErrorKind::NotFound);
    }
}
