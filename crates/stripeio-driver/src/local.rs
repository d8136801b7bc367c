//! Local filesystem driver
//!
//! One file per chunk under a root directory. Storage ids produced by the
//! engine contain only word characters, so they map directly to file names.

use crate::StorageDriver;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use stripeio_common::{Error, Result};
use tracing::debug;

const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024 * 1024;

/// Chunk-per-file storage driver rooted at a local directory
pub struct LocalDiskDriver {
    name: String,
    root: PathBuf,
    capacity: u64,
    used: AtomicU64,
}

impl LocalDiskDriver {
    /// Create a driver rooted at `root`; the directory is created on
    /// [`connect`](StorageDriver::connect)
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, capacity_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            root: root.as_ref().to_path_buf(),
            capacity: capacity_bytes.unwrap_or(DEFAULT_CAPACITY),
            used: AtomicU64::new(0),
        }
    }

    fn chunk_path(&self, storage_id: &str) -> Result<PathBuf> {
        if storage_id.is_empty()
            || storage_id.chars().all(|c| c == '.')
            || !storage_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(Error::driver_io(
                &self.name,
                format!("invalid storage id: {storage_id:?}"),
            ));
        }
        Ok(self.root.join(storage_id))
    }

    async fn scan_used(&self) -> Result<u64> {
        let mut used = 0u64;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            used += entry.metadata().await?.len();
        }
        Ok(used)
    }
}

#[async_trait]
impl StorageDriver for LocalDiskDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload_chunk(&self, data: &[u8], storage_id: &str) -> Result<String> {
        let path = self.chunk_path(storage_id)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::driver_io(&self.name, format!("write {storage_id}: {e}")))?;
        self.used.fetch_add(data.len() as u64, Ordering::Relaxed);
        debug!(driver = %self.name, storage_id, bytes = data.len(), "chunk stored");
        Ok(storage_id.to_string())
    }

    async fn download_chunk(&self, storage_id: &str) -> Result<Vec<u8>> {
        let path = self.chunk_path(storage_id)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found(format!("{}:{storage_id}", self.name)))
            }
            Err(e) => Err(Error::driver_io(
                &self.name,
                format!("read {storage_id}: {e}"),
            )),
        }
    }

    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn get_usage(&self) -> Result<(u64, u64)> {
        let used = self.scan_used().await?;
        self.used.store(used, Ordering::Relaxed);
        Ok((used, self.capacity))
    }

    async fn connect(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}
