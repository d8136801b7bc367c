//! In-memory driver
//!
//! Stores chunks in a map. Upload and download failures can be injected
//! per driver, and an artificial latency can be configured, which is what
//! the end-to-end tests use to simulate slow or dead backends.

use crate::StorageDriver;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stripeio_common::{Error, Result};

const DEFAULT_CAPACITY: u64 = 1024 * 1024 * 1024;

/// Volatile map-backed storage driver with failure injection
pub struct MemoryDriver {
    name: String,
    store: Mutex<HashMap<String, Vec<u8>>>,
    capacity: u64,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    available: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryDriver {
    /// Create a new in-memory driver
    #[must_use]
    pub fn new(name: impl Into<String>, capacity_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            store: Mutex::new(HashMap::new()),
            capacity: capacity_bytes.unwrap_or(DEFAULT_CAPACITY),
            fail_uploads: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
            available: AtomicBool::new(true),
            latency: Mutex::new(None),
        }
    }

    /// Make every subsequent upload fail
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent download fail
    pub fn set_fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Flip the liveness probe result
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Add a fixed delay to every operation
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of chunks currently stored
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether a chunk exists under the given id
    #[must_use]
    pub fn contains(&self, storage_id: &str) -> bool {
        self.store.lock().contains_key(storage_id)
    }

    /// Raw chunk bytes, if stored
    #[must_use]
    pub fn chunk(&self, storage_id: &str) -> Option<Vec<u8>> {
        self.store.lock().get(storage_id).cloned()
    }

    async fn maybe_delay(&self) {
        let latency = *self.latency.lock();
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload_chunk(&self, data: &[u8], storage_id: &str) -> Result<String> {
        self.maybe_delay().await;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(Error::driver_io(&self.name, "injected upload failure"));
        }
        self.store
            .lock()
            .insert(storage_id.to_string(), data.to_vec());
        Ok(storage_id.to_string())
    }

    async fn download_chunk(&self, storage_id: &str) -> Result<Vec<u8>> {
        self.maybe_delay().await;
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(Error::driver_io(&self.name, "injected download failure"));
        }
        self.store
            .lock()
            .get(storage_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("{}:{storage_id}", self.name)))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn get_usage(&self) -> Result<(u64, u64)> {
        let used: u64 = self.store.lock().values().map(|v| v.len() as u64).sum();
        Ok((used, self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let driver = MemoryDriver::new("m0", None);
        driver.upload_chunk(b"abc", "chunk_1").await.unwrap();
        assert_eq!(driver.download_chunk("chunk_1").await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_chunk_is_not_found() {
        let driver = MemoryDriver::new("m0", None);
        let err = driver.download_chunk("absent").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let driver = MemoryDriver::new("m0", None);
        driver.upload_chunk(b"abc", "chunk_1").await.unwrap();

        driver.set_fail_downloads(true);
        assert!(driver.download_chunk("chunk_1").await.unwrap_err().is_io());

        driver.set_fail_downloads(false);
        assert_eq!(driver.download_chunk("chunk_1").await.unwrap(), b"abc");

        driver.set_fail_uploads(true);
        assert!(driver.upload_chunk(b"x", "chunk_2").await.is_err());
        assert!(!driver.contains("chunk_2"));
    }

    #[tokio::test]
    async fn test_usage() {
        let driver = MemoryDriver::new("m0", Some(100));
        driver.upload_chunk(&[0u8; 30], "a").await.unwrap();
        driver.upload_chunk(&[0u8; 10], "b").await.unwrap();
        assert_eq!(driver.get_usage().await.unwrap(), (40, 100));
    }

    #[tokio::test]
    async fn test_overwrite() {
        let driver = MemoryDriver::new("m0", None);
        driver.upload_chunk(b"first", "id").await.unwrap();
        driver.upload_chunk(b"second", "id").await.unwrap();
        assert_eq!(driver.download_chunk("id").await.unwrap(), b"second");
        assert_eq!(driver.chunk_count(), 1);
    }
}
