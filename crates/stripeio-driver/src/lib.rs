//! Stripeio Driver - Backend storage contract and adapters
//!
//! Every backend exposes the same small surface: store a chunk under a
//! caller-chosen identifier, fetch it back, answer a cheap liveness probe,
//! and report usage. Implementations must be internally synchronized;
//! concurrent calls with distinct storage ids are always safe.

pub mod local;
pub mod memory;
pub mod registry;

use async_trait::async_trait;
use stripeio_common::Result;

pub use local::LocalDiskDriver;
pub use memory::MemoryDriver;
pub use registry::DriverRegistry;

/// Uniform block put/get/probe over any backend
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Name this driver is registered under
    fn name(&self) -> &str;

    /// Store `data` under `storage_id`, overwriting any previous content.
    /// Returns the handle the chunk is retrievable by (normally the id
    /// passed in).
    async fn upload_chunk(&self, data: &[u8], storage_id: &str) -> Result<String>;

    /// Return exactly the bytes previously uploaded under `storage_id`
    async fn download_chunk(&self, storage_id: &str) -> Result<Vec<u8>>;

    /// Cheap liveness probe
    async fn is_available(&self) -> bool;

    /// Used and total capacity in bytes
    async fn get_usage(&self) -> Result<(u64, u64)>;

    /// One-shot initialization; defaults to a no-op
    async fn connect(&self) -> Result<()> {
        Ok(())
    }
}
