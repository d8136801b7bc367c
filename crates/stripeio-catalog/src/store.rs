//! Directory-backed metadata catalog
//!
//! One JSON record per file under the base directory. Saves are atomic
//! per file: the record is written to a temp sibling and renamed into
//! place. A reader-writer lock guards both the cache and the health
//! table; the durable write happens while holding the writer side, which
//! is acceptable because metadata writes are small and rare next to
//! block I/O.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use stripeio_common::{
    DriverHealth, DriverState, Error, FileId, FileMetadata, Result, StripeMetadata,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

struct CatalogState {
    files: HashMap<FileId, FileMetadata>,
    driver_health: HashMap<String, DriverHealth>,
}

/// Durable, crash-safe map from file id to placement metadata
pub struct MetadataCatalog {
    base_dir: PathBuf,
    state: RwLock<CatalogState>,
}

impl MetadataCatalog {
    /// Open (or create) a catalog rooted at `base_dir`.
    ///
    /// Scans the directory and hydrates the cache. Records that fail to
    /// parse or validate are logged and skipped; they never abort startup.
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await?;

        let mut files = HashMap::new();
        let mut entries = tokio::fs::read_dir(&base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_record(&path).await {
                Ok(meta) => {
                    files.insert(meta.file_id.clone(), meta);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable record");
                }
            }
        }
        info!(dir = %base_dir.display(), files = files.len(), "catalog opened");

        Ok(Self {
            base_dir,
            state: RwLock::new(CatalogState {
                files,
                driver_health: HashMap::new(),
            }),
        })
    }

    fn record_path(&self, file_id: &FileId) -> PathBuf {
        self.base_dir.join(format!("{file_id}.json"))
    }

    async fn load_record(path: &Path) -> Result<FileMetadata> {
        let raw = tokio::fs::read(path).await?;
        let meta: FileMetadata = serde_json::from_slice(&raw)
            .map_err(|e| Error::corrupt(format!("{}: {e}", path.display())))?;
        meta.validate()?;
        Ok(meta)
    }

    async fn persist(&self, meta: &FileMetadata) -> Result<()> {
        let path = self.record_path(&meta.file_id);
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_vec_pretty(meta)
            .map_err(|e| Error::internal(format!("encode {}: {e}", meta.file_id)))?;
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(file_id = %meta.file_id, bytes = raw.len(), "record persisted");
        Ok(())
    }

    /// Persist a record and refresh the cache.
    ///
    /// `updated_at` is stamped here; the write is atomic per file.
    pub async fn save(&self, mut meta: FileMetadata) -> Result<()> {
        meta.validate()?;
        meta.updated_at = Utc::now();

        let mut state = self.state.write().await;
        self.persist(&meta).await?;
        state.files.insert(meta.file_id.clone(), meta);
        Ok(())
    }

    /// Fetch a consistent snapshot of a record.
    ///
    /// Cache first; on miss the record is loaded from disk, validated,
    /// and cached.
    pub async fn get(&self, file_id: &FileId) -> Result<FileMetadata> {
        {
            let state = self.state.read().await;
            if let Some(meta) = state.files.get(file_id) {
                return Ok(meta.clone());
            }
        }

        let path = self.record_path(file_id);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::not_found(format!("file {file_id}")));
        }
        let meta = Self::load_record(&path).await?;

        let mut state = self.state.write().await;
        state.files.insert(file_id.clone(), meta.clone());
        Ok(meta)
    }

    /// Whether the catalog knows the given file id
    pub async fn contains(&self, file_id: &FileId) -> bool {
        if self.state.read().await.files.contains_key(file_id) {
            return true;
        }
        tokio::fs::try_exists(self.record_path(file_id))
            .await
            .unwrap_or(false)
    }

    /// All known file ids, in no particular order
    pub async fn file_ids(&self) -> Vec<FileId> {
        self.state.read().await.files.keys().cloned().collect()
    }

    /// Upsert a driver health row
    pub async fn update_driver_health(
        &self,
        name: &str,
        state: DriverState,
        used_bytes: u64,
        total_bytes: u64,
    ) {
        let mut guard = self.state.write().await;
        guard.driver_health.insert(
            name.to_string(),
            DriverHealth {
                name: name.to_string(),
                state,
                last_check: Utc::now(),
                used_bytes,
                total_bytes,
            },
        );
    }

    /// Health row for one driver, if probed yet
    pub async fn driver_health(&self, name: &str) -> Option<DriverHealth> {
        self.state.read().await.driver_health.get(name).cloned()
    }

    /// Names of drivers whose state is anything but healthy
    pub async fn unhealthy_drivers(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .driver_health
            .values()
            .filter(|h| h.state != DriverState::Healthy)
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Record the parity position for one stripe of a file.
    ///
    /// Idempotent: the stripe list grows densely up to `stripe_index`, and
    /// the parity marker is set only if unset. The updated record is
    /// persisted.
    pub async fn record_parity_placement(
        &self,
        file_id: &FileId,
        stripe_index: usize,
        parity_block_index: usize,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.files.contains_key(file_id) {
            let path = self.record_path(file_id);
            if !tokio::fs::try_exists(&path).await? {
                return Err(Error::not_found(format!("file {file_id}")));
            }
            let meta = Self::load_record(&path).await?;
            state.files.insert(file_id.clone(), meta);
        }

        let meta = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| Error::internal("record vanished under write lock"))?;

        while meta.stripes.len() <= stripe_index {
            let next = meta.stripes.len();
            meta.stripes.push(StripeMetadata::empty(next));
        }

        let stripe = &mut meta.stripes[stripe_index];
        if stripe.parity_strip.is_none() {
            let marker = stripe
                .strips
                .iter()
                .find(|b| b.strip_index == parity_block_index && b.is_parity)
                .cloned()
                .unwrap_or_else(|| stripeio_common::BlockMetadata {
                    strip_index: parity_block_index,
                    driver_name: String::new(),
                    storage_id: String::new(),
                    strip_size: 0,
                    is_parity: true,
                    checksum: None,
                    created_at: Utc::now(),
                });
            stripe.parity_strip = Some(marker);
        }

        meta.updated_at = Utc::now();
        let snapshot = meta.clone();
        self.persist(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stripeio_common::{BlockMetadata, RaidLevel};
    use tempfile::tempdir;

    fn sample_meta(id: &str) -> FileMetadata {
        let mut meta = FileMetadata::new(
            FileId::new_unchecked(id),
            "sample.bin",
            8,
            RaidLevel::Zero,
            8,
            1,
        );
        meta.stripes.push(StripeMetadata {
            stripe_index: 0,
            strips: vec![
                BlockMetadata {
                    strip_index: 0,
                    driver_name: "d0".into(),
                    storage_id: format!("{id}_s0_st0"),
                    strip_size: 4,
                    is_parity: false,
                    checksum: None,
                    created_at: Utc::now(),
                },
                BlockMetadata {
                    strip_index: 1,
                    driver_name: "d1".into(),
                    storage_id: format!("{id}_s0_st1"),
                    strip_size: 4,
                    is_parity: false,
                    checksum: None,
                    created_at: Utc::now(),
                },
            ],
            parity_strip: None,
        });
        meta
    }

    #[tokio::test]
    async fn test_save_get_round_trip() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();

        let meta = sample_meta("file_a");
        catalog.save(meta.clone()).await.unwrap();

        let loaded = catalog.get(&meta.file_id).await.unwrap();
        assert_eq!(loaded.file_name, "sample.bin");
        assert_eq!(loaded.stripes, meta.stripes);
        assert!(dir.path().join("file_a.json").exists());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();
        let err = catalog
            .get(&FileId::new_unchecked("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_idempotent_save() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();

        let meta = sample_meta("file_a");
        catalog.save(meta.clone()).await.unwrap();
        let first = catalog.get(&meta.file_id).await.unwrap();

        catalog.save(first.clone()).await.unwrap();
        let second = catalog.get(&meta.file_id).await.unwrap();

        // Only the update stamp may move.
        assert_eq!(first.file_id, second.file_id);
        assert_eq!(first.file_size, second.file_size);
        assert_eq!(first.stripes, second.stripes);
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_reopen_hydrates_cache() {
        let dir = tempdir().unwrap();
        {
            let catalog = MetadataCatalog::open(dir.path()).await.unwrap();
            catalog.save(sample_meta("file_a")).await.unwrap();
            catalog.save(sample_meta("file_b")).await.unwrap();
        }

        let reopened = MetadataCatalog::open(dir.path()).await.unwrap();
        let mut ids = reopened.file_ids().await;
        ids.sort();
        assert_eq!(
            ids,
            vec![
                FileId::new_unchecked("file_a"),
                FileId::new_unchecked("file_b")
            ]
        );
    }

    #[tokio::test]
    async fn test_startup_skips_broken_records() {
        let dir = tempdir().unwrap();
        {
            let catalog = MetadataCatalog::open(dir.path()).await.unwrap();
            catalog.save(sample_meta("file_a")).await.unwrap();
        }
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();

        let reopened = MetadataCatalog::open(dir.path()).await.unwrap();
        assert_eq!(reopened.file_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn test_get_corrupt_record() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();

        // Record whose block indices have a gap.
        let mut meta = sample_meta("file_bad");
        meta.stripes[0].strips[1].strip_index = 5;
        let raw = serde_json::to_vec(&meta).unwrap();
        std::fs::write(dir.path().join("file_bad.json"), raw).unwrap();

        let err = catalog
            .get(&FileId::new_unchecked("file_bad"))
            .await
            .unwrap_err();
        assert!(err.is_corrupt());
    }

    #[tokio::test]
    async fn test_driver_health_table() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();

        catalog
            .update_driver_health("d0", DriverState::Healthy, 10, 100)
            .await;
        catalog
            .update_driver_health("d1", DriverState::Degraded, 50, 100)
            .await;
        catalog
            .update_driver_health("d2", DriverState::Failed, 0, 100)
            .await;

        assert_eq!(catalog.unhealthy_drivers().await, vec!["d1", "d2"]);

        catalog
            .update_driver_health("d1", DriverState::Healthy, 50, 100)
            .await;
        assert_eq!(catalog.unhealthy_drivers().await, vec!["d2"]);
    }

    #[tokio::test]
    async fn test_record_parity_placement() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();

        let mut meta = sample_meta("file_p");
        meta.raid_level = RaidLevel::Five;
        meta.stripe_count = 3;
        meta.stripes.clear();
        catalog.save(meta.clone()).await.unwrap();

        catalog
            .record_parity_placement(&meta.file_id, 2, 2)
            .await
            .unwrap();

        let loaded = catalog.get(&meta.file_id).await.unwrap();
        assert_eq!(loaded.stripes.len(), 3);
        assert_eq!(loaded.stripes[0].stripe_index, 0);
        assert_eq!(loaded.stripes[1].stripe_index, 1);
        assert_eq!(
            loaded.stripes[2].parity_strip.as_ref().unwrap().strip_index,
            2
        );

        // Second call with a different position must not overwrite.
        catalog
            .record_parity_placement(&meta.file_id, 2, 0)
            .await
            .unwrap();
        let loaded = catalog.get(&meta.file_id).await.unwrap();
        assert_eq!(
            loaded.stripes[2].parity_strip.as_ref().unwrap().strip_index,
            2
        );
    }

    #[tokio::test]
    async fn test_record_parity_placement_unknown_file() {
        let dir = tempdir().unwrap();
        let catalog = MetadataCatalog::open(dir.path()).await.unwrap();
        let err = catalog
            .record_parity_placement(&FileId::new_unchecked("ghost"), 0, 0)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
