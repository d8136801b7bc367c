//! RAID engine
//!
//! Write path: stripe loop, scheduler-driven driver selection, parallel
//! block puts, per-level success rule, single durable metadata save at
//! completion. Read path: catalog lookup, parallel block gets, per-level
//! reconstruction, final trim against the recorded file length.

use crate::layout::{self, BlockPlan};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stripeio_catalog::MetadataCatalog;
use stripeio_common::checksum::{crc32c_hex, sha256_hex, verify_crc32c};
use stripeio_common::{
    BlockMetadata, EngineConfig, Error, FileId, FileMetadata, RaidLevel, Result, StripeMetadata,
};
use stripeio_driver::DriverRegistry;
use stripeio_scheduler::RaidScheduler;
use tracing::{debug, info, warn};

/// Outcome of one block put attempt
struct BlockOutcome {
    plan: BlockPlan,
    result: Result<()>,
}

/// How a stripe's payload was obtained on read
enum StripeRead {
    /// Every needed block downloaded cleanly
    Plain(Vec<u8>),
    /// At least one block was rebuilt from redundancy
    Recovered(Vec<u8>),
}

impl StripeRead {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Plain(b) | Self::Recovered(b) => b,
        }
    }
}

/// RAID controller over a fixed driver registry
pub struct RaidEngine {
    level: RaidLevel,
    registry: Arc<DriverRegistry>,
    scheduler: Arc<RaidScheduler>,
    catalog: Arc<MetadataCatalog>,
    stripe_size: u64,
    max_concurrent: usize,
    block_timeout: Option<Duration>,
}

impl std::fmt::Debug for RaidEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidEngine")
            .field("level", &self.level)
            .field("stripe_size", &self.stripe_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("block_timeout", &self.block_timeout)
            .finish()
    }
}

impl RaidEngine {
    /// Create an engine for one RAID level.
    ///
    /// Fails when the registry cannot support the level (too few drivers,
    /// odd count for RAID 10) or the stripe size is zero.
    pub fn new(
        level: RaidLevel,
        registry: Arc<DriverRegistry>,
        scheduler: Arc<RaidScheduler>,
        catalog: Arc<MetadataCatalog>,
        config: &EngineConfig,
    ) -> Result<Self> {
        level.validate_driver_count(registry.len())?;
        if config.stripe_size == 0 {
            return Err(Error::config("stripe_size must be non-zero"));
        }
        Ok(Self {
            level,
            registry,
            scheduler,
            catalog,
            stripe_size: config.stripe_size,
            max_concurrent: config.max_concurrent_blocks.max(1),
            block_timeout: config.block_timeout_secs.map(Duration::from_secs),
        })
    }

    /// The level this engine lays data out with
    #[must_use]
    pub fn level(&self) -> RaidLevel {
        self.level
    }

    /// Store a logical byte sequence and return its freshly minted id.
    ///
    /// All-or-nothing at the file level: a stripe that misses its success
    /// rule fails the whole write, and any blocks already written are
    /// intentionally left behind.
    pub async fn write(&self, file_name: &str, data: &[u8]) -> Result<FileId> {
        let file_id = FileId::generate(file_name);
        let stripe_count = (data.len() as u64).div_ceil(self.stripe_size) as usize;

        let mut meta = FileMetadata::new(
            file_id.clone(),
            file_name,
            data.len() as u64,
            self.level,
            self.stripe_size,
            stripe_count,
        );
        meta.hash = Some(sha256_hex(data));

        let exclude = self.catalog.unhealthy_drivers().await;

        for stripe_index in 0..stripe_count {
            let start = stripe_index as u64 * self.stripe_size;
            let end = (start + self.stripe_size).min(data.len() as u64);
            let payload = &data[start as usize..end as usize];

            let selection =
                self.scheduler
                    .select_for_stripe(self.level, stripe_index, &exclude)?;
            let plans =
                layout::plan_stripe(self.level, &file_id, stripe_index, payload, &selection)?;
            debug!(
                file_id = %file_id,
                stripe = stripe_index,
                blocks = plans.len(),
                "dispatching stripe"
            );

            let outcomes = self.put_blocks(plans).await;
            let stripe_meta = self.commit_stripe(stripe_index, outcomes)?;
            meta.stripes.push(stripe_meta);
        }

        for name in self.registry.names() {
            if let Some(health) = self.catalog.driver_health(&name).await {
                meta.driver_map.insert(name, health);
            }
        }

        self.catalog.save(meta).await?;
        info!(
            file_id = %file_id,
            level = %self.level,
            bytes = data.len(),
            stripes = stripe_count,
            "file written"
        );
        Ok(file_id)
    }

    /// Reassemble a file's original bytes from its recorded placement
    pub async fn read(&self, file_id: &FileId) -> Result<Vec<u8>> {
        let meta = self.catalog.get(file_id).await?;
        if meta.stripes.len() != meta.stripe_count {
            return Err(Error::corrupt(format!(
                "{file_id}: {} of {} stripes recorded",
                meta.stripes.len(),
                meta.stripe_count
            )));
        }

        let mut out = Vec::with_capacity(meta.file_size as usize);
        for stripe in &meta.stripes {
            let slots = self.fetch_blocks(stripe).await;
            let payload = self.reconstruct_stripe(&meta, stripe, slots)?;
            if matches!(payload, StripeRead::Recovered(_)) {
                info!(
                    file_id = %file_id,
                    stripe = stripe.stripe_index,
                    "stripe recovered from redundancy"
                );
            }
            out.extend_from_slice(&payload.into_bytes());
        }

        if out.len() as u64 > meta.file_size {
            out.truncate(meta.file_size as usize);
        }
        if (out.len() as u64) < meta.file_size {
            return Err(Error::corrupt(format!(
                "{file_id}: reassembled {} of {} bytes",
                out.len(),
                meta.file_size
            )));
        }
        if let Some(expected) = &meta.hash {
            if sha256_hex(&out) != *expected {
                return Err(Error::corrupt(format!(
                    "{file_id}: content hash mismatch"
                )));
            }
        }
        Ok(out)
    }

    /// Fan out the puts for one stripe and collect every outcome
    async fn put_blocks(&self, plans: Vec<BlockPlan>) -> Vec<BlockOutcome> {
        stream::iter(plans)
            .map(|plan| self.put_block(plan))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await
    }

    async fn put_block(&self, plan: BlockPlan) -> BlockOutcome {
        let Some(driver) = self.registry.get(&plan.driver_name) else {
            return BlockOutcome {
                result: Err(Error::internal(format!(
                    "selected driver {} not registered",
                    plan.driver_name
                ))),
                plan,
            };
        };

        let started = Instant::now();
        let upload = driver.upload_chunk(&plan.payload, &plan.storage_id);
        let result = match self.block_timeout {
            Some(limit) => match tokio::time::timeout(limit, upload).await {
                Ok(r) => r.map(|_| ()),
                Err(_) => Err(Error::cancelled(format!(
                    "upload {} exceeded {limit:?}",
                    plan.storage_id
                ))),
            },
            None => upload.await.map(|_| ()),
        };
        let latency = started.elapsed();
        self.scheduler
            .record_operation(&plan.driver_name, result.is_ok(), latency);

        if let Err(e) = &result {
            warn!(
                driver = %plan.driver_name,
                storage_id = %plan.storage_id,
                error = %e,
                "block put failed"
            );
        }
        BlockOutcome { plan, result }
    }

    /// Evaluate the per-level success rule and build the stripe record.
    ///
    /// The full intended layout is recorded, tolerated failures included:
    /// a block whose put failed simply will not download later and takes
    /// the normal reconstruction path.
    fn commit_stripe(
        &self,
        stripe_index: usize,
        mut outcomes: Vec<BlockOutcome>,
    ) -> Result<StripeMetadata> {
        outcomes.sort_by_key(|o| o.plan.strip_index);
        let total = outcomes.len();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();

        let committed = match self.level {
            RaidLevel::Zero => failed == 0,
            RaidLevel::One => failed < total,
            RaidLevel::Five => failed <= 1,
            RaidLevel::Ten => outcomes
                .chunks(2)
                .all(|pair| pair.iter().any(|o| o.result.is_ok())),
        };
        if !committed {
            return Err(Error::StripeWrite {
                stripe_index,
                failed,
                total,
            });
        }
        debug!(stripe = stripe_index, failed, total, "stripe committed");

        let now = Utc::now();
        let strips: Vec<BlockMetadata> = outcomes
            .iter()
            .map(|o| BlockMetadata {
                strip_index: o.plan.strip_index,
                driver_name: o.plan.driver_name.clone(),
                storage_id: o.plan.storage_id.clone(),
                strip_size: o.plan.payload.len() as u64,
                is_parity: o.plan.role.is_parity(),
                checksum: Some(crc32c_hex(&o.plan.payload)),
                created_at: now,
            })
            .collect();
        let parity_strip = strips.iter().find(|b| b.is_parity).cloned();

        Ok(StripeMetadata {
            stripe_index,
            strips,
            parity_strip,
        })
    }

    /// Fan out the gets for one stripe; slot `i` holds block `i`'s bytes
    /// or `None` when the block is unavailable or fails verification
    async fn fetch_blocks(&self, stripe: &StripeMetadata) -> Vec<Option<Vec<u8>>> {
        let width = stripe.strips.len();
        let fetched: Vec<(usize, Option<Vec<u8>>)> = stream::iter(stripe.strips.iter())
            .map(|block| self.fetch_block(block))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; width];
        for (index, data) in fetched {
            slots[index] = data;
        }
        slots
    }

    async fn fetch_block(&self, block: &BlockMetadata) -> (usize, Option<Vec<u8>>) {
        let Some(driver) = self.registry.get(&block.driver_name) else {
            warn!(driver = %block.driver_name, "recorded driver not registered");
            return (block.strip_index, None);
        };

        let started = Instant::now();
        let download = driver.download_chunk(&block.storage_id);
        let result = match self.block_timeout {
            Some(limit) => match tokio::time::timeout(limit, download).await {
                Ok(r) => r,
                Err(_) => Err(Error::cancelled(format!(
                    "download {} exceeded {limit:?}",
                    block.storage_id
                ))),
            },
            None => download.await,
        };
        let latency = started.elapsed();
        self.scheduler
            .record_operation(&block.driver_name, result.is_ok(), latency);

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    driver = %block.driver_name,
                    storage_id = %block.storage_id,
                    error = %e,
                    "block get failed"
                );
                return (block.strip_index, None);
            }
        };

        if data.len() as u64 != block.strip_size {
            warn!(
                storage_id = %block.storage_id,
                got = data.len(),
                want = block.strip_size,
                "block length mismatch"
            );
            return (block.strip_index, None);
        }
        if let Some(expected) = &block.checksum {
            if !verify_crc32c(&data, expected) {
                warn!(storage_id = %block.storage_id, "block checksum mismatch");
                return (block.strip_index, None);
            }
        }
        (block.strip_index, Some(data))
    }

    /// Rebuild one stripe's payload from whatever blocks survived
    fn reconstruct_stripe(
        &self,
        meta: &FileMetadata,
        stripe: &StripeMetadata,
        slots: Vec<Option<Vec<u8>>>,
    ) -> Result<StripeRead> {
        let stripe_index = stripe.stripe_index;
        let total = slots.len();
        let missing = slots.iter().filter(|s| s.is_none()).count();
        if total == 0 {
            return Err(Error::corrupt(format!(
                "stripe {stripe_index} has no recorded blocks"
            )));
        }

        match meta.raid_level {
            RaidLevel::Zero => {
                if missing > 0 {
                    return Err(Error::Unrecoverable {
                        stripe_index,
                        missing,
                        total,
                    });
                }
                let mut payload = Vec::new();
                for slot in slots {
                    payload.extend_from_slice(&slot.unwrap_or_default());
                }
                Ok(StripeRead::Plain(payload))
            }
            RaidLevel::One => match slots.into_iter().flatten().next() {
                Some(payload) if missing == 0 => Ok(StripeRead::Plain(payload)),
                Some(payload) => Ok(StripeRead::Recovered(payload)),
                None => Err(Error::Unrecoverable {
                    stripe_index,
                    missing,
                    total,
                }),
            },
            RaidLevel::Five => {
                self.reconstruct_raid5(stripe, slots, stripe_index, missing, total)
            }
            RaidLevel::Ten => {
                if total % 2 != 0 {
                    return Err(Error::corrupt(format!(
                        "stripe {stripe_index} has odd width {total} under {}",
                        meta.raid_level
                    )));
                }
                let mut payload = Vec::new();
                let mut fell_back = false;
                for (pair_index, pair) in slots.chunks(2).enumerate() {
                    let chunk = match (&pair[0], &pair[1]) {
                        (Some(a), _) => a,
                        (None, Some(b)) => {
                            fell_back = true;
                            b
                        }
                        (None, None) => {
                            warn!(stripe = stripe_index, pair = pair_index, "mirror pair lost");
                            return Err(Error::Unrecoverable {
                                stripe_index,
                                missing,
                                total,
                            });
                        }
                    };
                    payload.extend_from_slice(chunk);
                }
                if fell_back {
                    Ok(StripeRead::Recovered(payload))
                } else {
                    Ok(StripeRead::Plain(payload))
                }
            }
        }
    }

    fn reconstruct_raid5(
        &self,
        stripe: &StripeMetadata,
        mut slots: Vec<Option<Vec<u8>>>,
        stripe_index: usize,
        missing: usize,
        total: usize,
    ) -> Result<StripeRead> {
        let parity_index = stripe
            .parity_index()
            .ok_or_else(|| Error::corrupt(format!("stripe {stripe_index} records no parity")))?;

        let missing_data: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(i, slot)| *i != parity_index && slot.is_none())
            .map(|(i, _)| i)
            .collect();

        match missing_data.len() {
            0 => {
                // Parity itself may be absent; data alone reassembles.
                let mut payload = Vec::new();
                for (i, slot) in slots.iter().enumerate() {
                    if i == parity_index {
                        continue;
                    }
                    payload.extend_from_slice(slot.as_deref().unwrap_or_default());
                }
                if missing == 0 {
                    Ok(StripeRead::Plain(payload))
                } else {
                    Ok(StripeRead::Recovered(payload))
                }
            }
            1 => {
                let lost = missing_data[0];
                let Some(parity) = slots[parity_index].clone() else {
                    return Err(Error::Unrecoverable {
                        stripe_index,
                        missing,
                        total,
                    });
                };

                let mut recovered = parity;
                for (i, slot) in slots.iter().enumerate() {
                    if i == parity_index || i == lost {
                        continue;
                    }
                    if let Some(chunk) = slot {
                        layout::xor_into(&mut recovered, chunk);
                    }
                }
                recovered.truncate(stripe.strips[lost].strip_size as usize);
                debug!(
                    stripe = stripe_index,
                    block = lost,
                    bytes = recovered.len(),
                    "data block rebuilt from parity"
                );
                slots[lost] = Some(recovered);

                let mut payload = Vec::new();
                for (i, slot) in slots.iter().enumerate() {
                    if i == parity_index {
                        continue;
                    }
                    payload.extend_from_slice(slot.as_deref().unwrap_or_default());
                }
                Ok(StripeRead::Recovered(payload))
            }
            _ => Err(Error::Unrecoverable {
                stripe_index,
                missing,
                total,
            }),
        }
    }
}
