//! Core type definitions for stripeio
//!
//! This module defines the fundamental types used throughout the system:
//! file identifiers, RAID levels, block roles, and the durable metadata
//! record structures.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a logical file
///
/// Opaque, globally unique, and content-independent. Minted from the file
/// name, a high-resolution timestamp, and a random suffix so that sustained
/// concurrent writes can never collide.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Mint a fresh file id for the given file name
    #[must_use]
    pub fn generate(file_name: &str) -> Self {
        let sanitized: String = file_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .take(48)
            .collect();
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{sanitized}_{nanos}_{}", &suffix[..8]))
    }

    /// Wrap an existing identifier without validation
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RAID level
///
/// A closed set; every consumer matches exhaustively so that adding a level
/// forces updates in the engine, scheduler, and catalog alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RaidLevel {
    /// Striping, no redundancy
    Zero,
    /// Mirroring
    One,
    /// Striping with rotating distributed parity
    Five,
    /// Striping over mirror pairs
    Ten,
}

impl RaidLevel {
    /// Numeric wire code (0, 1, 5, 10)
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Five => 5,
            Self::Ten => 10,
        }
    }

    /// Parse a numeric wire code
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            5 => Ok(Self::Five),
            10 => Ok(Self::Ten),
            other => Err(Error::config(format!("unsupported RAID level: {other}"))),
        }
    }

    /// Minimum number of drivers this level can operate on
    #[must_use]
    pub const fn min_drivers(self) -> usize {
        match self {
            Self::Zero | Self::One => 2,
            Self::Five => 3,
            Self::Ten => 4,
        }
    }

    /// Validate a driver count against this level
    pub fn validate_driver_count(self, count: usize) -> Result<()> {
        if count < self.min_drivers() {
            return Err(Error::config(format!(
                "{self} requires at least {} drivers, have {count}",
                self.min_drivers()
            )));
        }
        if self == Self::Ten && count % 2 != 0 {
            return Err(Error::config(format!(
                "{self} requires an even driver count, have {count}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RAID {}", self.code())
    }
}

impl Serialize for RaidLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for RaidLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// Role of a block within a stripe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRole {
    /// Carries a slice of the original payload
    Data,
    /// XOR parity over the stripe's data blocks
    Parity,
    /// Full copy of a payload slice held by a mirror sibling
    Mirror,
}

impl BlockRole {
    /// Whether this role is recorded as parity in the durable record
    #[must_use]
    pub const fn is_parity(self) -> bool {
        matches!(self, Self::Parity)
    }
}

/// Health state of a driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    #[default]
    Healthy,
    Degraded,
    Failed,
}

/// Health record for a single driver
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverHealth {
    pub name: String,
    pub state: DriverState,
    pub last_check: DateTime<Utc>,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// Durable placement record for one block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Position within the stripe, dense from 0
    pub strip_index: usize,
    /// Driver that owns the block
    pub driver_name: String,
    /// Identifier by which the driver knows the block
    pub storage_id: String,
    /// Original byte length of the block payload
    pub strip_size: u64,
    pub is_parity: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Durable placement record for one stripe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StripeMetadata {
    pub stripe_index: usize,
    pub strips: Vec<BlockMetadata>,
    /// Parity position marker, set once and never changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parity_strip: Option<BlockMetadata>,
}

impl StripeMetadata {
    /// Create an empty stripe entry at the given index
    #[must_use]
    pub fn empty(stripe_index: usize) -> Self {
        Self {
            stripe_index,
            strips: Vec::new(),
            parity_strip: None,
        }
    }

    /// Number of blocks recorded for this stripe
    #[must_use]
    pub fn width(&self) -> usize {
        self.strips.len()
    }

    /// The parity block position, if one is recorded
    #[must_use]
    pub fn parity_index(&self) -> Option<usize> {
        self.strips
            .iter()
            .find(|b| b.is_parity)
            .map(|b| b.strip_index)
            .or_else(|| self.parity_strip.as_ref().map(|b| b.strip_index))
    }
}

/// Durable metadata record for one logical file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: FileId,
    pub file_name: String,
    pub file_size: u64,
    pub raid_level: RaidLevel,
    pub stripe_size: u64,
    pub stripe_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whole-file content hash (sha256, hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub stripes: Vec<StripeMetadata>,
    /// Driver health as observed at write time
    #[serde(default)]
    pub driver_map: HashMap<String, DriverHealth>,
}

impl FileMetadata {
    /// Create a fresh record with no stripes yet
    #[must_use]
    pub fn new(
        file_id: FileId,
        file_name: impl Into<String>,
        file_size: u64,
        raid_level: RaidLevel,
        stripe_size: u64,
        stripe_count: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            file_id,
            file_name: file_name.into(),
            file_size,
            raid_level,
            stripe_size,
            stripe_count,
            created_at: now,
            updated_at: now,
            hash: None,
            stripes: Vec::new(),
            driver_map: HashMap::new(),
        }
    }

    /// Byte length of the payload carried by the given stripe
    ///
    /// The final stripe may be shorter than `stripe_size`.
    #[must_use]
    pub fn stripe_payload_len(&self, stripe_index: usize) -> u64 {
        let start = stripe_index as u64 * self.stripe_size;
        if start >= self.file_size {
            return 0;
        }
        (self.file_size - start).min(self.stripe_size)
    }

    /// Structural validation of the record
    ///
    /// Checks index density, parity placement, and placement uniqueness.
    /// Stripe entries with no blocks yet are tolerated (records are
    /// populated incrementally during a write).
    pub fn validate(&self) -> Result<()> {
        if self.stripes.len() > self.stripe_count {
            return Err(Error::corrupt(format!(
                "{}: {} stripes recorded, {} expected",
                self.file_id,
                self.stripes.len(),
                self.stripe_count
            )));
        }

        let mut seen = HashSet::new();
        for (i, stripe) in self.stripes.iter().enumerate() {
            if stripe.stripe_index != i {
                return Err(Error::corrupt(format!(
                    "{}: stripe at position {i} has index {}",
                    self.file_id, stripe.stripe_index
                )));
            }

            let mut parity_count = 0usize;
            for (j, block) in stripe.strips.iter().enumerate() {
                if block.strip_index != j {
                    return Err(Error::corrupt(format!(
                        "{}: stripe {i} block at position {j} has index {}",
                        self.file_id, block.strip_index
                    )));
                }
                if block.is_parity {
                    parity_count += 1;
                }
                if !seen.insert((block.driver_name.clone(), block.storage_id.clone())) {
                    return Err(Error::corrupt(format!(
                        "{}: duplicate placement {}:{}",
                        self.file_id, block.driver_name, block.storage_id
                    )));
                }
            }

            if stripe.strips.is_empty() {
                continue;
            }

            match self.raid_level {
                RaidLevel::Five => {
                    if parity_count != 1 {
                        return Err(Error::corrupt(format!(
                            "{}: stripe {i} has {parity_count} parity blocks, want 1",
                            self.file_id
                        )));
                    }
                    let width = stripe.strips.len();
                    let expected = i % width;
                    if stripe.parity_index() != Some(expected) {
                        return Err(Error::corrupt(format!(
                            "{}: stripe {i} parity at {:?}, want {expected}",
                            self.file_id,
                            stripe.parity_index()
                        )));
                    }
                }
                RaidLevel::Zero | RaidLevel::One | RaidLevel::Ten => {
                    if parity_count != 0 {
                        return Err(Error::corrupt(format!(
                            "{}: stripe {i} has parity blocks under {}",
                            self.file_id, self.raid_level
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
