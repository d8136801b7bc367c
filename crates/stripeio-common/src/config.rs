//! Configuration types for stripeio
//!
//! Loaded from a TOML file by the front-end; every section has usable
//! defaults so a minimal file only needs a driver table.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub drivers: Vec<DriverConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| Error::config(format!("bad config file: {e}")))
    }
}

/// Engine tunables
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stripe size in bytes
    pub stripe_size: u64,
    /// Directory holding the metadata catalog
    pub metadata_dir: PathBuf,
    /// Upper bound on in-flight block operations per stripe
    pub max_concurrent_blocks: usize,
    /// Optional per-block deadline in seconds; absent means the caller's
    /// deadline is the only bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stripe_size: 4 * 1024 * 1024,
            metadata_dir: PathBuf::from("./metadata"),
            max_concurrent_blocks: 32,
            block_timeout_secs: None,
        }
    }
}

/// One backend driver entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: DriverKind,
}

/// Backend driver flavor and parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverKind {
    /// Chunk-per-file storage under a local directory
    LocalDisk {
        root: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity_bytes: Option<u64>,
    },
    /// Volatile in-memory storage, mainly for tests and demos
    Memory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity_bytes: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.stripe_size, 4 * 1024 * 1024);
        assert_eq!(cfg.engine.max_concurrent_blocks, 32);
        assert!(cfg.engine.block_timeout_secs.is_none());
        assert!(cfg.drivers.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [engine]
            stripe_size = 4096
            metadata_dir = "/tmp/meta"
            max_concurrent_blocks = 8

            [[drivers]]
            name = "disk-a"
            kind = "local_disk"
            root = "/tmp/disk-a"

            [[drivers]]
            name = "mem-1"
            kind = "memory"
            capacity_bytes = 1048576
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.engine.stripe_size, 4096);
        assert_eq!(cfg.drivers.len(), 2);
        assert!(matches!(cfg.drivers[0].kind, DriverKind::LocalDisk { .. }));
        assert!(matches!(
            cfg.drivers[1].kind,
            DriverKind::Memory {
                capacity_bytes: Some(1_048_576)
            }
        ));
    }
}
