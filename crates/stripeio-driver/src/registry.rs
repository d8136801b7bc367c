//! Driver registry
//!
//! Owns the set of configured backends. The registry is immutable after
//! construction; the engine and scheduler borrow driver handles from it.

use crate::{LocalDiskDriver, MemoryDriver, StorageDriver};
use std::collections::HashMap;
use std::sync::Arc;
use stripeio_common::{DriverConfig, DriverKind, Error, Result};
use tracing::{info, warn};

/// Name-keyed set of storage drivers
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn StorageDriver>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DriverRegistry {
    /// Build a registry from explicit driver handles
    pub fn new(drivers: Vec<Arc<dyn StorageDriver>>) -> Result<Self> {
        let mut map: HashMap<String, Arc<dyn StorageDriver>> = HashMap::new();
        for driver in drivers {
            let name = driver.name().to_string();
            if map.insert(name.clone(), driver).is_some() {
                return Err(Error::config(format!("duplicate driver name: {name}")));
            }
        }
        if map.is_empty() {
            return Err(Error::config("no drivers configured"));
        }
        Ok(Self { drivers: map })
    }

    /// Build a registry from configuration entries
    pub fn from_config(configs: &[DriverConfig]) -> Result<Self> {
        let mut drivers: Vec<Arc<dyn StorageDriver>> = Vec::with_capacity(configs.len());
        for cfg in configs {
            let driver: Arc<dyn StorageDriver> = match &cfg.kind {
                DriverKind::LocalDisk {
                    root,
                    capacity_bytes,
                } => Arc::new(LocalDiskDriver::new(&cfg.name, root, *capacity_bytes)),
                DriverKind::Memory { capacity_bytes } => {
                    Arc::new(MemoryDriver::new(&cfg.name, *capacity_bytes))
                }
            };
            drivers.push(driver);
        }
        Self::new(drivers)
    }

    /// Look up a driver by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageDriver>> {
        self.drivers.get(name).cloned()
    }

    /// Registered driver names, sorted for deterministic iteration
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Iterate over all drivers in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn StorageDriver>)> {
        let mut entries: Vec<_> = self.drivers.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered drivers
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Run one-shot initialization on every driver.
    ///
    /// Individual connect failures are logged and left to the health probe
    /// to sort out; they do not abort startup.
    pub async fn connect_all(&self) {
        for (name, driver) in self.iter() {
            match driver.connect().await {
                Ok(()) => info!(driver = name, "driver connected"),
                Err(e) => warn!(driver = name, error = %e, "driver connect failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripeio_common::DriverKind;

    fn mem_config(name: &str) -> DriverConfig {
        DriverConfig {
            name: name.to_string(),
            kind: DriverKind::Memory {
                capacity_bytes: None,
            },
        }
    }

    #[test]
    fn test_from_config() {
        let registry =
            DriverRegistry::from_config(&[mem_config("m0"), mem_config("m1")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["m0", "m1"]);
        assert!(registry.get("m0").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = DriverRegistry::from_config(&[mem_config("m0"), mem_config("m0")])
            .unwrap_err();
        assert_eq!(err.kind(), stripeio_common::ErrorKind::Config);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(DriverRegistry::from_config(&[]).is_err());
    }
}
