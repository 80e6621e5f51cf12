//! Driver Module
//!
//! The storage contract shared by every backend, and the closed set of
//! backends a configuration can select.
//!
//! Backends only implement the fallible primitives (`read_payload`,
//! `write_payload`, ...). The public operations (`has`, `get`, `save`,
//! `delete`, `get_metadata`, `clean`) are provided by [`Driver`] itself and
//! are total: a storage fault is logged and reported as a miss or `false`.

mod entry;
mod file;
mod redis;


use tracing::{debug, warn};

use crate::codec::{self, Cacheable};
use crate::config::DriverConfig;
use crate::error::Result;

// Re-export public types
pub use entry::{current_timestamp, Clock, ManualClock, Metadata, SystemClock};
pub use file::FileDriver;
pub use self::redis::RedisDriver;

// == Driver Contract ==
/// A cache storage backend.
pub trait Driver: Send + Sync {
    /// Short backend name used in log fields.
    fn kind(&self) -> &'static str;

    /// Lifetime in seconds applied to every saved entry.
    fn lifetime(&self) -> u64;

    /// Encoded payload of a live entry, `None` when absent or expired.
    fn read_payload(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Stores an encoded payload with fresh timestamps, replacing any prior entry.
    fn write_payload(&self, id: &str, payload: &[u8]) -> Result<()>;

    /// Timestamps of a live entry without touching its payload.
    fn read_metadata(&self, id: &str) -> Result<Option<Metadata>>;

    /// Removes an entry. Removing a missing entry is not an error.
    fn remove(&self, id: &str) -> Result<()>;

    /// Physically removes expired entries, returning how many were removed.
    fn sweep(&self) -> Result<usize>;

    /// Liveness check; backends may override with something cheaper.
    fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.read_metadata(id)?.is_some())
    }

    // == Has ==
    /// True iff a live entry exists for `id`.
    fn has(&self, id: &str) -> bool {
        self.contains(id).unwrap_or_else(|e| {
            warn!(driver = self.kind(), id, error = %e, "has failed, reporting miss");
            false
        })
    }

    // == Get ==
    /// Decoded value of a live entry; `None` on miss, expiry, backend failure
    /// or a payload that does not decode as `T`.
    fn get<T: Cacheable>(&self, id: &str) -> Option<T> {
        let bytes = match self.read_payload(id) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(driver = self.kind(), id, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(driver = self.kind(), id, error = %e, "get failed, reporting miss");
                return None;
            }
        };

        match codec::decode(&bytes) {
            Ok(value) => {
                debug!(driver = self.kind(), id, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(driver = self.kind(), id, error = %e, "Undecodable entry, reporting miss");
                None
            }
        }
    }

    // == Save ==
    /// Encodes and stores `value`. Returns false on any encoding or backend failure.
    fn save<T: Cacheable>(&self, id: &str, value: &T) -> bool {
        let result = codec::encode(value).and_then(|bytes| self.write_payload(id, &bytes));
        match result {
            Ok(()) => {
                debug!(driver = self.kind(), id, lifetime = self.lifetime(), "Saved entry");
                true
            }
            Err(e) => {
                warn!(driver = self.kind(), id, error = %e, "save failed");
                false
            }
        }
    }

    // == Delete ==
    /// Removes the entry for `id`; true also when there was nothing to remove.
    fn delete(&self, id: &str) -> bool {
        match self.remove(id) {
            Ok(()) => true,
            Err(e) => {
                warn!(driver = self.kind(), id, error = %e, "delete failed");
                false
            }
        }
    }

    // == Get Metadata ==
    /// Creation and expiry timestamps of a live entry.
    fn get_metadata(&self, id: &str) -> Option<Metadata> {
        self.read_metadata(id).unwrap_or_else(|e| {
            warn!(driver = self.kind(), id, error = %e, "get_metadata failed, reporting miss");
            None
        })
    }

    // == Clean ==
    /// Sweeps expired entries. True when the sweep completed, even if it removed nothing.
    fn clean(&self) -> bool {
        match self.sweep() {
            Ok(removed) => {
                debug!(driver = self.kind(), removed, "Sweep complete");
                true
            }
            Err(e) => {
                warn!(driver = self.kind(), error = %e, "clean failed");
                false
            }
        }
    }
}

// == Cache Driver ==
/// The backends a configuration can select.
#[derive(Debug)]
pub enum CacheDriver {
    File(FileDriver),
    Redis(RedisDriver),
}

impl CacheDriver {
    /// Builds the driver a configuration names, validating it first.
    pub fn from_config(config: &DriverConfig) -> Result<Self> {
        config.validate()?;
        let driver = match config {
            DriverConfig::Filesystem(file) => CacheDriver::File(FileDriver::new(file.clone())),
            DriverConfig::Redis(store) => CacheDriver::Redis(RedisDriver::new(store.clone())?),
        };
        debug!(driver = driver.kind(), lifetime = driver.lifetime(), "Driver constructed");
        Ok(driver)
    }
}

/// Factory mapping a driver configuration to its backend.
pub fn build_driver(config: &DriverConfig) -> Result<CacheDriver> {
    CacheDriver::from_config(config)
}

impl Driver for CacheDriver {
    fn kind(&self) -> &'static str {
        match self {
            CacheDriver::File(d) => d.kind(),
            CacheDriver::Redis(d) => d.kind(),
        }
    }

    fn lifetime(&self) -> u64 {
        match self {
            CacheDriver::File(d) => d.lifetime(),
            CacheDriver::Redis(d) => d.lifetime(),
        }
    }

    fn read_payload(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match self {
            CacheDriver::File(d) => d.read_payload(id),
            CacheDriver::Redis(d) => d.read_payload(id),
        }
    }

    fn write_payload(&self, id: &str, payload: &[u8]) -> Result<()> {
        match self {
            CacheDriver::File(d) => d.write_payload(id, payload),
            CacheDriver::Redis(d) => d.write_payload(id, payload),
        }
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        match self {
            CacheDriver::File(d) => d.read_metadata(id),
            CacheDriver::Redis(d) => d.read_metadata(id),
        }
    }

    fn remove(&self, id: &str) -> Result<()> {
        match self {
            CacheDriver::File(d) => d.remove(id),
            CacheDriver::Redis(d) => d.remove(id),
        }
    }

    fn sweep(&self) -> Result<usize> {
        match self {
            CacheDriver::File(d) => d.sweep(),
            CacheDriver::Redis(d) => d.sweep(),
        }
    }

    fn contains(&self, id: &str) -> Result<bool> {
        match self {
            CacheDriver::File(d) => d.contains(id),
            CacheDriver::Redis(d) => d.contains(id),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, RedisConfig};
    use crate::error::CacheError;
    use tempfile::tempdir;

    #[test]
    fn test_build_file_driver() {
        let dir = tempdir().unwrap();
        let config = DriverConfig::Filesystem(FileConfig {
            lifetime: 30,
            path: dir.path().to_path_buf(),
            ..FileConfig::default()
        });

        let driver = build_driver(&config).unwrap();
        assert!(matches!(driver, CacheDriver::File(_)));
        assert_eq!(driver.kind(), "filesystem");
        assert_eq!(driver.lifetime(), 30);
    }

    #[test]
    fn test_build_redis_driver_does_not_connect() {
        // Construction only parses connection info; nothing listens on port 1.
        let config = DriverConfig::Redis(RedisConfig {
            port: 1,
            namespace: "test_cache".to_string(),
            ..RedisConfig::default()
        });

        let driver = build_driver(&config).unwrap();
        assert!(matches!(driver, CacheDriver::Redis(_)));
        assert_eq!(driver.kind(), "redis");
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = DriverConfig::Redis(RedisConfig {
            host: String::new(),
            ..RedisConfig::default()
        });

        let result = build_driver(&config);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unreachable_backend_degrades_to_miss() {
        let config = DriverConfig::Redis(RedisConfig {
            port: 1,
            ..RedisConfig::default()
        });
        let driver = build_driver(&config).unwrap();

        assert!(!driver.has("k1"));
        assert_eq!(driver.get::<String>("k1"), None);
        assert_eq!(driver.get_metadata("k1"), None);
        assert!(!driver.save("k1", &"hello".to_string()));
        assert!(!driver.delete("k1"));
        assert!(!driver.clean());
    }
}
