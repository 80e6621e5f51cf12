//! Cache Facade
//!
//! Forwards every operation to one configured driver, but only while the
//! cache is enabled. A disabled cache answers like an empty one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use tracing::{debug, info};

use super::stats::{CacheStats, StatsRecorder};
use crate::codec::Cacheable;
use crate::config::{CacheConfig, DriverConfig, FileConfig};
use crate::driver::{build_driver, CacheDriver, Driver, FileDriver, Metadata};
use crate::error::Result;

// == Cache ==
/// Entry point for application code.
///
/// When no driver was configured, the first operation builds a filesystem
/// driver with default options (60 second lifetime, `<tmp>/mini_cache`).
#[derive(Debug, Default)]
pub struct Cache {
    driver: OnceLock<CacheDriver>,
    enabled: AtomicBool,
    stats: StatsRecorder,
}

impl Cache {
    // == Constructors ==
    /// A disabled cache with no driver yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// An enabled cache over an already built driver.
    pub fn with_driver(driver: CacheDriver) -> Self {
        Self {
            driver: OnceLock::from(driver),
            enabled: AtomicBool::new(true),
            stats: StatsRecorder::default(),
        }
    }

    /// Builds the driver a configuration names. Fails on invalid options.
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let driver = build_driver(&config.driver)?;
        info!(
            driver = driver.kind(),
            lifetime = driver.lifetime(),
            enabled = config.enabled,
            "Cache configured"
        );

        let cache = Self::with_driver(driver);
        cache.set_enabled(config.enabled);
        Ok(cache)
    }

    // == Enabled Flag ==
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) -> &Self {
        self.enabled.store(enabled, Ordering::Relaxed);
        self
    }

    // == Driver ==
    /// The configured driver, building the default one on first use.
    pub fn driver(&self) -> &CacheDriver {
        self.driver.get_or_init(|| {
            debug!("No driver configured, using default filesystem driver");
            CacheDriver::File(FileDriver::new(FileConfig::default()))
        })
    }

    /// Replaces the driver with one built from `config`.
    pub fn set_driver(&mut self, config: &DriverConfig) -> Result<&mut Self> {
        let driver = build_driver(config)?;
        Ok(self.set_driver_instance(driver))
    }

    pub fn set_driver_instance(&mut self, driver: CacheDriver) -> &mut Self {
        self.driver = OnceLock::from(driver);
        self
    }

    fn active(&self) -> Option<&CacheDriver> {
        self.is_enabled().then(|| self.driver())
    }

    // == Operations ==
    pub fn has(&self, id: &str) -> bool {
        self.active().is_some_and(|driver| driver.has(id))
    }

    pub fn get<T: Cacheable>(&self, id: &str) -> Option<T> {
        let value = self.active()?.get(id);
        self.stats.record_read(value.is_some());
        value
    }

    pub fn save<T: Cacheable>(&self, id: &str, value: &T) -> bool {
        let Some(driver) = self.active() else {
            return false;
        };
        let ok = driver.save(id, value);
        self.stats.record_write(ok);
        ok
    }

    pub fn delete(&self, id: &str) -> bool {
        self.active().is_some_and(|driver| driver.delete(id))
    }

    pub fn get_metadata(&self, id: &str) -> Option<Metadata> {
        self.active()?.get_metadata(id)
    }

    pub fn clean(&self) -> bool {
        let Some(driver) = self.active() else {
            return false;
        };
        let ok = driver.clean();
        if ok {
            self.stats.record_sweep();
        }
        ok
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
