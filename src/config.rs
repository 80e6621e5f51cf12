//! Configuration Module
//!
//! Driver selection and options, loaded either from a JSON mapping or from
//! environment variables. Everything is validated here, before a driver is
//! built, so runtime operations never see a bad configuration.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Lifetime applied when none is configured, in seconds.
pub const DEFAULT_LIFETIME: u64 = 60;

/// Longest accepted lifetime: ten years, in seconds. Redis refuses `EXPIRE`
/// values whose millisecond form overflows, so the bound must stay well
/// below `i64::MAX / 1000`.
pub const MAX_LIFETIME: u64 = 10 * 365 * 24 * 60 * 60;

/// Directory used by the filesystem driver when no path is configured.
pub fn default_cache_dir() -> PathBuf {
    env::temp_dir().join("mini_cache")
}

// == Filesystem Options ==
/// Options of the filesystem driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Entry lifetime in seconds
    pub lifetime: u64,
    /// Base directory holding one file per entry
    pub path: PathBuf,
    /// Remove expired files when a read stumbles on them
    pub prune_on_read: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            path: default_cache_dir(),
            prune_on_read: true,
        }
    }
}

impl FileConfig {
    pub fn validate(&self) -> Result<()> {
        validate_lifetime(self.lifetime)?;
        if self.path.as_os_str().is_empty() {
            return Err(invalid("filesystem driver requires a non-empty path"));
        }
        Ok(())
    }
}

// == Redis Options ==
/// Options of the networked-store driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    /// Entry lifetime in seconds
    pub lifetime: u64,
    pub host: String,
    pub port: u16,
    /// Logical database index
    pub db: i64,
    /// Prefix isolating this cache's keys from other users of the store
    pub namespace: String,
    pub password: Option<String>,
    /// Connect and I/O timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            namespace: String::new(),
            password: None,
            connect_timeout_ms: 2000,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<()> {
        validate_lifetime(self.lifetime)?;
        if self.host.trim().is_empty() {
            return Err(invalid("redis driver requires a host"));
        }
        if self.port == 0 {
            return Err(invalid("redis driver requires a non-zero port"));
        }
        if self.db < 0 {
            return Err(invalid(format!("redis db index must be >= 0, got {}", self.db)));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("redis connect_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

// == Driver Selection ==
/// Which backend to build, plus its options.
///
/// Deserialized from a mapping whose `driver` field names the backend:
///
/// ```json
/// {"driver": "redis", "host": "localhost", "port": 6379, "db": 1, "namespace": "app"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum DriverConfig {
    #[serde(alias = "file")]
    Filesystem(FileConfig),
    Redis(RedisConfig),
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::Filesystem(FileConfig::default())
    }
}

impl DriverConfig {
    /// Checks options a driver cannot work without.
    pub fn validate(&self) -> Result<()> {
        match self {
            DriverConfig::Filesystem(file) => file.validate(),
            DriverConfig::Redis(store) => store.validate(),
        }
    }
}

// == Cache Configuration ==
/// Facade configuration: the enabled flag and the driver to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, every cache operation is a no-op
    pub enabled: bool,
    pub driver: DriverConfig,
    /// Background sweep interval in seconds
    pub sweep_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: DriverConfig::default(),
            sweep_interval: 60,
        }
    }
}

impl CacheConfig {
    /// Parses and validates a JSON configuration mapping.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CacheConfig =
            serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED` - Enable the cache (default: true)
    /// - `CACHE_DRIVER` - `filesystem` or `redis` (default: filesystem)
    /// - `CACHE_LIFETIME` - Entry lifetime in seconds (default: 60)
    /// - `CACHE_PATH` - Filesystem driver directory (default: `<tmp>/mini_cache`)
    /// - `CACHE_PRUNE_ON_READ` - Remove expired files on read (default: true)
    /// - `CACHE_REDIS_HOST` / `CACHE_REDIS_PORT` / `CACHE_REDIS_DB` (default: 127.0.0.1 / 6379 / 0)
    /// - `CACHE_REDIS_NAMESPACE` - Key prefix (default: empty)
    /// - `CACHE_REDIS_PASSWORD` - Optional password
    /// - `SWEEP_INTERVAL` - Background sweep interval in seconds (default: 60)
    pub fn from_env() -> Result<Self> {
        let lifetime = env_or("CACHE_LIFETIME", DEFAULT_LIFETIME);
        let driver_kind = env::var("CACHE_DRIVER").unwrap_or_else(|_| "filesystem".to_string());

        let driver = match driver_kind.trim().to_ascii_lowercase().as_str() {
            "filesystem" | "file" => DriverConfig::Filesystem(FileConfig {
                lifetime,
                path: env::var("CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| default_cache_dir()),
                prune_on_read: env_or("CACHE_PRUNE_ON_READ", true),
            }),
            "redis" => {
                let defaults = RedisConfig::default();
                DriverConfig::Redis(RedisConfig {
                    lifetime,
                    host: env::var("CACHE_REDIS_HOST").unwrap_or(defaults.host),
                    port: env_or("CACHE_REDIS_PORT", defaults.port),
                    db: env_or("CACHE_REDIS_DB", defaults.db),
                    namespace: env::var("CACHE_REDIS_NAMESPACE").unwrap_or(defaults.namespace),
                    password: env::var("CACHE_REDIS_PASSWORD").ok(),
                    connect_timeout_ms: defaults.connect_timeout_ms,
                })
            }
            other => return Err(invalid(format!("unsupported cache driver '{}'", other))),
        };

        let config = Self {
            enabled: env_or("CACHE_ENABLED", true),
            driver,
            sweep_interval: env_or("SWEEP_INTERVAL", 60),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval == 0 {
            return Err(invalid("sweep_interval must be > 0"));
        }
        self.driver.validate()
    }
}

fn validate_lifetime(lifetime: u64) -> Result<()> {
    if lifetime > MAX_LIFETIME {
        return Err(invalid(format!(
            "lifetime {}s exceeds the maximum of {}s",
            lifetime, MAX_LIFETIME
        )));
    }
    Ok(())
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(msg: impl Into<String>) -> CacheError {
    CacheError::InvalidConfiguration(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.sweep_interval, 60);
        match config.driver {
            DriverConfig::Filesystem(file) => assert_eq!(file.lifetime, DEFAULT_LIFETIME),
            other => panic!("expected filesystem driver, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_filesystem() {
        let config = CacheConfig::from_json(
            r#"{
                "enabled": true,
                "driver": {"driver": "filesystem", "lifetime": 60, "path": "/tmp/runtime/files"}
            }"#,
        )
        .unwrap();

        assert!(config.enabled);
        match config.driver {
            DriverConfig::Filesystem(file) => {
                assert_eq!(file.lifetime, 60);
                assert_eq!(file.path, PathBuf::from("/tmp/runtime/files"));
                assert!(file.prune_on_read);
            }
            other => panic!("expected filesystem driver, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_redis() {
        let config = CacheConfig::from_json(
            r#"{
                "enabled": true,
                "driver": {
                    "driver": "redis",
                    "lifetime": 60,
                    "host": "localhost",
                    "port": 6379,
                    "db": 1,
                    "namespace": "test_cache"
                }
            }"#,
        )
        .unwrap();

        match config.driver {
            DriverConfig::Redis(store) => {
                assert_eq!(store.host, "localhost");
                assert_eq!(store.db, 1);
                assert_eq!(store.namespace, "test_cache");
                assert_eq!(store.password, None);
            }
            other => panic!("expected redis driver, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_file_alias_and_defaults() {
        let config = CacheConfig::from_json(r#"{"driver": {"driver": "file"}}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.driver, DriverConfig::Filesystem(FileConfig::default()));
    }

    #[test]
    fn test_from_json_unknown_driver() {
        let result = CacheConfig::from_json(r#"{"driver": {"driver": "memcached"}}"#);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_json_malformed_option() {
        let result = CacheConfig::from_json(r#"{"driver": {"driver": "redis", "port": "six"}}"#);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_validate_rejects_bad_options() {
        let empty_path = DriverConfig::Filesystem(FileConfig {
            path: PathBuf::new(),
            ..FileConfig::default()
        });
        assert!(empty_path.validate().is_err());

        let zero_port = DriverConfig::Redis(RedisConfig {
            port: 0,
            ..RedisConfig::default()
        });
        assert!(zero_port.validate().is_err());

        let negative_db = DriverConfig::Redis(RedisConfig {
            db: -1,
            ..RedisConfig::default()
        });
        assert!(negative_db.validate().is_err());

        let no_interval = CacheConfig {
            sweep_interval: 0,
            ..CacheConfig::default()
        };
        assert!(no_interval.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_lifetime() {
        let longest = RedisConfig {
            lifetime: MAX_LIFETIME,
            ..RedisConfig::default()
        };
        assert!(longest.validate().is_ok());

        for lifetime in [MAX_LIFETIME + 1, i64::MAX as u64, u64::MAX] {
            let store = DriverConfig::Redis(RedisConfig {
                lifetime,
                ..RedisConfig::default()
            });
            assert!(matches!(store.validate(), Err(CacheError::InvalidConfiguration(_))));

            let file = DriverConfig::Filesystem(FileConfig {
                lifetime,
                ..FileConfig::default()
            });
            assert!(matches!(file.validate(), Err(CacheError::InvalidConfiguration(_))));
        }

        let result = CacheConfig::from_json(r#"{"driver": {"driver": "redis", "lifetime": 18446744073709551615}}"#);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        // A typo must not silently fall back to the default lifetime.
        let typo = CacheConfig::from_json(r#"{"driver": {"driver": "filesystem", "lifetme": 5}}"#);
        assert!(matches!(typo, Err(CacheError::InvalidConfiguration(_))));

        let typo = CacheConfig::from_json(r#"{"driver": {"driver": "redis", "namspace": "app"}}"#);
        assert!(matches!(typo, Err(CacheError::InvalidConfiguration(_))));

        let typo = CacheConfig::from_json(r#"{"enabeld": true}"#);
        assert!(matches!(typo, Err(CacheError::InvalidConfiguration(_))));

        // The `driver` tag itself is consumed by the enum, not the options.
        let config = CacheConfig::from_json(r#"{"driver": {"driver": "redis", "lifetime": 5}}"#).unwrap();
        match config.driver {
            DriverConfig::Redis(store) => assert_eq!(store.lifetime, 5),
            other => panic!("expected redis driver, got {:?}", other),
        }
    }

    // All environment mutations live in one test; the process environment
    // is shared between concurrently running tests.
    #[test]
    fn test_config_from_env() {
        for key in [
            "CACHE_ENABLED",
            "CACHE_DRIVER",
            "CACHE_LIFETIME",
            "CACHE_PATH",
            "CACHE_PRUNE_ON_READ",
            "CACHE_REDIS_HOST",
            "CACHE_REDIS_PORT",
            "CACHE_REDIS_DB",
            "CACHE_REDIS_NAMESPACE",
            "CACHE_REDIS_PASSWORD",
            "SWEEP_INTERVAL",
        ] {
            env::remove_var(key);
        }

        let config = CacheConfig::from_env().unwrap();
        assert!(config.enabled);
        assert_eq!(config.sweep_interval, 60);
        assert_eq!(config.driver, DriverConfig::Filesystem(FileConfig::default()));

        env::set_var("CACHE_DRIVER", "redis");
        env::set_var("CACHE_LIFETIME", "120");
        env::set_var("CACHE_REDIS_DB", "2");
        env::set_var("CACHE_REDIS_NAMESPACE", "app");
        let config = CacheConfig::from_env().unwrap();
        match config.driver {
            DriverConfig::Redis(store) => {
                assert_eq!(store.lifetime, 120);
                assert_eq!(store.db, 2);
                assert_eq!(store.namespace, "app");
                assert_eq!(store.port, 6379);
            }
            other => panic!("expected redis driver, got {:?}", other),
        }

        env::set_var("CACHE_DRIVER", "carrier-pigeon");
        assert!(matches!(
            CacheConfig::from_env(),
            Err(CacheError::InvalidConfiguration(_))
        ));

        env::remove_var("CACHE_DRIVER");
        env::remove_var("CACHE_LIFETIME");
        env::remove_var("CACHE_REDIS_DB");
        env::remove_var("CACHE_REDIS_NAMESPACE");
    }
}
