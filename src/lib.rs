//! Mini Cache - A key-value cache with pluggable storage drivers
//!
//! Values of any [`Cacheable`] type are stored with a per-entry lifetime in
//! either local files ([`FileDriver`]) or Redis ([`RedisDriver`]). Every
//! driver operation is total: failures degrade to a cache miss.
//!
//! ```no_run
//! use mini_cache::{Cache, CacheConfig};
//!
//! let config = CacheConfig::from_json(
//!     r#"{"enabled": true, "driver": {"driver": "filesystem", "path": "/tmp/app-cache"}}"#,
//! )?;
//! let cache = Cache::from_config(&config)?;
//!
//! cache.save("greeting", &"hello".to_string());
//! assert_eq!(cache.get::<String>("greeting").as_deref(), Some("hello"));
//! # Ok::<(), mini_cache::CacheError>(())
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod tasks;

pub use cache::{Cache, CacheStats};
pub use codec::Cacheable;
pub use config::{CacheConfig, DriverConfig, FileConfig, RedisConfig};
pub use driver::{build_driver, CacheDriver, Driver, FileDriver, Metadata, RedisDriver};
pub use error::CacheError;
pub use tasks::spawn_sweep_task;
