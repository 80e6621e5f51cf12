//! Networked-Store Driver
//!
//! Stores each entry as a Redis hash under `<namespace>:<id>`:
//!
//! | field  | content                    |
//! |--------|----------------------------|
//! | `time` | creation stamp, Unix secs  |
//! | `data` | encoded payload            |
//!
//! Expiry is Redis' own `EXPIRE`, so a lapsed entry is simply gone and no
//! client-side sweep is needed. A connection is opened per operation and
//! dropped before returning.

use std::time::Duration;

use ::redis::{Client, Commands, Connection, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use super::entry::{current_timestamp, Metadata};
use super::Driver;
use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Joins namespace and id in the physical key
pub const NAMESPACE_SEPARATOR: char = ':';

const FIELD_TIME: &str = "time";
const FIELD_DATA: &str = "data";

// == Redis Driver ==
/// Cache driver backed by a Redis server.
#[derive(Debug, Clone)]
pub struct RedisDriver {
    config: RedisConfig,
    client: Client,
    /// `EXPIRE` argument, bounded by `MAX_LIFETIME`
    expire_secs: i64,
}

impl RedisDriver {
    // == Constructor ==
    /// Prepares a client for the configured server. No connection is made
    /// until the first operation.
    ///
    /// A lifetime above [`MAX_LIFETIME`](crate::config::MAX_LIFETIME) is
    /// refused here: Redis would reject the `EXPIRE` only at `EXEC` time,
    /// after the `HSET` already landed, leaving an entry that never expires.
    pub fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let expire_secs = i64::try_from(config.lifetime).map_err(|_| {
            CacheError::InvalidConfiguration(format!("lifetime {}s is out of range", config.lifetime))
        })?;

        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db,
                password: config.password.clone(),
                ..Default::default()
            },
        };
        let client = Client::open(info)
            .map_err(|e| CacheError::InvalidConfiguration(format!("redis connection info: {}", e)))?;

        Ok(Self {
            config,
            client,
            expire_secs,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    // == Key Mapping ==
    /// Physical key of `id` in the store.
    pub fn physical_key(&self, id: &str) -> String {
        if self.config.namespace.is_empty() {
            id.to_string()
        } else {
            format!("{}{}{}", self.config.namespace, NAMESPACE_SEPARATOR, id)
        }
    }

    fn connection(&self) -> Result<Connection> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let con = self.client.get_connection_with_timeout(timeout)?;
        con.set_read_timeout(Some(timeout))?;
        con.set_write_timeout(Some(timeout))?;
        Ok(con)
    }
}

impl Driver for RedisDriver {
    fn kind(&self) -> &'static str {
        "redis"
    }

    fn lifetime(&self) -> u64 {
        self.config.lifetime
    }

    fn read_payload(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let mut con = self.connection()?;
        let data: Option<Vec<u8>> = con.hget(self.physical_key(id), FIELD_DATA)?;
        Ok(data)
    }

    fn write_payload(&self, id: &str, payload: &[u8]) -> Result<()> {
        let key = self.physical_key(id);
        let now = current_timestamp();
        let mut con = self.connection()?;

        // DEL first so a replaced entry never keeps fields from the old one.
        ::redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg(FIELD_TIME)
            .arg(now)
            .arg(FIELD_DATA)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.expire_secs)
            .ignore()
            .query::<()>(&mut con)?;
        Ok(())
    }

    fn read_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        let key = self.physical_key(id);
        let mut con = self.connection()?;
        let (time, ttl): (Option<i64>, i64) = ::redis::pipe()
            .atomic()
            .hget(&key, FIELD_TIME)
            .ttl(&key)
            .query(&mut con)?;

        // TTL is -2 for a missing key and -1 for a key without expiry, which
        // this driver never writes.
        match time {
            Some(time) if ttl > 0 => Ok(Some(Metadata {
                time,
                expire: current_timestamp() + ttl,
            })),
            Some(_) if ttl == -1 => {
                debug!(key = %key, "Entry has no expiry, ignoring");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut con = self.connection()?;
        con.del::<_, ()>(self.physical_key(id))?;
        Ok(())
    }

    fn sweep(&self) -> Result<usize> {
        // Redis evicts expired keys itself; only confirm it is reachable.
        let mut con = self.connection()?;
        ::redis::cmd("PING").query::<String>(&mut con)?;
        Ok(0)
    }

    fn contains(&self, id: &str) -> Result<bool> {
        let mut con = self.connection()?;
        Ok(con.exists(self.physical_key(id))?)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_LIFETIME;

    fn driver(namespace: &str) -> RedisDriver {
        RedisDriver::new(RedisConfig {
            namespace: namespace.to_string(),
            ..RedisConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_physical_key_is_namespaced() {
        let d = driver("test_cache");
        assert_eq!(d.physical_key("test_id"), "test_cache:test_id");
        assert_eq!(d.namespace(), "test_cache");
    }

    #[test]
    fn test_physical_key_without_namespace() {
        assert_eq!(driver("").physical_key("test_id"), "test_id");
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let a = driver("a");
        let b = driver("b");
        assert_ne!(a.physical_key("same"), b.physical_key("same"));
    }

    #[test]
    fn test_new_rejects_lifetime_redis_cannot_expire() {
        for lifetime in [MAX_LIFETIME + 1, i64::MAX as u64, u64::MAX] {
            let result = RedisDriver::new(RedisConfig {
                lifetime,
                ..RedisConfig::default()
            });
            assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
        }
    }

    #[test]
    fn test_longest_lifetime_is_passed_through() {
        let d = RedisDriver::new(RedisConfig {
            lifetime: MAX_LIFETIME,
            ..RedisConfig::default()
        })
        .unwrap();
        assert_eq!(d.expire_secs, MAX_LIFETIME as i64);
        assert_eq!(d.lifetime(), MAX_LIFETIME);
        // Redis stores expiry in milliseconds.
        assert!(d.expire_secs.checked_mul(1000).is_some());
    }
}
