//! Cache Entry Module
//!
//! Timestamps, expiry checks and the clock every driver reads time from.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

// == Metadata ==
/// Creation and expiry timestamps of a live entry, in Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// When the entry was saved
    pub time: i64,
    /// When the entry stops being visible
    pub expire: i64,
}

impl Metadata {
    // == Constructor ==
    /// Stamps a fresh entry saved at `now` that lives for `lifetime` seconds.
    pub fn new(now: i64, lifetime: u64) -> Self {
        let lifetime = i64::try_from(lifetime).unwrap_or(i64::MAX);
        Self {
            time: now,
            expire: now.saturating_add(lifetime),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired as soon as `now` reaches
    /// `expire`, so a zero lifetime is never visible.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire <= now
    }
}

// == Clock ==
/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        current_timestamp()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Moves time forward by `secs` seconds.
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp()
}
