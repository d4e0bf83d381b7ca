//! Key-value storage for raw feed bodies.
//!
//! Entries are keyed by feed URL and carry the windows they were stored with,
//! so a store shared between processes with different settings still ages
//! each entry consistently.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Bytes,
    pub stored_at: DateTime<Utc>,
    pub cache_window: Duration,
    pub valid_window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl CacheEntry {
    /// Time since the entry was stored. Entries stamped in the future are zero days old.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let age = self.age(now);
        if age < self.cache_window {
            Freshness::Fresh
        } else if age < self.valid_window {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// The store already held an entry with a newer `stored_at`.
    Discarded,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Stores `entry` unless the current entry for `key` was stored later.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<PutOutcome, StoreError>;

    async fn invalidate(&self, key: &str) -> Result<(), StoreError>;
}
