//! Result cache
//!
//! Entries are kept past their TTL so that degraded reads can still serve
//! them; freshness is decided at read time by a `CacheAcceptance`.

use super::types::{OperationResult, ServiceKey};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How old an entry a read is willing to accept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAcceptance {
    /// Within the entry's TTL
    Fresh,
    /// Within TTL times the multiplier
    Extended(u32),
    /// Any age
    AnyAge,
}

#[derive(Debug, Clone)]
pub struct CachedResult {
    pub key: ServiceKey,
    pub value: OperationResult,
    pub ttl: Duration,
    pub stored_at: DateTime<Utc>,
    stored: Instant,
}

impl CachedResult {
    pub fn age(&self) -> Duration {
        self.stored.elapsed()
    }

    pub fn accepts(&self, acceptance: CacheAcceptance) -> bool {
        let age = self.age();
        match acceptance {
            CacheAcceptance::Fresh => age <= self.ttl,
            CacheAcceptance::Extended(mult) => age <= self.ttl.saturating_mul(mult),
            CacheAcceptance::AnyAge => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<ServiceKey, CachedResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result, replacing any previous entry for the key
    pub fn put(&self, key: ServiceKey, value: OperationResult, ttl: Duration) {
        let entry = CachedResult {
            key: key.clone(),
            value,
            ttl,
            stored_at: Utc::now(),
            stored: Instant::now(),
        };
        self.entries.write().insert(key, entry);
    }

    pub fn get(&self, key: &ServiceKey, acceptance: CacheAcceptance) -> Option<OperationResult> {
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.accepts(acceptance))
            .map(|entry| entry.value.clone())
    }

    /// Raw entry regardless of age
    pub fn entry(&self, key: &ServiceKey) -> Option<CachedResult> {
        self.entries.read().get(key).cloned()
    }

    pub fn remove(&self, key: &ServiceKey) {
        self.entries.write().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
