//! Response cache keyed by [`RequestFingerprint`].
//!
//! Entries are immutable once stored and replaced wholesale by newer
//! responses. Expiry is lazy: an entry is dropped when a read finds it stale,
//! or when the cache is cleared. Nothing evicts in the background.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;

use crate::{clock::Clock, fingerprint::RequestFingerprint};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
}

impl CacheEntry {
    pub fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Lock-free response cache backed by `scc::HashMap`.
pub struct CacheStore {
    entries: scc::HashMap<RequestFingerprint, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: scc::HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Return the cached value if it is still live, dropping it otherwise.
    pub fn get(&self, key: &RequestFingerprint) -> Option<Value> {
        let now = self.clock.now();
        let entry = self.entries.get_sync(key)?.get().clone();
        if entry.is_live(now, self.ttl) {
            return Some(entry.value);
        }

        // Only drop the stale entry; a concurrent writer may have replaced it.
        if let scc::hash_map::Entry::Occupied(current) = self.entries.entry_sync(key.clone())
            && current.get().stored_at == entry.stored_at
        {
            current.remove_entry();
        }
        None
    }

    /// Store a fresh value, replacing any previous entry for `key`.
    pub fn insert(&self, key: RequestFingerprint, value: Value) {
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
        };
        match self.entries.entry_sync(key) {
            scc::hash_map::Entry::Occupied(mut current) => *current.get_mut() = entry,
            scc::hash_map::Entry::Vacant(vacant) => {
                vacant.insert_entry(entry);
            }
        }
    }

    pub fn remove(&self, key: &RequestFingerprint) -> bool {
        self.entries.remove_sync(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear_sync();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
