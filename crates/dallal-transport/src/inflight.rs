//! Registry of requests currently in flight, used to deduplicate identical
//! concurrent calls.
//!
//! Every caller that joins an entry awaits the same shared future and so
//! observes the same terminal outcome. Entries are removed by their own chain
//! once it settles, or in bulk by [`InflightRegistry::cancel_all`].

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::task::AbortHandle;

use crate::{error::RequestError, fingerprint::RequestFingerprint};

/// Outcome shared by every waiter of one in-flight chain.
pub type SharedResult = Shared<BoxFuture<'static, Result<Value, RequestError>>>;

pub struct InflightEntry {
    pub id: u64,
    pub fingerprint: RequestFingerprint,
    pub result: SharedResult,
    abort: AbortHandle,
}

/// Whether a call attached to an existing chain or started a new one.
pub enum Joined {
    Existing(SharedResult),
    Started(SharedResult),
}

impl Joined {
    pub fn into_result(self) -> SharedResult {
        match self {
            Joined::Existing(result) | Joined::Started(result) => result,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Joined::Existing(_))
    }
}

#[derive(Default)]
pub struct InflightRegistry {
    entries: scc::HashMap<RequestFingerprint, InflightEntry>,
    next_id: AtomicU64,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the chain registered for `fingerprint`, or start one.
    ///
    /// `start` receives the id the new entry will be registered under and
    /// must return the shared outcome together with a handle that aborts the
    /// chain. It runs while the entry is locked, so it must not block.
    pub fn join_or_start<F>(&self, fingerprint: &RequestFingerprint, start: F) -> Joined
    where
        F: FnOnce(u64) -> (SharedResult, AbortHandle),
    {
        match self.entries.entry_sync(fingerprint.clone()) {
            scc::hash_map::Entry::Occupied(existing) => {
                Joined::Existing(existing.get().result.clone())
            }
            scc::hash_map::Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (result, abort) = start(id);
                vacant.insert_entry(InflightEntry {
                    id,
                    fingerprint: fingerprint.clone(),
                    result: result.clone(),
                    abort,
                });
                Joined::Started(result)
            }
        }
    }

    /// Remove the entry for `fingerprint` if it still belongs to chain `id`.
    pub fn complete(&self, fingerprint: &RequestFingerprint, id: u64) -> bool {
        match self.entries.entry_sync(fingerprint.clone()) {
            scc::hash_map::Entry::Occupied(entry) if entry.get().id == id => {
                entry.remove_entry();
                true
            }
            _ => false,
        }
    }

    /// Abort and forget every registered chain. Returns how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let mut drained = Vec::new();
        self.entries.retain_sync(|_, entry| {
            drained.push((entry.fingerprint.clone(), entry.abort.clone()));
            false
        });
        for (fingerprint, abort) in &drained {
            tracing::debug!(%fingerprint, "Cancelling in-flight request");
            abort.abort();
        }
        drained.len()
    }

    pub fn contains(&self, fingerprint: &RequestFingerprint) -> bool {
        self.entries.get_sync(fingerprint).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
