// src/core/pending.rs

//! The table of requests that have been accepted but not yet completed.
//!
//! Each entry is keyed by the caller's correlation token and tagged with an
//! engine-assigned `request_id`. Resolution is a conditional remove on both,
//! so a late reply or a stale timer for an earlier use of the same token can
//! never complete a newer request.

use crate::core::BridgeError;
use crate::core::commands::RequestType;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

/// Bookkeeping for one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    /// Distinguishes successive uses of the same token.
    pub request_id: u64,
    pub kind: RequestType,
    pub submitted_at: Instant,
    /// When the watchdog fails the request with a timeout. `None` disables it.
    pub deadline: Option<Instant>,
}

/// A concurrent map from correlation token to pending entry.
#[derive(Debug)]
pub struct PendingTable {
    entries: DashMap<u64, PendingEntry>,
    next_request_id: AtomicU64,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh request id. Ids are unique for the life of the table.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Inserts an entry, failing if the token is already in flight.
    pub fn register(&self, token: u64, entry: PendingEntry) -> Result<(), BridgeError> {
        match self.entries.entry(token) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateToken(token)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Removes and returns the entry for `token` if it still belongs to `request_id`.
    ///
    /// At most one of any number of concurrent callers observes `Some`.
    pub fn resolve(&self, token: u64, request_id: u64) -> Option<PendingEntry> {
        self.entries
            .remove_if(&token, |_, entry| entry.request_id == request_id)
            .map(|(_, entry)| entry)
    }

    /// Removes every entry, returning what was removed.
    pub fn drain_all(&self) -> Vec<(u64, PendingEntry)> {
        // Collect keys first; removing while iterating a DashMap can deadlock.
        let tokens: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        tokens
            .into_iter()
            .filter_map(|token| self.entries.remove(&token))
            .collect()
    }

    /// Lists `(token, request_id)` of entries whose deadline is at or before `now`.
    ///
    /// The entries stay in the table; the caller resolves them.
    pub fn expired(&self, now: Instant) -> Vec<(u64, u64)> {
        self.entries
            .iter()
            .filter(|e| e.value().deadline.is_some_and(|d| d <= now))
            .map(|e| (*e.key(), e.value().request_id))
            .collect()
    }

    pub fn contains(&self, token: u64) -> bool {
        self.entries.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
