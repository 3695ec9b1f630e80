//! Fast Tier Storage
//!
//! In-process map of live entries using DashMap for concurrent access.
//! Every operation is synchronous so hot-path readers never yield.

use crate::cache::entry::CacheEntry;
use crate::cache::eviction::EvictionCandidate;
use crate::cache::tier::CacheTier;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

// =============================================================================
// Tier Read
// =============================================================================

/// Result of reading one key from a tier
#[derive(Debug, Clone)]
pub enum TierRead {
    /// Live entry, access stats already bumped
    Hit(CacheEntry),
    /// Entry was present but past its expiry and has been dropped
    Expired,
    /// No entry
    Miss,
}

impl TierRead {
    /// Take the entry of a hit
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            TierRead::Hit(entry) => Some(entry),
            TierRead::Expired | TierRead::Miss => None,
        }
    }
}

// =============================================================================
// Fast Tier
// =============================================================================

/// Bounded in-process tier
///
/// Capacity is enforced by the cache manager, which owns the protected set
/// the eviction ranking depends on.
#[derive(Default)]
pub struct FastTier {
    entries: DashMap<String, CacheEntry>,
}

impl FastTier {
    /// Create an empty fast tier
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a live entry, bumping its access stats in place
    ///
    /// An expired entry is removed and reported as [`TierRead::Expired`].
    pub fn read(&self, key: &str, now: DateTime<Utc>) -> TierRead {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                entry.record_access_at(now);
                return TierRead::Hit(entry.value().clone());
            }
            Some(_) => {}
            None => return TierRead::Miss,
        }

        // Shard guard is released, safe to lock again
        self.entries.remove_if(key, |_, e| e.is_expired_at(now));
        TierRead::Expired
    }

    /// Membership test that ignores expired entries without mutating anything
    pub fn contains_live(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .map(|e| !e.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Insert or replace an entry
    pub fn insert(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.to_storage_key(), entry);
    }

    /// Remove an entry, returning it if present
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, e)| e)
    }

    /// Remove every expired entry, returning the removed keys
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|r| r.value().is_expired_at(now))
            .map(|r| r.key().clone())
            .collect();

        expired
            .into_iter()
            .filter(|key| {
                self.entries
                    .remove_if(key, |_, e| e.is_expired_at(now))
                    .is_some()
            })
            .collect()
    }

    /// Eviction candidates for every stored entry
    pub fn candidates(&self) -> Vec<EvictionCandidate> {
        self.entries
            .iter()
            .map(|r| EvictionCandidate::from_entry(r.value(), CacheTier::Fast))
            .collect()
    }

    /// Snapshot of every stored entry
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|r| r.value().clone()).collect()
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
