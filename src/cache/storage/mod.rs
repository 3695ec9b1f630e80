//! Cache Storage Backends
//!
//! The fast tier is a synchronous in-process map. The durable tier sits
//! behind the [`DurableStore`] port so that a file-backed store, an
//! in-process store or any other keyed persistence can be plugged in.

mod file;
mod memory;
mod volatile;

pub use file::{FileStore, FileStoreConfig};
pub use memory::{FastTier, TierRead};
pub use volatile::VolatileStore;

use crate::cache::entry::{CacheEntry, CacheKey, CachePriority, StreamDescriptor};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Stored Entry
// =============================================================================

/// Serialized form of a cache entry in the durable tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub key: CacheKey,
    pub descriptor: StreamDescriptor,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub priority: CachePriority,
}

impl StoredEntry {
    /// `platform:contentId` address of this entry
    pub fn storage_key(&self) -> String {
        self.key.to_storage_key()
    }

    /// Check if the entry has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether this is the write made at `cached_at`
    ///
    /// Every `set` stamps a fresh `cached_at`, so it identifies one version
    /// of the descriptor for a key.
    pub fn is_version(&self, cached_at: DateTime<Utc>) -> bool {
        self.cached_at == cached_at
    }

    /// Count one read made at `accessed_at`
    pub fn record_access(&mut self, accessed_at: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = self.last_accessed_at.max(accessed_at);
    }
}

impl From<&CacheEntry> for StoredEntry {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            descriptor: entry.descriptor.as_ref().clone(),
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
            priority: entry.priority,
        }
    }
}

impl From<StoredEntry> for CacheEntry {
    fn from(stored: StoredEntry) -> Self {
        CacheEntry {
            key: stored.key,
            descriptor: Arc::new(stored.descriptor),
            cached_at: stored.cached_at,
            expires_at: stored.expires_at,
            access_count: stored.access_count,
            last_accessed_at: stored.last_accessed_at,
            priority: stored.priority,
        }
    }
}

// =============================================================================
// DurableStore Trait
// =============================================================================

/// Keyed store backing the durable tier
///
/// Addressed by the `platform:contentId` string. Implementations must persist
/// across process restarts to be useful as a durable tier, and report
/// failures as errors rather than panicking; the cache degrades to fast-tier
/// operation when a call fails.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &'static str;

    /// Get an entry by key
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Insert or replace an entry
    async fn put(&self, entry: StoredEntry) -> Result<()>;

    /// Delete an entry, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Count one read against the entry, if it is still the version cached at `cached_at`
    ///
    /// Must be atomic with respect to `put` and `delete` on the same key, so a
    /// descriptor written after the read is never overwritten by stale stats.
    /// Returns whether the entry was updated.
    async fn record_access(
        &self,
        key: &str,
        cached_at: DateTime<Utc>,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete the entry only if it is still the version cached at `cached_at`
    ///
    /// Same atomicity as [`DurableStore::record_access`]. Returns whether an
    /// entry was deleted.
    async fn delete_version(&self, key: &str, cached_at: DateTime<Utc>) -> Result<bool>;

    /// List every stored entry
    ///
    /// Note: reads the whole store, used by eviction and sweeps.
    async fn list_all(&self) -> Result<Vec<StoredEntry>>;

    /// Number of stored entries
    async fn count(&self) -> Result<usize>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Check if the store is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Shared handle to a durable store
pub type SharedDurableStore = Arc<dyn DurableStore>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;

    /// Build a stored entry for `youtube:{id}` expiring after `ttl`
    pub fn stored_entry(id: &str, ttl: Duration) -> StoredEntry {
        let entry = CacheEntry::new(
            CacheKey::new("youtube", id),
            Arc::new(StreamDescriptor::new(format!("https://cdn.example/{}.m3u8", id))),
            CachePriority::Normal,
            ttl,
        );
        StoredEntry::from(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_stored_entry_conversion() {
        let entry = CacheEntry::new(
            CacheKey::new("vimeo", "42"),
            Arc::new(StreamDescriptor::new("https://cdn/v").with_quality("720p")),
            CachePriority::High,
            Duration::from_secs(60),
        );

        let stored = StoredEntry::from(&entry);
        assert_eq!(stored.storage_key(), "vimeo:42");

        let back = CacheEntry::from(stored);
        assert_eq!(back.key, entry.key);
        assert_eq!(back.descriptor, entry.descriptor);
        assert_eq!(back.expires_at, entry.expires_at);
        assert_eq!(back.priority, CachePriority::High);
    }

    #[test]
    fn test_stored_entry_json_shape() {
        let stored = test_support::stored_entry("abc", Duration::from_secs(60));
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["key"]["platform"], "youtube");
        assert_eq!(json["key"]["contentId"], "abc");
        assert_eq!(json["priority"], "normal");
        assert!(json["descriptor"]["streamUrl"].is_string());
    }
}
