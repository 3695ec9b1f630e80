//! Tiered Stream Cache
//!
//! A two-tier cache of resolved stream descriptors:
//! - **Fast**: in-process, synchronous, ~100 entries, ~4h TTL
//! - **Durable**: survives restarts, asynchronous, ~500 entries, ~5h TTL
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TieredStreamCache                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐          ┌──────────────────────────────────┐ │
//! │  │      Fast Tier       │ promote  │          Durable Tier            │ │
//! │  │      (DashMap)       │ <─────── │   (DurableStore: file/volatile)  │ │
//! │  └──────────────────────┘          └──────────────────────────────────┘ │
//! │             │                                     │                     │
//! │             └──────────────┬──────────────────────┘                     │
//! │                            │                                            │
//! │        ┌───────────────────┴────────┐   ┌─────────────────────────┐     │
//! │        │  Priority-aware eviction   │   │  Extraction tracker     │     │
//! │        │  (protected keys exempt)   │   │  (one in flight / key)  │     │
//! │        └────────────────────────────┘   └─────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use stream_resolver::cache::{CacheKey, CachePriority, TieredStreamCache};
//!
//! let cache = TieredStreamCache::new();
//! let key = CacheKey::new("youtube", "dQw4w9WgXcQ");
//!
//! // Join or start the single extraction for this key
//! let descriptor = cache
//!     .resolve_with(&key, CachePriority::Critical, move || async move {
//!         client.resolve(&key).await
//!     })
//!     .await?;
//!
//! // Hot path, fast tier only
//! if let Some(descriptor) = cache.get_fast(&key) {
//!     println!("{:?}", descriptor.stream_url);
//! }
//! ```

pub mod entry;
pub mod events;
pub mod eviction;
pub mod extraction;
pub mod manager;
pub mod metrics;
pub mod storage;
pub mod tier;

// Re-export main types
pub use entry::{CacheEntry, CacheKey, CachePriority, StreamDescriptor};
pub use events::{CacheEvent, EvictionReason};
pub use eviction::{EvictionCandidate, EvictionPlan};
pub use extraction::{
    ExtractionHandle, ExtractionOutcome, ExtractionState, ExtractionStateView, ExtractionStatus,
};
pub use manager::{CacheStats, PlatformCounts, StreamCacheConfig, SweepReport, TieredStreamCache};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, CacheTierMetrics, TierMetricsSnapshot};
pub use storage::{DurableStore, FileStore, FileStoreConfig, SharedDurableStore, StoredEntry, VolatileStore};
pub use tier::{CacheTier, TierConfig};

use std::sync::Arc;

// =============================================================================
// Cache Lookup Result
// =============================================================================

/// Result of a cache lookup operation
#[derive(Debug, Clone)]
pub enum CacheLookupResult {
    /// Cache hit with the descriptor and serving tier
    Hit {
        descriptor: Arc<StreamDescriptor>,
        /// Tier where the entry was found
        tier: CacheTier,
        /// Whether the entry was copied into the fast tier
        promoted: bool,
    },
    /// Not found in any tier
    Miss,
}

impl CacheLookupResult {
    /// Check if this is a cache hit
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookupResult::Hit { .. })
    }

    /// Check if this is a cache miss
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheLookupResult::Miss)
    }

    /// Get the tier if this is a hit
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheLookupResult::Hit { tier, .. } => Some(*tier),
            CacheLookupResult::Miss => None,
        }
    }

    /// Take the descriptor if this is a hit
    pub fn into_descriptor(self) -> Option<Arc<StreamDescriptor>> {
        match self {
            CacheLookupResult::Hit { descriptor, .. } => Some(descriptor),
            CacheLookupResult::Miss => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_result_accessors() {
        let hit = CacheLookupResult::Hit {
            descriptor: Arc::new(StreamDescriptor::new("https://cdn/v")),
            tier: CacheTier::Durable,
            promoted: true,
        };
        assert!(hit.is_hit());
        assert!(!hit.is_miss());
        assert_eq!(hit.tier(), Some(CacheTier::Durable));
        assert!(hit.into_descriptor().is_some());

        let miss = CacheLookupResult::Miss;
        assert!(miss.is_miss());
        assert_eq!(miss.tier(), None);
        assert!(miss.into_descriptor().is_none());
    }
}
