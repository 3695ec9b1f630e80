//! Cache Events
//!
//! Events emitted by the stream cache for monitoring and observability.

use crate::cache::entry::{CacheKey, CachePriority};
use crate::cache::tier::CacheTier;
use serde::{Deserialize, Serialize};

/// Events emitted by the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Descriptor written to the cache
    Stored {
        key: String,
        priority: CachePriority,
        durable: bool,
    },

    /// Cache hit
    Hit {
        key: String,
        tier: CacheTier,
        promoted: bool,
    },

    /// Cache miss (not found in any tier)
    Miss { key: String },

    /// Entry explicitly removed from both tiers
    Removed { key: String },

    /// Entry evicted from a tier
    Evicted {
        key: String,
        tier: CacheTier,
        reason: EvictionReason,
    },

    /// Extraction started for a key
    ExtractionStarted { key: String },

    /// Extraction produced a descriptor
    ExtractionCompleted { key: String },

    /// Extraction failed
    ExtractionFailed { key: String, error: String },

    /// Durable tier stopped answering
    TierUnavailable { tier: CacheTier, reason: String },

    /// Durable tier answered again
    TierRecovered { tier: CacheTier },

    /// Tier cleared
    TierCleared {
        tier: CacheTier,
        entries_removed: u64,
    },
}

/// Reason for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionReason {
    /// Capacity limit reached
    Capacity,
    /// Entry expired (TTL)
    Expired,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity"),
            EvictionReason::Expired => write!(f, "expired"),
        }
    }
}

impl CacheEvent {
    /// Create a Hit event
    pub fn hit(key: &CacheKey, tier: CacheTier, promoted: bool) -> Self {
        CacheEvent::Hit {
            key: key.to_storage_key(),
            tier,
            promoted,
        }
    }

    /// Create a Miss event
    pub fn miss(key: &CacheKey) -> Self {
        CacheEvent::Miss {
            key: key.to_storage_key(),
        }
    }

    /// Create an Evicted event
    pub fn evicted(key: impl Into<String>, tier: CacheTier, reason: EvictionReason) -> Self {
        CacheEvent::Evicted {
            key: key.into(),
            tier,
            reason,
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Stored { key, .. }
            | CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Removed { key }
            | CacheEvent::Evicted { key, .. }
            | CacheEvent::ExtractionStarted { key }
            | CacheEvent::ExtractionCompleted { key }
            | CacheEvent::ExtractionFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Get the tier associated with this event (if any)
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheEvent::Hit { tier, .. }
            | CacheEvent::Evicted { tier, .. }
            | CacheEvent::TierUnavailable { tier, .. }
            | CacheEvent::TierRecovered { tier }
            | CacheEvent::TierCleared { tier, .. } => Some(*tier),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CacheEvent::TierUnavailable { .. } | CacheEvent::ExtractionFailed { .. }
        )
    }
}
