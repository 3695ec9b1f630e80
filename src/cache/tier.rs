//! Cache Tier Definitions
//!
//! Defines the two-tier hierarchy: a bounded in-process fast tier and a
//! larger durable tier that survives restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Defaults
// =============================================================================

/// Default fast tier capacity (entries)
pub const FAST_TIER_CAPACITY: usize = 100;

/// Default fast tier TTL: 4 hours
pub const FAST_TIER_TTL_SECS: u64 = 4 * 60 * 60;

/// Default durable tier capacity (entries)
pub const DURABLE_TIER_CAPACITY: usize = 500;

/// Default durable tier TTL: 5 hours
pub const DURABLE_TIER_TTL_SECS: u64 = 5 * 60 * 60;

/// Default number of extra entries evicted from the durable tier
pub const DURABLE_EVICTION_MARGIN: usize = 10;

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier representing the storage hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// In-process, ephemeral, synchronous
    #[default]
    Fast,
    /// Persistent across restarts, asynchronous
    Durable,
}

impl CacheTier {
    /// Get all tiers in lookup order (fast -> durable)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Fast, CacheTier::Durable]
    }

    /// Get the promotion target tier
    pub fn promotion_target(&self) -> Option<CacheTier> {
        match self {
            CacheTier::Fast => None,
            CacheTier::Durable => Some(CacheTier::Fast),
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Fast => write!(f, "fast"),
            CacheTier::Durable => write!(f, "durable"),
        }
    }
}

// =============================================================================
// Tier Configuration
// =============================================================================

/// Configuration for a cache tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Time-to-live of entries written to this tier, in milliseconds
    pub ttl_ms: u64,
    /// Extra entries evicted beyond the strict overflow
    pub eviction_margin: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::fast_default()
    }
}

impl TierConfig {
    /// Create a default config for the fast tier
    pub fn fast_default() -> Self {
        Self {
            capacity: FAST_TIER_CAPACITY,
            ttl_ms: FAST_TIER_TTL_SECS * 1000,
            eviction_margin: 0,
        }
    }

    /// Create a default config for the durable tier
    pub fn durable_default() -> Self {
        Self {
            capacity: DURABLE_TIER_CAPACITY,
            ttl_ms: DURABLE_TIER_TTL_SECS * 1000,
            eviction_margin: DURABLE_EVICTION_MARGIN,
        }
    }

    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Check if the tier is above capacity
    pub fn should_evict(&self, current_entries: usize) -> bool {
        current_entries > self.capacity
    }

    /// Number of entries to evict for the given population
    ///
    /// Zero when at or under capacity, otherwise the overflow plus margin.
    pub fn eviction_count(&self, current_entries: usize) -> usize {
        if !self.should_evict(current_entries) {
            return 0;
        }
        (current_entries - self.capacity + self.eviction_margin).min(current_entries)
    }
}
