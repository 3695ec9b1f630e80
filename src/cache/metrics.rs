//! Cache Metrics
//!
//! Cache-line aligned counters, one block per tier, plus extraction counters.
//! Readers take point-in-time snapshots.

use crate::cache::tier::CacheTier;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Cache Line Size
// =============================================================================

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Tier Metrics (Cache-Line Aligned)
// =============================================================================

/// Metrics for a single cache tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CacheTierMetrics {
    /// Reads served by this tier
    pub hits: AtomicU64,
    /// Reads this tier could not serve
    pub misses: AtomicU64,
    /// Entries written
    pub writes: AtomicU64,
    /// Entries copied into this tier from a lower one
    pub promotions: AtomicU64,
    /// Entries removed for capacity
    pub evictions: AtomicU64,
    /// Entries removed past their TTL
    pub expirations: AtomicU64,
    /// Failed storage calls
    pub failures: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
}

// Verify size at compile time
const _: () = assert!(std::mem::size_of::<CacheTierMetrics>() <= CACHE_LINE_SIZE);

impl CacheTierMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.bump(&self.hits, 1);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.bump(&self.misses, 1);
    }

    #[inline]
    pub fn record_write(&self) {
        self.bump(&self.writes, 1);
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.bump(&self.promotions, 1);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.bump(&self.evictions, count);
    }

    #[inline]
    pub fn record_expirations(&self, count: u64) {
        self.bump(&self.expirations, count);
    }

    #[inline]
    pub fn record_failure(&self) {
        self.bump(&self.failures, 1);
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, by: u64) {
        if by == 0 {
            return;
        }
        counter.fetch_add(by, Ordering::Relaxed);
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        self.snapshot().hit_ratio()
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> TierMetricsSnapshot {
        TierMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tier Metrics Snapshot
// =============================================================================

/// Point-in-time snapshot of tier metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub failures: u64,
}

impl TierMetricsSnapshot {
    /// Calculate hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Global Cache Metrics
// =============================================================================

/// Counters for the whole cache
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub fast: CacheTierMetrics,
    pub durable: CacheTierMetrics,
    /// Extractions actually started
    pub extractions_started: AtomicU64,
    /// Callers that joined an extraction already in flight
    pub extractions_joined: AtomicU64,
    /// Extractions that ended in failure
    pub extractions_failed: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Get metrics for a specific tier
    pub fn tier(&self, tier: CacheTier) -> &CacheTierMetrics {
        match tier {
            CacheTier::Fast => &self.fast,
            CacheTier::Durable => &self.durable,
        }
    }

    pub fn record_extraction_started(&self) {
        self.extractions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_joined(&self) {
        self.extractions_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_extraction_failed(&self) {
        self.extractions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            fast: self.fast.snapshot(),
            durable: self.durable.snapshot(),
            extractions_started: self.extractions_started.load(Ordering::Relaxed),
            extractions_joined: self.extractions_joined.load(Ordering::Relaxed),
            extractions_failed: self.extractions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of all cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetricsSnapshot {
    pub fast: TierMetricsSnapshot,
    pub durable: TierMetricsSnapshot,
    pub extractions_started: u64,
    pub extractions_joined: u64,
    pub extractions_failed: u64,
}

impl CacheMetricsSnapshot {
    /// Overall hit ratio: any hit over every lookup
    ///
    /// Fast-tier misses cascade to the durable tier, so durable misses are
    /// the lookups nothing could serve.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.fast.hits + self.durable.hits;
        let total = hits + self.durable.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_line_alignment() {
        assert_eq!(std::mem::align_of::<CacheTierMetrics>(), CACHE_LINE_SIZE);
        assert!(std::mem::size_of::<CacheTierMetrics>() <= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_tier_metrics_operations() {
        let metrics = CacheTierMetrics::new();

        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);

        metrics.record_evictions(3);
        metrics.record_evictions(0);
        metrics.record_expirations(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.evictions, 3);
        assert_eq!(snapshot.expirations, 2);
        assert!(metrics.last_update_ms.load(Ordering::Acquire) > 0);
    }

    #[test]
    fn test_overall_hit_ratio() {
        let metrics = CacheMetrics::new();

        // fast hit, durable hit after fast miss, full miss
        metrics.tier(CacheTier::Fast).record_hit();
        metrics.tier(CacheTier::Fast).record_miss();
        metrics.tier(CacheTier::Durable).record_hit();
        metrics.tier(CacheTier::Fast).record_miss();
        metrics.tier(CacheTier::Durable).record_miss();

        let snapshot = metrics.snapshot();
        assert!((snapshot.hit_ratio() - 0.666).abs() < 0.01);
    }
}
