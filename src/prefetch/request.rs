//! Prefetch Requests
//!
//! Request sources, their base priorities and the effective-priority
//! function used to order the queue.

use crate::cache::entry::{CacheKey, CachePriority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Prefetch Source
// =============================================================================

/// Context that triggered a prefetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchSource {
    /// Next item in the play queue
    QueueNext,
    /// Pointer hovering over an item
    Hover,
    /// Items further down the play queue
    QueueUpcoming,
    /// Item visible in a feed
    VisibleFeed,
    /// Feed just loaded
    FeedLoad,
    /// Items below the viewport
    ScrollAhead,
    /// Background warming
    CacheWarm,
}

impl PrefetchSource {
    /// All sources, highest priority first
    pub const ALL: [PrefetchSource; 7] = [
        PrefetchSource::QueueNext,
        PrefetchSource::Hover,
        PrefetchSource::QueueUpcoming,
        PrefetchSource::VisibleFeed,
        PrefetchSource::FeedLoad,
        PrefetchSource::ScrollAhead,
        PrefetchSource::CacheWarm,
    ];

    /// Fixed priority level of this source
    pub fn priority(&self) -> CachePriority {
        match self {
            PrefetchSource::QueueNext => CachePriority::Critical,
            PrefetchSource::Hover | PrefetchSource::QueueUpcoming => CachePriority::High,
            PrefetchSource::VisibleFeed | PrefetchSource::FeedLoad => CachePriority::Normal,
            PrefetchSource::ScrollAhead | PrefetchSource::CacheWarm => CachePriority::Low,
        }
    }
}

impl fmt::Display for PrefetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrefetchSource::QueueNext => "queue_next",
            PrefetchSource::Hover => "hover",
            PrefetchSource::QueueUpcoming => "queue_upcoming",
            PrefetchSource::VisibleFeed => "visible_feed",
            PrefetchSource::FeedLoad => "feed_load",
            PrefetchSource::ScrollAhead => "scroll_ahead",
            PrefetchSource::CacheWarm => "cache_warm",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Priority Weights
// =============================================================================

/// Scores and penalties of the effective-priority function
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub critical: f64,
    pub high: f64,
    pub normal: f64,
    pub low: f64,
    /// Points lost per minute spent waiting
    pub age_penalty_per_minute: f64,
    /// Waiting time after which the age penalty stops growing
    pub max_age_minutes: f64,
    /// Points lost per failed attempt
    pub retry_penalty: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            critical: 100.0,
            high: 75.0,
            normal: 50.0,
            low: 25.0,
            age_penalty_per_minute: 1.0,
            max_age_minutes: 20.0,
            retry_penalty: 10.0,
        }
    }
}

impl PriorityWeights {
    /// Base score of a priority level
    pub fn base(&self, priority: CachePriority) -> f64 {
        match priority {
            CachePriority::Critical => self.critical,
            CachePriority::High => self.high,
            CachePriority::Normal => self.normal,
            CachePriority::Low => self.low,
        }
    }
}

// =============================================================================
// Prefetch Request
// =============================================================================

/// A request to resolve one content item ahead of playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchRequest {
    pub key: CacheKey,
    pub source: PrefetchSource,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl PrefetchRequest {
    /// Create a fresh request
    pub fn new(
        platform: impl Into<String>,
        content_id: impl Into<String>,
        source: PrefetchSource,
    ) -> Self {
        Self::for_key(CacheKey::new(platform, content_id), source)
    }

    /// Create a fresh request for an existing key
    pub fn for_key(key: CacheKey, source: PrefetchSource) -> Self {
        Self {
            key,
            source,
            requested_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Priority level of the request's source
    pub fn priority(&self) -> CachePriority {
        self.source.priority()
    }

    /// Copy of this request for the next attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Base score minus the capped age penalty minus the retry penalty
    pub fn effective_priority(&self, weights: &PriorityWeights, now: DateTime<Utc>) -> f64 {
        let waited_minutes = (now - self.requested_at).num_milliseconds().max(0) as f64 / 60_000.0;
        let age_penalty = waited_minutes.min(weights.max_age_minutes) * weights.age_penalty_per_minute;
        let retry_penalty = self.retry_count as f64 * weights.retry_penalty;

        weights.base(self.priority()) - age_penalty - retry_penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_source_priorities() {
        assert_eq!(PrefetchSource::QueueNext.priority(), CachePriority::Critical);
        assert_eq!(PrefetchSource::Hover.priority(), CachePriority::High);
        assert_eq!(PrefetchSource::QueueUpcoming.priority(), CachePriority::High);
        assert_eq!(PrefetchSource::VisibleFeed.priority(), CachePriority::Normal);
        assert_eq!(PrefetchSource::FeedLoad.priority(), CachePriority::Normal);
        assert_eq!(PrefetchSource::ScrollAhead.priority(), CachePriority::Low);
        assert_eq!(PrefetchSource::CacheWarm.priority(), CachePriority::Low);

        let ordered: Vec<_> = PrefetchSource::ALL.iter().map(|s| s.priority()).collect();
        assert!(ordered.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_source_serde_names() {
        let json = serde_json::to_string(&PrefetchSource::QueueNext).unwrap();
        assert_eq!(json, "\"queue_next\"");
        let source: PrefetchSource = serde_json::from_str("\"scroll_ahead\"").unwrap();
        assert_eq!(source, PrefetchSource::ScrollAhead);
        assert_eq!(PrefetchSource::CacheWarm.to_string(), "cache_warm");
    }

    #[test]
    fn test_age_penalty_is_capped() {
        let weights = PriorityWeights::default();
        let request = PrefetchRequest::new("youtube", "a", PrefetchSource::Hover);
        let t0 = request.requested_at;

        assert_eq!(request.effective_priority(&weights, t0), 75.0);
        assert_eq!(request.effective_priority(&weights, t0 + Duration::minutes(5)), 70.0);
        assert_eq!(request.effective_priority(&weights, t0 + Duration::minutes(20)), 55.0);
        assert_eq!(request.effective_priority(&weights, t0 + Duration::hours(3)), 55.0);
    }

    #[test]
    fn test_retry_penalty() {
        let weights = PriorityWeights::default();
        let request = PrefetchRequest::new("youtube", "a", PrefetchSource::QueueNext);
        let now = request.requested_at;

        let retried = request.next_attempt().next_attempt();
        assert_eq!(retried.retry_count, 2);
        assert_eq!(retried.requested_at, request.requested_at);
        assert_eq!(retried.effective_priority(&weights, now), 80.0);
    }

    #[test]
    fn test_aged_critical_still_beats_fresh_low() {
        let weights = PriorityWeights::default();
        let old = PrefetchRequest::new("youtube", "a", PrefetchSource::QueueNext);
        let now = old.requested_at + Duration::hours(1);
        let fresh = PrefetchRequest {
            requested_at: now,
            ..PrefetchRequest::new("youtube", "b", PrefetchSource::ScrollAhead)
        };

        assert!(old.effective_priority(&weights, now) > fresh.effective_priority(&weights, now));
    }
}
