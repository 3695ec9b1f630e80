//! Priority-Aware Eviction
//!
//! Ranks cache entries for eviction. Entries are ordered by retention value:
//! priority first (critical kept longest), then access count, then recency.
//! Victims are taken from the low end of that ordering, so low-priority,
//! rarely-read, stale entries go first. Protected keys are never candidates.

use crate::cache::entry::{CacheEntry, CachePriority};
use crate::cache::tier::CacheTier;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

// =============================================================================
// Eviction Candidate
// =============================================================================

/// Candidate for eviction with the metadata used to rank it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    /// Storage key (`platform:contentId`)
    pub key: String,
    /// Tier the entry lives in
    pub tier: CacheTier,
    /// Retention priority
    pub priority: CachePriority,
    /// Number of reads
    pub access_count: u64,
    /// Last read time
    pub last_accessed_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
}

impl EvictionCandidate {
    /// Build a candidate from an entry
    pub fn from_entry(entry: &CacheEntry, tier: CacheTier) -> Self {
        Self {
            key: entry.key.to_storage_key(),
            tier,
            priority: entry.priority,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
            expires_at: entry.expires_at,
        }
    }

    /// Check if the candidate has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Retention ordering: `Less` means `self` is evicted before `other`
    fn retention_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.access_count.cmp(&other.access_count))
            .then(self.last_accessed_at.cmp(&other.last_accessed_at))
            .then_with(|| self.key.cmp(&other.key))
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Outcome of an eviction selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPlan {
    /// Already-expired keys, removed regardless of rank or protection
    pub expired: Vec<String>,
    /// Keys evicted by rank
    pub ranked: Vec<String>,
}

impl EvictionPlan {
    /// Total number of keys to remove
    pub fn len(&self) -> usize {
        self.expired.len() + self.ranked.len()
    }

    /// Whether nothing needs removing
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.ranked.is_empty()
    }

    /// All keys to remove, expired first
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.expired.iter().chain(self.ranked.iter())
    }
}

/// Pick up to `count` victims among unprotected candidates
pub fn select_victims(
    candidates: &[EvictionCandidate],
    protected: &HashSet<String>,
    count: usize,
) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }

    let mut eligible: Vec<&EvictionCandidate> = candidates
        .iter()
        .filter(|c| !protected.contains(&c.key))
        .collect();

    eligible.sort_by(|a, b| a.retention_cmp(b));
    eligible.into_iter().take(count).map(|c| c.key.clone()).collect()
}

/// Plan eviction for a tier holding `candidates`
///
/// With `purge_expired`, expired entries are removed first and do not count
/// against the protected/priority ordering. The remaining population is then
/// brought to `capacity`, minus `margin` extra entries when any eviction is
/// needed at all.
pub fn plan_eviction(
    candidates: &[EvictionCandidate],
    protected: &HashSet<String>,
    capacity: usize,
    margin: usize,
    purge_expired: bool,
    now: DateTime<Utc>,
) -> EvictionPlan {
    let (expired, live): (Vec<EvictionCandidate>, Vec<EvictionCandidate>) = if purge_expired {
        candidates
            .iter()
            .cloned()
            .partition(|c| c.is_expired_at(now))
    } else {
        (Vec::new(), candidates.to_vec())
    };

    let overflow = live.len().saturating_sub(capacity);
    let count = if overflow == 0 {
        0
    } else {
        (overflow + margin).min(live.len())
    };

    EvictionPlan {
        expired: expired.into_iter().map(|c| c.key).collect(),
        ranked: select_victims(&live, protected, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candidate(
        id: &str,
        priority: CachePriority,
        access_count: u64,
        idle_secs: i64,
    ) -> EvictionCandidate {
        let now = Utc::now();
        EvictionCandidate {
            key: format!("youtube:{}", id),
            tier: CacheTier::Fast,
            priority,
            access_count,
            last_accessed_at: now - Duration::seconds(idle_secs),
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn test_low_priority_evicted_first() {
        let candidates = vec![
            candidate("critical", CachePriority::Critical, 0, 1000),
            candidate("low", CachePriority::Low, 50, 0),
            candidate("normal", CachePriority::Normal, 0, 1000),
        ];

        let victims = select_victims(&candidates, &HashSet::new(), 2);
        assert_eq!(victims, vec!["youtube:low", "youtube:normal"]);
    }

    #[test]
    fn test_access_count_then_recency() {
        let candidates = vec![
            candidate("popular", CachePriority::Normal, 10, 500),
            candidate("rare-recent", CachePriority::Normal, 1, 5),
            candidate("rare-stale", CachePriority::Normal, 1, 500),
        ];

        let victims = select_victims(&candidates, &HashSet::new(), 3);
        assert_eq!(
            victims,
            vec!["youtube:rare-stale", "youtube:rare-recent", "youtube:popular"]
        );
    }

    #[test]
    fn test_protected_never_selected() {
        let candidates = vec![
            candidate("protected", CachePriority::Low, 0, 9999),
            candidate("other", CachePriority::Critical, 100, 0),
        ];
        let protected: HashSet<String> = ["youtube:protected".to_string()].into();

        let victims = select_victims(&candidates, &protected, 2);
        assert_eq!(victims, vec!["youtube:other"]);
    }

    #[test]
    fn test_plan_purges_expired_first() {
        let now = Utc::now();
        let mut expired = candidate("expired", CachePriority::Critical, 100, 0);
        expired.expires_at = now - Duration::seconds(1);

        let candidates = vec![
            expired,
            candidate("a", CachePriority::Low, 0, 10),
            candidate("b", CachePriority::Normal, 0, 10),
            candidate("c", CachePriority::High, 0, 10),
        ];
        // Protection does not shield an expired entry
        let protected: HashSet<String> = ["youtube:expired".to_string()].into();

        let plan = plan_eviction(&candidates, &protected, 2, 0, true, now);
        assert_eq!(plan.expired, vec!["youtube:expired"]);
        assert_eq!(plan.ranked, vec!["youtube:a"]);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_plan_applies_margin_only_on_overflow() {
        let now = Utc::now();
        let candidates: Vec<_> = (0..5)
            .map(|i| candidate(&format!("k{}", i), CachePriority::Normal, i, 10))
            .collect();

        let plan = plan_eviction(&candidates, &HashSet::new(), 5, 2, true, now);
        assert!(plan.is_empty());

        let plan = plan_eviction(&candidates, &HashSet::new(), 4, 2, true, now);
        assert_eq!(plan.ranked.len(), 3);
        assert_eq!(plan.ranked[0], "youtube:k0");
    }

    #[test]
    fn test_plan_without_purge_ranks_expired_normally() {
        let now = Utc::now();
        let mut expired = candidate("expired", CachePriority::Critical, 5, 0);
        expired.expires_at = now - Duration::seconds(1);
        let candidates = vec![expired, candidate("low", CachePriority::Low, 0, 0)];

        let plan = plan_eviction(&candidates, &HashSet::new(), 1, 0, false, now);
        assert!(plan.expired.is_empty());
        assert_eq!(plan.ranked, vec!["youtube:low"]);
    }
}
