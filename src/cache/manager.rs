//! Tiered Stream Cache
//!
//! Coordinates the fast and durable tiers, the protected set, eviction and
//! the per-key extraction records. Durable-tier failures are logged and
//! absorbed: every operation keeps working on the fast tier alone.

use crate::cache::entry::{CacheEntry, CacheKey, CachePriority, StreamDescriptor};
use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::eviction::{plan_eviction, EvictionCandidate};
use crate::cache::extraction::{
    ExtractionHandle, ExtractionOutcome, ExtractionState, ExtractionStatus, ExtractionTracker,
    JoinKind,
};
use crate::cache::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::cache::storage::{
    DurableStore, FastTier, SharedDurableStore, StoredEntry, TierRead, VolatileStore,
};
use crate::cache::tier::{CacheTier, TierConfig};
use crate::cache::CacheLookupResult;
use crate::error::{Error, ExtractionError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the tiered stream cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamCacheConfig {
    /// Fast tier configuration
    pub fast: TierConfig,
    /// Durable tier configuration
    pub durable: TierConfig,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for StreamCacheConfig {
    fn default() -> Self {
        Self {
            fast: TierConfig::fast_default(),
            durable: TierConfig::durable_default(),
            event_channel_capacity: 1024,
        }
    }
}

impl StreamCacheConfig {
    /// Reject configurations the cache cannot honor
    pub fn validate(&self) -> Result<()> {
        for (tier, config) in [(CacheTier::Fast, &self.fast), (CacheTier::Durable, &self.durable)] {
            if config.capacity == 0 {
                return Err(Error::Configuration(format!("{} tier capacity must be > 0", tier)));
            }
            if config.ttl_ms == 0 {
                return Err(Error::Configuration(format!("{} tier TTL must be > 0", tier)));
            }
        }
        if self.fast.ttl_ms >= self.durable.ttl_ms {
            return Err(Error::Configuration(format!(
                "fast tier TTL ({}ms) must be shorter than durable tier TTL ({}ms)",
                self.fast.ttl_ms, self.durable.ttl_ms
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event channel capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Per-platform entry counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCounts {
    pub fast: usize,
    pub durable: usize,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live entries in the fast tier
    pub fast_entries: usize,
    /// Entries in the durable tier, `None` when it could not be read
    pub durable_entries: Option<usize>,
    pub durable_available: bool,
    /// Keys with an extraction in flight
    pub extracting: usize,
    /// Keys whose last extraction failed
    pub failed: usize,
    pub protected: usize,
    pub by_platform: BTreeMap<String, PlatformCounts>,
    pub counters: CacheMetricsSnapshot,
}

/// Entries removed by a TTL sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub fast: usize,
    pub durable: usize,
}

// =============================================================================
// Tiered Stream Cache
// =============================================================================

/// Two-tier cache of resolved stream descriptors
pub struct TieredStreamCache {
    /// Fast tier
    fast: FastTier,
    /// Durable tier
    durable: SharedDurableStore,
    /// Keys exempt from ranked eviction
    protected: RwLock<HashSet<String>>,
    /// Per-key extraction records
    extractions: ExtractionTracker,
    /// Metrics
    metrics: CacheMetrics,
    /// Configuration
    config: StreamCacheConfig,
    /// Event broadcaster
    event_tx: broadcast::Sender<CacheEvent>,
    /// Whether the last durable call succeeded
    durable_healthy: AtomicBool,
}

impl TieredStreamCache {
    /// Create a cache with default configuration over a volatile durable tier
    pub fn new() -> Arc<Self> {
        Self::from_parts(StreamCacheConfig::default(), Arc::new(VolatileStore::new()))
    }

    /// Create a cache with custom configuration
    pub fn with_config(config: StreamCacheConfig, durable: SharedDurableStore) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::from_parts(config, durable))
    }

    fn from_parts(config: StreamCacheConfig, durable: SharedDurableStore) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        info!(
            store = durable.name(),
            fast_capacity = config.fast.capacity,
            durable_capacity = config.durable.capacity,
            "Stream cache initialized"
        );

        Arc::new(Self {
            fast: FastTier::new(),
            durable,
            protected: RwLock::new(HashSet::new()),
            extractions: ExtractionTracker::new(),
            metrics: CacheMetrics::new(),
            config,
            event_tx,
            durable_healthy: AtomicBool::new(true),
        })
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    /// Emit a cache event
    fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Active configuration
    pub fn config(&self) -> &StreamCacheConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the last durable-tier call succeeded
    pub fn durable_available(&self) -> bool {
        self.durable_healthy.load(Ordering::Acquire)
    }

    /// Check durable-tier reachability
    pub async fn health_check(&self) -> bool {
        let healthy = matches!(self.durable.health_check().await, Ok(true));
        self.note_durable(
            "health_check",
            if healthy {
                Ok(())
            } else {
                Err(Error::StoreUnavailable {
                    store: self.durable.name().to_string(),
                })
            },
        );
        healthy
    }

    /// Record the result of a durable call, tracking availability transitions
    fn note_durable<T>(&self, op: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                if !self.durable_healthy.swap(true, Ordering::AcqRel) {
                    info!(store = self.durable.name(), "Durable tier recovered");
                    self.emit_event(CacheEvent::TierRecovered {
                        tier: CacheTier::Durable,
                    });
                }
                Some(value)
            }
            Err(e) => {
                self.metrics.durable.record_failure();
                if self.durable_healthy.swap(false, Ordering::AcqRel) {
                    warn!(
                        store = self.durable.name(),
                        op,
                        error = %e,
                        "Durable tier unavailable, serving from fast tier only"
                    );
                    self.emit_event(CacheEvent::TierUnavailable {
                        tier: CacheTier::Durable,
                        reason: e.to_string(),
                    });
                } else {
                    debug!(store = self.durable.name(), op, error = %e, "Durable call failed");
                }
                None
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fast-tier-only read for hot-path decisions
    ///
    /// Never touches the durable tier and never yields.
    pub fn get_fast(&self, key: &CacheKey) -> Option<Arc<StreamDescriptor>> {
        match self.fast.read(&key.to_storage_key(), Utc::now()) {
            TierRead::Hit(entry) => {
                self.metrics.fast.record_hit();
                Some(entry.descriptor)
            }
            TierRead::Expired => {
                self.metrics.fast.record_expirations(1);
                self.metrics.fast.record_miss();
                None
            }
            TierRead::Miss => {
                self.metrics.fast.record_miss();
                None
            }
        }
    }

    /// Fast-tier membership test
    pub fn has(&self, key: &CacheKey) -> bool {
        self.fast.contains_live(&key.to_storage_key(), Utc::now())
    }

    /// Membership test across both tiers
    pub async fn has_any(&self, key: &CacheKey) -> bool {
        if self.has(key) {
            return true;
        }
        let stored = self.durable.get(&key.to_storage_key()).await;
        self.note_durable("get", stored)
            .flatten()
            .is_some_and(|e| !e.is_expired_at(Utc::now()))
    }

    /// Read a descriptor from either tier
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<StreamDescriptor>> {
        self.lookup(key).await.into_descriptor()
    }

    /// Read a descriptor, reporting which tier served it
    ///
    /// A durable hit is promoted into the fast tier. Access stats are bumped
    /// in the serving tier and mirrored to the durable tier in the background.
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookupResult {
        let storage_key = key.to_storage_key();
        let now = Utc::now();

        match self.fast.read(&storage_key, now) {
            TierRead::Hit(entry) => {
                self.metrics.fast.record_hit();
                let _ = self.mirror_access(&entry);
                self.emit_event(CacheEvent::hit(key, CacheTier::Fast, false));
                return CacheLookupResult::Hit {
                    descriptor: entry.descriptor,
                    tier: CacheTier::Fast,
                    promoted: false,
                };
            }
            TierRead::Expired => {
                self.metrics.fast.record_expirations(1);
                self.metrics.fast.record_miss();
            }
            TierRead::Miss => self.metrics.fast.record_miss(),
        }

        let stored = self.durable.get(&storage_key).await;
        let stored = match self.note_durable("get", stored).flatten() {
            Some(stored) => stored,
            None => {
                self.metrics.durable.record_miss();
                self.emit_event(CacheEvent::miss(key));
                return CacheLookupResult::Miss;
            }
        };

        if stored.is_expired_at(now) {
            self.metrics.durable.record_expirations(1);
            self.metrics.durable.record_miss();
            let _ = self.spawn_durable_delete(storage_key, stored.cached_at);
            self.emit_event(CacheEvent::miss(key));
            return CacheLookupResult::Miss;
        }

        self.metrics.durable.record_hit();
        let mut entry = CacheEntry::from(stored);
        entry.record_access_at(now);
        let _ = self.mirror_access(&entry);

        self.fast.insert(entry.promoted(self.config.fast.ttl(), now));
        self.metrics.fast.record_promotion();
        self.enforce_fast_capacity();

        debug!(key = %key, "Promoted durable entry to fast tier");
        self.emit_event(CacheEvent::hit(key, CacheTier::Durable, true));

        CacheLookupResult::Hit {
            descriptor: entry.descriptor,
            tier: CacheTier::Durable,
            promoted: true,
        }
    }

    /// Best-effort copy of a read's stats into the durable tier
    ///
    /// Only applies while the durable tier still holds the version the read
    /// served, so a `set` landing in between is never overwritten. The
    /// returned handle may be dropped; failures only affect stats.
    pub fn mirror_access(&self, entry: &CacheEntry) -> JoinHandle<Result<bool>> {
        let durable = Arc::clone(&self.durable);
        let key = entry.key.to_storage_key();
        let cached_at = entry.cached_at;
        let accessed_at = entry.last_accessed_at;

        tokio::spawn(async move { durable.record_access(&key, cached_at, accessed_at).await })
    }

    /// Drop an expired durable entry unless it was rewritten meanwhile
    fn spawn_durable_delete(&self, key: String, cached_at: DateTime<Utc>) -> JoinHandle<Result<bool>> {
        let durable = Arc::clone(&self.durable);
        tokio::spawn(async move { durable.delete_version(&key, cached_at).await })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a descriptor to both tiers and clear the key's extraction record
    pub async fn set(&self, key: &CacheKey, descriptor: StreamDescriptor, priority: CachePriority) {
        self.store(key, Arc::new(descriptor), priority).await;
        self.extractions.clear(&key.to_storage_key());
    }

    /// Write to both tiers and run eviction, returns whether the durable write landed
    async fn store(
        &self,
        key: &CacheKey,
        descriptor: Arc<StreamDescriptor>,
        priority: CachePriority,
    ) -> bool {
        let now = Utc::now();

        // Fast tier first so readers in the same tick see it
        let fast_entry =
            CacheEntry::created_at(key.clone(), Arc::clone(&descriptor), priority, self.config.fast.ttl(), now);
        self.fast.insert(fast_entry);
        self.metrics.fast.record_write();
        self.enforce_fast_capacity();

        let durable_entry =
            CacheEntry::created_at(key.clone(), descriptor, priority, self.config.durable.ttl(), now);
        let written = self.durable.put(StoredEntry::from(&durable_entry)).await;
        let durable = self.note_durable("put", written).is_some();
        if durable {
            self.metrics.durable.record_write();
            self.enforce_durable_capacity(now).await;
        }

        debug!(key = %key, priority = %priority, durable, "Stored stream descriptor");
        self.emit_event(CacheEvent::Stored {
            key: key.to_storage_key(),
            priority,
            durable,
        });
        durable
    }

    /// Remove a key from both tiers
    ///
    /// Returns true if the key was present in either tier.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let storage_key = key.to_storage_key();
        let in_fast = self.fast.remove(&storage_key).is_some();
        let deleted = self.durable.delete(&storage_key).await;
        let in_durable = self.note_durable("delete", deleted).unwrap_or(false);

        if in_fast || in_durable {
            debug!(key = %key, "Removed stream descriptor");
            self.emit_event(CacheEvent::Removed { key: storage_key });
        }
        in_fast || in_durable
    }

    /// Remove every entry from both tiers
    pub async fn clear(&self) {
        let fast_removed = self.fast.len() as u64;
        self.fast.clear();
        self.emit_event(CacheEvent::TierCleared {
            tier: CacheTier::Fast,
            entries_removed: fast_removed,
        });

        let count = self.durable.count().await;
        let durable_removed = self.note_durable("count", count).unwrap_or(0) as u64;
        let cleared = self.durable.clear().await;
        if self.note_durable("clear", cleared).is_some() {
            self.emit_event(CacheEvent::TierCleared {
                tier: CacheTier::Durable,
                entries_removed: durable_removed,
            });
        }

        info!(fast = fast_removed, durable = durable_removed, "Cleared stream cache");
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    fn protected_snapshot(&self) -> HashSet<String> {
        self.protected.read().clone()
    }

    /// Bring the fast tier back under capacity, returns the number evicted
    fn enforce_fast_capacity(&self) -> usize {
        let config = &self.config.fast;
        if !config.should_evict(self.fast.len()) {
            return 0;
        }

        let plan = plan_eviction(
            &self.fast.candidates(),
            &self.protected_snapshot(),
            config.capacity,
            config.eviction_margin,
            false,
            Utc::now(),
        );

        let mut evicted = 0;
        for key in &plan.ranked {
            if self.fast.remove(key).is_some() {
                evicted += 1;
                self.emit_event(CacheEvent::evicted(key.as_str(), CacheTier::Fast, EvictionReason::Capacity));
            }
        }
        self.metrics.fast.record_evictions(evicted as u64);

        if evicted > 0 {
            debug!(evicted, remaining = self.fast.len(), "Evicted fast tier entries");
        }
        evicted
    }

    /// Bring the durable tier back under capacity
    ///
    /// Expired entries go first, then ranked eviction with the tier's margin.
    async fn enforce_durable_capacity(&self, now: DateTime<Utc>) -> usize {
        let config = &self.config.durable;
        let count = self.durable.count().await;
        match self.note_durable("count", count) {
            Some(count) if config.should_evict(count) => {}
            _ => return 0,
        }

        let listed = self.durable.list_all().await;
        let entries = match self.note_durable("list_all", listed) {
            Some(entries) => entries,
            None => return 0,
        };

        let versions: HashMap<String, DateTime<Utc>> = entries
            .iter()
            .map(|stored| (stored.storage_key(), stored.cached_at))
            .collect();
        let candidates: Vec<EvictionCandidate> = entries
            .into_iter()
            .map(|stored| EvictionCandidate::from_entry(&CacheEntry::from(stored), CacheTier::Durable))
            .collect();

        let plan = plan_eviction(
            &candidates,
            &self.protected_snapshot(),
            config.capacity,
            config.eviction_margin,
            true,
            now,
        );

        let versioned = |keys: &[String]| -> Vec<(String, DateTime<Utc>)> {
            keys.iter()
                .filter_map(|k| versions.get(k).map(|at| (k.clone(), *at)))
                .collect()
        };
        let expired = self
            .delete_durable(&versioned(&plan.expired), EvictionReason::Expired)
            .await;
        let ranked = self
            .delete_durable(&versioned(&plan.ranked), EvictionReason::Capacity)
            .await;
        self.metrics.durable.record_expirations(expired as u64);
        self.metrics.durable.record_evictions(ranked as u64);

        debug!(expired, ranked, "Evicted durable tier entries");
        expired + ranked
    }

    /// Delete listed durable entries, skipping any rewritten since listing
    async fn delete_durable(&self, keys: &[(String, DateTime<Utc>)], reason: EvictionReason) -> usize {
        let mut deleted = 0;
        for (key, cached_at) in keys {
            let result = self.durable.delete_version(key, *cached_at).await;
            if self.note_durable("delete", result).unwrap_or(false) {
                deleted += 1;
                self.emit_event(CacheEvent::evicted(key.as_str(), CacheTier::Durable, reason));
            }
        }
        deleted
    }

    /// Drop expired entries from both tiers
    pub async fn sweep_expired(&self) -> SweepReport {
        let now = Utc::now();

        let fast_expired = self.fast.remove_expired(now);
        for key in &fast_expired {
            self.emit_event(CacheEvent::evicted(key.as_str(), CacheTier::Fast, EvictionReason::Expired));
        }
        self.metrics.fast.record_expirations(fast_expired.len() as u64);

        let listed = self.durable.list_all().await;
        let durable_expired: Vec<(String, DateTime<Utc>)> = self
            .note_durable("list_all", listed)
            .unwrap_or_default()
            .into_iter()
            .filter(|e| e.is_expired_at(now))
            .map(|e| (e.storage_key(), e.cached_at))
            .collect();
        let durable = self.delete_durable(&durable_expired, EvictionReason::Expired).await;
        self.metrics.durable.record_expirations(durable as u64);

        let report = SweepReport {
            fast: fast_expired.len(),
            durable,
        };
        if report.fast + report.durable > 0 {
            debug!(fast = report.fast, durable = report.durable, "Swept expired entries");
        }
        report
    }

    // =========================================================================
    // Protection
    // =========================================================================

    /// Exempt a key from ranked eviction
    pub fn protect(&self, key: &CacheKey) {
        self.protected.write().insert(key.to_storage_key());
    }

    /// Lift a key's eviction exemption
    pub fn unprotect(&self, key: &CacheKey) {
        self.protected.write().remove(&key.to_storage_key());
    }

    /// Lift every eviction exemption
    pub fn clear_protections(&self) {
        self.protected.write().clear();
    }

    pub fn is_protected(&self, key: &CacheKey) -> bool {
        self.protected.read().contains(&key.to_storage_key())
    }

    /// Protected keys, sorted
    pub fn protected_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.protected.read().iter().cloned().collect();
        keys.sort();
        keys
    }

    // =========================================================================
    // Extraction State
    // =========================================================================

    /// Extraction status of a key
    pub fn get_extraction_status(&self, key: &CacheKey) -> ExtractionStatus {
        self.extractions.status(&key.to_storage_key())
    }

    /// Full extraction record of a key
    pub fn extraction_state(&self, key: &CacheKey) -> Option<ExtractionState> {
        self.extractions.state(&key.to_storage_key())
    }

    /// Set a key's extraction record, `Idle` removes it
    pub fn set_extraction_status(
        &self,
        key: &CacheKey,
        status: ExtractionStatus,
        handle: Option<ExtractionHandle>,
        error: Option<ExtractionError>,
    ) {
        self.extractions
            .set_status(&key.to_storage_key(), status, handle, error);
    }

    /// Whether an extraction is in flight for a key
    pub fn is_extracting(&self, key: &CacheKey) -> bool {
        self.extractions.is_extracting(&key.to_storage_key())
    }

    /// Join the in-flight extraction for `key` or start one running `op`
    ///
    /// At most one extraction runs per key: concurrent callers receive clones
    /// of the same handle and observe the same outcome. The extraction runs
    /// on its own task, so dropping the handle only abandons interest in the
    /// result. On success the descriptor is written through [`Self::set`]
    /// semantics; on failure the key is left `Failed`.
    pub fn resolve_with<F, Fut>(
        self: &Arc<Self>,
        key: &CacheKey,
        priority: CachePriority,
        op: F,
    ) -> ExtractionHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<StreamDescriptor, ExtractionError>> + Send + 'static,
    {
        let storage_key = key.to_storage_key();

        let (handle, kind) = self.extractions.join_or_start(&storage_key, |attempt| {
            let cache = Arc::clone(self);
            let task_key = key.clone();
            let extraction = op();
            let task = tokio::spawn(async move {
                cache.run_extraction(task_key, priority, attempt, extraction).await
            });

            async move {
                task.await
                    .unwrap_or_else(|e| Err(ExtractionError::Aborted(e.to_string())))
            }
            .boxed()
            .shared()
        });

        match kind {
            JoinKind::Started { attempt } => {
                self.metrics.record_extraction_started();
                debug!(key = %key, attempt, priority = %priority, "Started extraction");
                self.emit_event(CacheEvent::ExtractionStarted { key: storage_key });
            }
            JoinKind::Joined => {
                self.metrics.record_extraction_joined();
                debug!(key = %key, "Joined in-flight extraction");
            }
        }

        handle
    }

    async fn run_extraction<Fut>(
        self: Arc<Self>,
        key: CacheKey,
        priority: CachePriority,
        attempt: u64,
        extraction: Fut,
    ) -> ExtractionOutcome
    where
        Fut: Future<Output = std::result::Result<StreamDescriptor, ExtractionError>>,
    {
        let storage_key = key.to_storage_key();

        let outcome = match extraction.await {
            Ok(descriptor) if descriptor.is_playable() => Ok(Arc::new(descriptor)),
            Ok(descriptor) => Err(match descriptor.error {
                Some(reason) => ExtractionError::Rejected(reason),
                None => ExtractionError::NoStream {
                    key: storage_key.clone(),
                },
            }),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(descriptor) => {
                self.store(&key, Arc::clone(descriptor), priority).await;
                self.extractions.finish(&storage_key, attempt, None);
                info!(key = %key, quality = ?descriptor.quality, "Extraction completed");
                self.emit_event(CacheEvent::ExtractionCompleted { key: storage_key });
            }
            Err(e) => {
                self.metrics.record_extraction_failed();
                self.extractions
                    .finish(&storage_key, attempt, Some(e.clone()));
                warn!(key = %key, error = %e, "Extraction failed");
                self.emit_event(CacheEvent::ExtractionFailed {
                    key: storage_key,
                    error: e.to_string(),
                });
            }
        }

        outcome
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Entry counts per tier and platform, extraction and protection counts
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let mut by_platform: BTreeMap<String, PlatformCounts> = BTreeMap::new();

        let mut fast_entries = 0;
        for entry in self.fast.entries() {
            if entry.is_expired_at(now) {
                continue;
            }
            fast_entries += 1;
            by_platform.entry(entry.key.platform).or_default().fast += 1;
        }

        let listed = self.durable.list_all().await;
        let durable_entries = self.note_durable("list_all", listed).map(|entries| {
            let live: Vec<StoredEntry> = entries.into_iter().filter(|e| !e.is_expired_at(now)).collect();
            for stored in &live {
                by_platform
                    .entry(stored.key.platform.clone())
                    .or_default()
                    .durable += 1;
            }
            live.len()
        });

        CacheStats {
            fast_entries,
            durable_entries,
            durable_available: self.durable_available(),
            extracting: self.extractions.extracting_count(),
            failed: self.extractions.failed_count(),
            protected: self.protected.read().len(),
            by_platform,
            counters: self.metrics.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config(fast_capacity: usize, durable_capacity: usize) -> StreamCacheConfig {
        StreamCacheConfig {
            fast: TierConfig {
                capacity: fast_capacity,
                ttl_ms: 60_000,
                eviction_margin: 0,
            },
            durable: TierConfig {
                capacity: durable_capacity,
                ttl_ms: 120_000,
                eviction_margin: 2,
            },
            event_channel_capacity: 256,
        }
    }

    fn test_cache(config: StreamCacheConfig) -> (Arc<TieredStreamCache>, Arc<VolatileStore>) {
        let store = Arc::new(VolatileStore::new());
        let cache = TieredStreamCache::with_config(config, store.clone()).unwrap();
        (cache, store)
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new("youtube", id)
    }

    fn descriptor(id: &str) -> StreamDescriptor {
        StreamDescriptor::new(format!("https://cdn.example/{}.m3u8", id))
    }

    #[test]
    fn test_config_validation() {
        assert!(StreamCacheConfig::default().validate().is_ok());

        let mut bad = StreamCacheConfig::default();
        bad.fast.ttl_ms = bad.durable.ttl_ms;
        assert_matches!(bad.validate(), Err(Error::Configuration(_)));

        let mut bad = StreamCacheConfig::default();
        bad.durable.capacity = 0;
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let (cache, store) = test_cache(config(10, 20));

        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;

        assert!(cache.has(&key("a")));
        assert_eq!(cache.get_fast(&key("a")).unwrap().stream_url, descriptor("a").stream_url);
        assert_matches!(
            cache.lookup(&key("a")).await,
            CacheLookupResult::Hit { tier: CacheTier::Fast, promoted: false, .. }
        );
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(cache.get(&key("missing")).await.is_none());
        assert!(!cache.has(&key("missing")));
    }

    #[tokio::test]
    async fn test_durable_hit_promotes() {
        let (cache, _store) = test_cache(config(10, 20));
        cache.set(&key("a"), descriptor("a"), CachePriority::High).await;

        // Simulate a restart losing the fast tier
        cache.fast.clear();
        assert!(!cache.has(&key("a")));
        assert!(cache.has_any(&key("a")).await);

        assert_matches!(
            cache.lookup(&key("a")).await,
            CacheLookupResult::Hit { tier: CacheTier::Durable, promoted: true, .. }
        );
        assert!(cache.has(&key("a")));
        assert_eq!(cache.metrics().fast.promotions, 1);
    }

    #[tokio::test]
    async fn test_promoted_entry_never_outlives_fast_ttl() {
        let (cache, store) = test_cache(config(10, 20));
        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        cache.fast.clear();

        cache.get(&key("a")).await.unwrap();
        let promoted = cache.fast.entries().pop().unwrap();
        let stored = store.get("youtube:a").await.unwrap().unwrap();

        assert!(promoted.expires_at < stored.expires_at);
        assert!(promoted.expires_at <= Utc::now() + chrono::Duration::milliseconds(60_000));
    }

    #[tokio::test]
    async fn test_expired_entries_never_returned() {
        let mut cfg = config(10, 20);
        cfg.fast.ttl_ms = 20;
        cfg.durable.ttl_ms = 40;
        let (cache, store) = test_cache(cfg);

        cache.set(&key("a"), descriptor("a"), CachePriority::Critical).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Still physically stored in the durable tier
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(cache.get_fast(&key("a")).is_none());
        assert!(!cache.has(&key("a")));
        assert!(!cache.has_any(&key("a")).await);
        assert!(cache.get(&key("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_fast_eviction_respects_protection() {
        let (cache, _store) = test_cache(config(3, 50));

        cache.set(&key("protected"), descriptor("p"), CachePriority::Low).await;
        cache.protect(&key("protected"));

        for id in ["b", "c", "d", "e", "f"] {
            cache.set(&key(id), descriptor(id), CachePriority::Critical).await;
        }

        assert!(cache.has(&key("protected")));
        assert_eq!(cache.fast.len(), 3);
        assert!(cache.metrics().fast.evictions >= 3);
    }

    #[tokio::test]
    async fn test_fast_eviction_prefers_low_priority() {
        let (cache, _store) = test_cache(config(2, 50));

        cache.set(&key("low"), descriptor("low"), CachePriority::Low).await;
        cache.set(&key("high"), descriptor("high"), CachePriority::High).await;
        cache.set(&key("normal"), descriptor("normal"), CachePriority::Normal).await;

        assert!(!cache.has(&key("low")));
        assert!(cache.has(&key("high")));
        assert!(cache.has(&key("normal")));
    }

    #[tokio::test]
    async fn test_durable_eviction_with_margin() {
        let (cache, store) = test_cache(config(50, 5));

        for i in 0..5 {
            cache
                .set(&key(&format!("k{}", i)), descriptor("x"), CachePriority::Normal)
                .await;
        }
        assert_eq!(store.count().await.unwrap(), 5);

        // One over capacity evicts the overflow plus a margin of 2
        cache.set(&key("k5"), descriptor("x"), CachePriority::Critical).await;
        assert_eq!(store.count().await.unwrap(), 3);
        assert!(store.get("youtube:k5").await.unwrap().is_some());
        assert_eq!(cache.metrics().durable.evictions, 3);
    }

    #[tokio::test]
    async fn test_durable_outage_degrades_to_fast_tier() {
        let (cache, store) = test_cache(config(10, 20));
        let mut events = cache.subscribe();
        store.set_available(false);

        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        cache.set(&key("b"), descriptor("b"), CachePriority::Normal).await;

        assert!(!cache.durable_available());
        assert!(cache.get(&key("a")).await.is_some());
        assert!(cache.get(&key("zzz")).await.is_none());
        assert!(cache.remove(&key("b")).await);

        let stats = cache.stats().await;
        assert_eq!(stats.durable_entries, None);
        assert_eq!(stats.fast_entries, 1);

        store.set_available(true);
        cache.set(&key("c"), descriptor("c"), CachePriority::Normal).await;
        assert!(cache.durable_available());

        let mut unavailable = 0;
        let mut recovered = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                CacheEvent::TierUnavailable { .. } => unavailable += 1,
                CacheEvent::TierRecovered { .. } => recovered += 1,
                _ => {}
            }
        }
        assert_eq!(unavailable, 1);
        assert_eq!(recovered, 1);
    }

    #[tokio::test]
    async fn test_mirror_access_updates_durable_stats() {
        let (cache, store) = test_cache(config(10, 20));
        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;

        let entry = cache.fast.read("youtube:a", Utc::now()).into_entry().unwrap();
        assert!(cache.mirror_access(&entry).await.unwrap().unwrap());

        let stored = store.get("youtube:a").await.unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert_eq!(stored.last_accessed_at, entry.last_accessed_at);
    }

    /// Durable store whose reads and versioned updates lag behind `put`
    struct LaggingStore {
        inner: VolatileStore,
        lag: Duration,
    }

    impl LaggingStore {
        fn new(lag_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                inner: VolatileStore::new(),
                lag: Duration::from_millis(lag_ms),
            })
        }
    }

    #[async_trait::async_trait]
    impl DurableStore for LaggingStore {
        fn name(&self) -> &'static str {
            "lagging"
        }

        async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
            tokio::time::sleep(self.lag).await;
            self.inner.get(key).await
        }

        async fn put(&self, entry: StoredEntry) -> Result<()> {
            self.inner.put(entry).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn record_access(
            &self,
            key: &str,
            cached_at: DateTime<Utc>,
            accessed_at: DateTime<Utc>,
        ) -> Result<bool> {
            tokio::time::sleep(self.lag).await;
            self.inner.record_access(key, cached_at, accessed_at).await
        }

        async fn delete_version(&self, key: &str, cached_at: DateTime<Utc>) -> Result<bool> {
            tokio::time::sleep(self.lag).await;
            self.inner.delete_version(key, cached_at).await
        }

        async fn list_all(&self) -> Result<Vec<StoredEntry>> {
            self.inner.list_all().await
        }

        async fn count(&self) -> Result<usize> {
            self.inner.count().await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }

        async fn health_check(&self) -> Result<bool> {
            self.inner.health_check().await
        }
    }

    fn lagging_cache() -> (Arc<TieredStreamCache>, Arc<LaggingStore>) {
        let store = LaggingStore::new(50);
        let cache = TieredStreamCache::with_config(config(10, 20), store.clone()).unwrap();
        (cache, store)
    }

    async fn durable_url(store: &LaggingStore, id: &str) -> Option<String> {
        store
            .inner
            .get(&format!("youtube:{}", id))
            .await
            .unwrap()
            .and_then(|e| e.descriptor.stream_url)
    }

    #[tokio::test]
    async fn test_fast_hit_stats_never_overwrite_newer_set() {
        let (cache, store) = lagging_cache();
        cache
            .set(&key("a"), StreamDescriptor::new("https://old"), CachePriority::Normal)
            .await;

        // Fast hit, stats mirror still pending when the new descriptor lands
        assert!(cache.get_fast(&key("a")).is_some());
        let hit = cache.get(&key("a")).await.unwrap();
        assert_eq!(hit.stream_url.as_deref(), Some("https://old"));
        cache
            .set(&key("a"), StreamDescriptor::new("https://new"), CachePriority::Normal)
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(durable_url(&store, "a").await.as_deref(), Some("https://new"));
        assert_eq!(store.inner.get("youtube:a").await.unwrap().unwrap().access_count, 0);
        assert!(cache.durable_available());
    }

    #[tokio::test]
    async fn test_promotion_stats_never_overwrite_newer_set() {
        let (cache, store) = lagging_cache();
        let mut stored = crate::cache::storage::test_support::stored_entry("b", Duration::from_secs(60));
        stored.descriptor = StreamDescriptor::new("https://old");
        store.inner.put(stored).await.unwrap();

        let result = cache.lookup(&key("b")).await;
        assert_eq!(result.tier(), Some(CacheTier::Durable));
        cache
            .set(&key("b"), StreamDescriptor::new("https://new"), CachePriority::High)
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let durable = store.inner.get("youtube:b").await.unwrap().unwrap();
        assert_eq!(durable.descriptor.stream_url.as_deref(), Some("https://new"));
        assert_eq!(durable.priority, CachePriority::High);
        assert_eq!(durable.access_count, 0);
    }

    #[tokio::test]
    async fn test_expired_cleanup_spares_newer_set() {
        let (cache, store) = lagging_cache();
        let mut stored = crate::cache::storage::test_support::stored_entry("c", Duration::ZERO);
        stored.descriptor = StreamDescriptor::new("https://old");
        store.inner.put(stored).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.get(&key("c")).await.is_none());
        cache
            .set(&key("c"), StreamDescriptor::new("https://new"), CachePriority::Normal)
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(durable_url(&store, "c").await.as_deref(), Some("https://new"));
    }

    #[tokio::test]
    async fn test_expired_cleanup_removes_untouched_entry() {
        let (cache, store) = lagging_cache();
        store
            .inner
            .put(crate::cache::storage::test_support::stored_entry("d", Duration::ZERO))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(cache.get(&key("d")).await.is_none());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.inner.get("youtube:d").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (cache, store) = test_cache(config(10, 20));
        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        cache.set(&key("b"), descriptor("b"), CachePriority::Normal).await;

        assert!(cache.remove(&key("a")).await);
        assert!(!cache.remove(&key("a")).await);
        assert!(cache.get(&key("a")).await.is_none());

        cache.clear().await;
        assert!(!cache.has(&key("b")));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_clears_extraction_state() {
        let (cache, _store) = test_cache(config(10, 20));
        cache.set_extraction_status(
            &key("a"),
            ExtractionStatus::Failed,
            None,
            Some(ExtractionError::Unreachable("timeout".into())),
        );
        assert_eq!(cache.get_extraction_status(&key("a")), ExtractionStatus::Failed);

        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        assert_eq!(cache.get_extraction_status(&key("a")), ExtractionStatus::Idle);
        assert!(cache.extraction_state(&key("a")).is_none());
    }

    #[tokio::test]
    async fn test_resolve_with_single_flight() {
        let (cache, _store) = test_cache(config(10, 20));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<ExtractionHandle> = (0..8)
            .map(|_| {
                let calls = Arc::clone(&calls);
                cache.resolve_with(&key("abc"), CachePriority::Critical, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(descriptor("abc"))
                })
            })
            .collect();

        assert!(cache.is_extracting(&key("abc")));

        let results = futures::future::join_all(handles).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }

        assert_eq!(cache.get_extraction_status(&key("abc")), ExtractionStatus::Idle);
        assert!(cache.get(&key("abc")).await.is_some());

        let metrics = cache.metrics();
        assert_eq!(metrics.extractions_started, 1);
        assert_eq!(metrics.extractions_joined, 7);
    }

    #[tokio::test]
    async fn test_resolve_with_failure_leaves_failed() {
        let (cache, _store) = test_cache(config(10, 20));

        let result = cache
            .resolve_with(&key("a"), CachePriority::Normal, || async {
                Err(ExtractionError::Remote {
                    status: 502,
                    message: "bad gateway".into(),
                })
            })
            .await;

        assert_matches!(result, Err(ExtractionError::Remote { status: 502, .. }));
        let state = cache.extraction_state(&key("a")).unwrap();
        assert_eq!(state.status, ExtractionStatus::Failed);
        assert!(state.error.is_some());
        assert!(!cache.has(&key("a")));
        assert_eq!(cache.stats().await.failed, 1);

        // A fresh attempt may start after failure
        let result = cache
            .resolve_with(&key("a"), CachePriority::Normal, || async { Ok(descriptor("a")) })
            .await;
        assert!(result.is_ok());
        assert_eq!(cache.get_extraction_status(&key("a")), ExtractionStatus::Idle);
    }

    #[tokio::test]
    async fn test_resolve_with_unplayable_descriptor_fails() {
        let (cache, _store) = test_cache(config(10, 20));

        let mut rejected = descriptor("a");
        rejected.error = Some("geo blocked".into());
        let result = cache
            .resolve_with(&key("a"), CachePriority::Normal, move || async move { Ok(rejected) })
            .await;
        assert_matches!(result, Err(ExtractionError::Rejected(reason)) if reason == "geo blocked");

        let result = cache
            .resolve_with(&key("b"), CachePriority::Normal, || async {
                Ok(StreamDescriptor::default())
            })
            .await;
        assert_matches!(result, Err(ExtractionError::NoStream { .. }));
        assert!(cache.get(&key("b")).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_breakdown() {
        let (cache, _store) = test_cache(config(10, 20));
        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        cache
            .set(&CacheKey::new("vimeo", "1"), descriptor("1"), CachePriority::Normal)
            .await;
        cache.protect(&key("a"));

        let stats = cache.stats().await;
        assert_eq!(stats.fast_entries, 2);
        assert_eq!(stats.durable_entries, Some(2));
        assert_eq!(stats.protected, 1);
        assert_eq!(stats.by_platform["youtube"], PlatformCounts { fast: 1, durable: 1 });
        assert_eq!(stats.by_platform["vimeo"].durable, 1);
        assert!(stats.durable_available);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let mut cfg = config(10, 20);
        cfg.fast.ttl_ms = 10;
        cfg.durable.ttl_ms = 20;
        let (cache, store) = test_cache(cfg);

        cache.set(&key("a"), descriptor("a"), CachePriority::Normal).await;
        cache.set(&key("b"), descriptor("b"), CachePriority::Normal).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let report = cache.sweep_expired().await;
        assert_eq!(report, SweepReport { fast: 2, durable: 2 });
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
