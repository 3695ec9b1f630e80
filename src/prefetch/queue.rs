//! Priority Prefetch Queue
//!
//! Schedules background extractions ahead of playback. Requests are deduped
//! per key, ordered by effective priority, and dispatched one per tick with
//! bounded concurrency while network conditions allow. Dispatch goes through
//! the cache's single-flight extraction so the queue never duplicates work
//! already started by playback.

use crate::cache::entry::{CacheKey, StreamDescriptor};
use crate::cache::extraction::ExtractionOutcome;
use crate::cache::manager::TieredStreamCache;
use crate::domain::ports::{ExtractionClientRef, NetworkMonitorRef};
use crate::error::{Error, ExtractionError, Result};
use crate::playback::capabilities::CapabilityTable;
use crate::prefetch::request::{PrefetchRequest, PrefetchSource, PriorityWeights};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Prefetch Configuration
// =============================================================================

/// Configuration for the prefetch scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Scheduling tick period
    pub tick_interval_ms: u64,
    /// Maximum extractions dispatched by the queue at once
    pub max_concurrent: usize,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Delay before a failed request re-enters the queue
    pub retry_delay_ms: u64,
    /// Effective-priority weights
    pub weights: PriorityWeights,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            max_concurrent: 2,
            max_retries: 2,
            retry_delay_ms: 5_000,
            weights: PriorityWeights::default(),
        }
    }
}

impl PrefetchConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Configuration(
                "prefetch tick interval must be positive".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Configuration(
                "prefetch concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// New request added
    Queued,
    /// Existing request raised to a higher-priority source
    Upgraded,
    /// Existing request kept, new one was not higher priority
    AlreadyQueued,
    /// Descriptor already in the fast tier
    AlreadyCached,
    /// Extraction already running for this key
    InFlight,
    /// Platform cannot be resolved
    Unsupported,
}

impl EnqueueOutcome {
    /// Whether the queue changed
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued | EnqueueOutcome::Upgraded)
    }
}

/// What one scheduling tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Paused,
    /// Concurrency limit reached
    Saturated,
    /// Offline, data saver or slow connection
    NetworkUnfavorable,
    /// Nothing queued
    Idle,
    /// Top request was resolved elsewhere in the meantime
    Skipped(CacheKey),
    Dispatched(CacheKey),
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    upgraded: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    skipped: AtomicU64,
}

/// Snapshot of scheduler state and counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchStats {
    pub queued: usize,
    pub active: usize,
    pub waiting_retry: usize,
    pub paused: bool,
    pub enqueued: u64,
    pub upgraded: u64,
    pub dispatched: u64,
    pub completed: u64,
    /// Requests dropped after exhausting their retries
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
}

/// A queued request as seen from outside
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequestView {
    pub key: CacheKey,
    pub source: PrefetchSource,
    pub requested_at: DateTime<Utc>,
    pub retry_count: u32,
    pub effective_priority: f64,
}

// =============================================================================
// Priority Prefetch Queue
// =============================================================================

/// Bounded-concurrency background extraction scheduler
pub struct PriorityPrefetchQueue {
    cache: Arc<TieredStreamCache>,
    client: ExtractionClientRef,
    network: NetworkMonitorRef,
    capabilities: Arc<CapabilityTable>,
    config: PrefetchConfig,
    /// Pending requests keyed by storage key
    pending: Mutex<IndexMap<String, PrefetchRequest>>,
    /// Keys dispatched by this queue and not yet settled
    in_flight: Mutex<HashSet<String>>,
    /// Failed keys sleeping before requeue
    retrying: Mutex<HashSet<String>>,
    /// In-flight or retrying keys that must not be requeued
    cancelled: Mutex<HashSet<String>>,
    paused: AtomicBool,
    counters: QueueCounters,
}

impl PriorityPrefetchQueue {
    /// Create a scheduler with default configuration
    pub fn new(
        cache: Arc<TieredStreamCache>,
        client: ExtractionClientRef,
        network: NetworkMonitorRef,
        capabilities: Arc<CapabilityTable>,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            PrefetchConfig::default(),
            cache,
            client,
            network,
            capabilities,
        ))
    }

    /// Create a scheduler with custom configuration
    pub fn with_config(
        config: PrefetchConfig,
        cache: Arc<TieredStreamCache>,
        client: ExtractionClientRef,
        network: NetworkMonitorRef,
        capabilities: Arc<CapabilityTable>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self::build(
            config,
            cache,
            client,
            network,
            capabilities,
        )))
    }

    fn build(
        config: PrefetchConfig,
        cache: Arc<TieredStreamCache>,
        client: ExtractionClientRef,
        network: NetworkMonitorRef,
        capabilities: Arc<CapabilityTable>,
    ) -> Self {
        Self {
            cache,
            client,
            network,
            capabilities,
            config,
            pending: Mutex::new(IndexMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            retrying: Mutex::new(HashSet::new()),
            cancelled: Mutex::new(HashSet::new()),
            paused: AtomicBool::new(false),
            counters: QueueCounters::default(),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    // =========================================================================
    // Queue Mutation
    // =========================================================================

    /// Add a request, merging with any pending request for the same key
    ///
    /// A pending request is replaced only by a strictly higher-priority
    /// source, so the final queue content does not depend on arrival order.
    pub fn enqueue(&self, request: PrefetchRequest) -> EnqueueOutcome {
        let key = &request.key;

        if !self.capabilities.supports_extraction(&key.platform) {
            debug!(key = %key, "Platform cannot be resolved, ignoring prefetch");
            return EnqueueOutcome::Unsupported;
        }
        if self.cache.has(key) {
            return EnqueueOutcome::AlreadyCached;
        }

        let storage_key = key.to_storage_key();
        if self.cache.is_extracting(key) || self.in_flight.lock().contains(&storage_key) {
            return EnqueueOutcome::InFlight;
        }

        // A fresh request overrides an earlier cancel
        self.cancelled.lock().remove(&storage_key);

        let mut pending = self.pending.lock();
        match pending.get_mut(&storage_key) {
            Some(existing) if request.priority() > existing.priority() => {
                debug!(
                    key = %key,
                    from = %existing.source,
                    to = %request.source,
                    "Upgraded prefetch request"
                );
                existing.source = request.source;
                self.counters.upgraded.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Upgraded
            }
            Some(_) => EnqueueOutcome::AlreadyQueued,
            None => {
                debug!(key = %key, source = %request.source, "Queued prefetch request");
                pending.insert(storage_key, request);
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
        }
    }

    /// Enqueue a batch, one outcome per request
    pub fn enqueue_many(
        &self,
        requests: impl IntoIterator<Item = PrefetchRequest>,
    ) -> Vec<EnqueueOutcome> {
        requests.into_iter().map(|r| self.enqueue(r)).collect()
    }

    /// Remove a pending request, leaving any running extraction alone
    pub fn dequeue(&self, key: &CacheKey) -> bool {
        self.pending.lock().shift_remove(&key.to_storage_key()).is_some()
    }

    /// Remove a pending request and stop the key from being retried
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let storage_key = key.to_storage_key();
        let removed = self.pending.lock().shift_remove(&storage_key).is_some();

        let tracked = self.in_flight.lock().contains(&storage_key)
            || self.retrying.lock().contains(&storage_key);
        if tracked {
            self.cancelled.lock().insert(storage_key);
        }

        if removed || tracked {
            debug!(key = %key, "Cancelled prefetch");
        }
        removed || tracked
    }

    /// Drop every pending request
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("Prefetch paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("Prefetch resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Whether a key is waiting in the queue
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.pending.lock().contains_key(&key.to_storage_key())
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Extractions dispatched by the queue and still running
    pub fn active_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Pending requests in dispatch order
    pub fn snapshot(&self) -> Vec<QueuedRequestView> {
        let now = Utc::now();
        let weights = &self.config.weights;
        let mut views: Vec<QueuedRequestView> = self
            .pending
            .lock()
            .values()
            .map(|r| QueuedRequestView {
                key: r.key.clone(),
                source: r.source,
                requested_at: r.requested_at,
                retry_count: r.retry_count,
                effective_priority: r.effective_priority(weights, now),
            })
            .collect();

        views.sort_by(|a, b| {
            b.effective_priority
                .total_cmp(&a.effective_priority)
                .then(a.requested_at.cmp(&b.requested_at))
        });
        views
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            queued: self.len(),
            active: self.active_count(),
            waiting_retry: self.retrying.lock().len(),
            paused: self.is_paused(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            upgraded: self.counters.upgraded.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Run the scheduling loop until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = self.config.tick_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Prefetch scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        info!(queued = self.len(), "Prefetch scheduler stopped");
    }

    /// Dispatch at most one request
    pub fn tick(self: &Arc<Self>) -> TickOutcome {
        if self.is_paused() {
            return TickOutcome::Paused;
        }
        if self.active_count() >= self.config.max_concurrent {
            return TickOutcome::Saturated;
        }
        if !self.network.conditions().allows_background_work() {
            return TickOutcome::NetworkUnfavorable;
        }

        let request = match self.pop_next() {
            Some(request) => request,
            None => return TickOutcome::Idle,
        };
        let key = request.key.clone();

        // Playback may have resolved or started it since it was queued
        if self.cache.has(&key) || self.cache.is_extracting(&key) {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Skipped prefetch, already resolved or running");
            return TickOutcome::Skipped(key);
        }

        self.dispatch(request);
        TickOutcome::Dispatched(key)
    }

    /// Remove and return the highest effective-priority request
    fn pop_next(&self) -> Option<PrefetchRequest> {
        let now = Utc::now();
        let weights = &self.config.weights;
        let mut pending = self.pending.lock();

        let best = pending
            .values()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                b.effective_priority(weights, now)
                    .total_cmp(&a.effective_priority(weights, now))
                    .then(a.requested_at.cmp(&b.requested_at))
            })
            .map(|(index, _)| index)?;

        pending.shift_remove_index(best).map(|(_, request)| request)
    }

    fn dispatch(self: &Arc<Self>, request: PrefetchRequest) {
        let storage_key = request.key.to_storage_key();
        self.in_flight.lock().insert(storage_key);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let client = Arc::clone(&self.client);
        let platform = request.key.platform.clone();
        let content_id = request.key.content_id.clone();
        let handle = self
            .cache
            .resolve_with(&request.key, request.priority(), move || async move {
                client.resolve(&platform, &content_id).await
            });

        debug!(
            key = %request.key,
            source = %request.source,
            retry = request.retry_count,
            "Dispatched prefetch"
        );

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = handle.await;
            queue.settle(request, outcome);
        });
    }

    fn settle(self: &Arc<Self>, request: PrefetchRequest, outcome: ExtractionOutcome) {
        let storage_key = request.key.to_storage_key();
        self.in_flight.lock().remove(&storage_key);
        let cancelled = self.cancelled.lock().remove(&storage_key);

        match outcome {
            Ok(descriptor) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(key = %request.key, split = descriptor.is_split(), "Prefetch completed");
            }
            Err(e) if cancelled => {
                debug!(key = %request.key, error = %e, "Cancelled prefetch failed, not retrying");
            }
            Err(e) if request.retry_count < self.config.max_retries => {
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key = %request.key,
                    error = %e,
                    retry = request.retry_count + 1,
                    delay_ms = self.config.retry_delay_ms,
                    "Prefetch failed, scheduling retry"
                );
                self.schedule_retry(request.next_attempt());
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %request.key,
                    error = %e,
                    attempts = request.retry_count + 1,
                    "Prefetch dropped after retries"
                );
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, request: PrefetchRequest) {
        let storage_key = request.key.to_storage_key();
        self.retrying.lock().insert(storage_key.clone());

        let queue = Arc::clone(self);
        let delay = self.config.retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.retrying.lock().remove(&storage_key);

            if queue.cancelled.lock().remove(&storage_key) {
                return;
            }
            if queue.cache.has(&request.key) {
                queue.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            // A fresh request that arrived meanwhile wins
            queue.pending.lock().entry(storage_key).or_insert(request);
        });
    }

    /// Resolve immediately, bypassing the queue and network gating
    pub async fn resolve_now(
        self: &Arc<Self>,
        key: &CacheKey,
    ) -> std::result::Result<Arc<StreamDescriptor>, ExtractionError> {
        self.dequeue(key);
        if let Some(descriptor) = self.cache.get(key).await {
            return Ok(descriptor);
        }

        let client = Arc::clone(&self.client);
        let platform = key.platform.clone();
        let content_id = key.content_id.clone();
        self.cache
            .resolve_with(key, PrefetchSource::QueueNext.priority(), move || async move {
                client.resolve(&platform, &content_id).await
            })
            .await
    }
}
