//! Resolver - component wiring
//!
//! Builds the cache, prefetch scheduler and playback lifecycle from a
//! [`ResolverConfig`] and runs their background tasks:
//! - the prefetch tick loop
//! - the periodic expired-entry sweep

use crate::cache::manager::{CacheStats, TieredStreamCache};
use crate::cache::storage::{FileStore, FileStoreConfig, SharedDurableStore, VolatileStore};
use crate::config::ResolverConfig;
use crate::domain::ports::{ExtractionClientRef, NetworkConditions, NetworkMonitor};
use crate::error::Result;
use crate::extract::http::HttpExtractionClient;
use crate::playback::capabilities::CapabilityTable;
use crate::playback::lifecycle::PlaybackLifecycle;
use crate::playback::state::PlaybackSnapshot;
use crate::prefetch::network::StaticNetworkMonitor;
use crate::prefetch::queue::{PrefetchStats, PriorityPrefetchQueue};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// =============================================================================
// Resolver Status
// =============================================================================

/// Combined view of every component
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverStatus {
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub cache: CacheStats,
    pub prefetch: PrefetchStats,
    pub playback: PlaybackSnapshot,
    pub network: NetworkConditions,
}

// =============================================================================
// Resolver
// =============================================================================

/// Owns and connects the resolver components
pub struct Resolver {
    config: ResolverConfig,
    cache: Arc<TieredStreamCache>,
    queue: Arc<PriorityPrefetchQueue>,
    lifecycle: Arc<PlaybackLifecycle>,
    network: Arc<StaticNetworkMonitor>,
    capabilities: Arc<CapabilityTable>,
    started_at: DateTime<Utc>,
}

impl Resolver {
    /// Build from configuration with the HTTP extraction client
    pub async fn from_config(config: ResolverConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let durable: SharedDurableStore = match &config.durable.path {
            Some(path) => {
                let store = FileStore::with_config(FileStoreConfig {
                    root_path: path.clone(),
                    sync_writes: config.durable.sync_writes,
                })
                .await?;
                info!(path = %path.display(), "Durable tier on file store");
                Arc::new(store)
            }
            None => {
                info!("Durable tier in memory, entries will not survive restart");
                Arc::new(VolatileStore::new())
            }
        };

        let client = Arc::new(HttpExtractionClient::new(&config.extraction)?);
        info!(base_url = %config.extraction.base_url, "Extraction backend configured");

        Self::build(config, durable, client)
    }

    /// Build from configuration with explicit collaborators
    pub fn build(
        config: ResolverConfig,
        durable: SharedDurableStore,
        client: ExtractionClientRef,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let capabilities = Arc::new(config.platforms.clone());
        let network = Arc::new(StaticNetworkMonitor::default());
        let cache = TieredStreamCache::with_config(config.cache.clone(), durable)?;
        let queue = PriorityPrefetchQueue::with_config(
            config.prefetch.clone(),
            Arc::clone(&cache),
            Arc::clone(&client),
            network.clone(),
            Arc::clone(&capabilities),
        )?;
        let lifecycle = PlaybackLifecycle::with_config(
            config.playback.clone(),
            Arc::clone(&cache),
            Arc::clone(&queue),
            client,
            Arc::clone(&capabilities),
        );

        info!(
            platforms = capabilities.platforms.len(),
            fast_capacity = config.cache.fast.capacity,
            durable_capacity = config.cache.durable.capacity,
            "Resolver initialized"
        );

        Ok(Arc::new(Self {
            config,
            cache,
            queue,
            lifecycle,
            network,
            capabilities,
            started_at: Utc::now(),
        }))
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredStreamCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<PriorityPrefetchQueue> {
        &self.queue
    }

    pub fn lifecycle(&self) -> &Arc<PlaybackLifecycle> {
        &self.lifecycle
    }

    pub fn network(&self) -> &Arc<StaticNetworkMonitor> {
        &self.network
    }

    pub fn capabilities(&self) -> &Arc<CapabilityTable> {
        &self.capabilities
    }

    /// Start the scheduler and sweeper, both stop when `shutdown` fires
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let scheduler = tokio::spawn(Arc::clone(&self.queue).run(shutdown.clone()));

        let cache = Arc::clone(&self.cache);
        let period = self.config.durable.sweep_interval();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let report = cache.sweep_expired().await;
                        debug!(fast = report.fast, durable = report.durable, "Expired entries swept");
                    }
                }
            }
        });

        vec![scheduler, sweeper]
    }

    /// Everything the stats endpoint reports
    pub async fn status(&self) -> ResolverStatus {
        let now = Utc::now();
        ResolverStatus {
            version: crate::VERSION.to_string(),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            cache: self.cache.stats().await,
            prefetch: self.queue.stats(),
            playback: self.lifecycle.snapshot(),
            network: self.network.conditions(),
        }
    }

    /// Ready when the durable tier answers
    pub async fn is_ready(&self) -> bool {
        self.cache.health_check().await
    }
}
