//! End-to-end flows through the assembled resolver
//!
//! Every test builds a [`Resolver`] over an in-memory durable tier and a
//! scripted extraction client, then drives it through its public API.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_resolver::prefetch::TickOutcome;
use stream_resolver::{
    CacheKey, CachePriority, ExtractionClient, ExtractionError, ExtractionStatus, LifecycleState,
    PrefetchRequest, PrefetchSource, PlaybackStrategy, Resolver, ResolverConfig, StreamDescriptor,
    VolatileStore,
};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Scripted Client
// =============================================================================

/// Fails the first `fail_times` calls per run, then resolves
struct ScriptedClient {
    calls: AtomicUsize,
    fail_times: usize,
    delay: Duration,
}

impl ScriptedClient {
    fn new(fail_times: usize, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_times,
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionClient for ScriptedClient {
    async fn resolve(
        &self,
        platform: &str,
        content_id: &str,
    ) -> Result<StreamDescriptor, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if call < self.fail_times {
            return Err(ExtractionError::Remote {
                status: 503,
                message: "busy".into(),
            });
        }
        Ok(StreamDescriptor::new(format!("https://cdn.test/{}/{}", platform, content_id))
            .with_quality("720p"))
    }
}

fn fast_config() -> ResolverConfig {
    let mut config = ResolverConfig::default();
    config.prefetch.tick_interval_ms = 5;
    config.prefetch.retry_delay_ms = 10;
    config
}

fn resolver(config: ResolverConfig, client: Arc<ScriptedClient>) -> Arc<Resolver> {
    Resolver::build(config, Arc::new(VolatileStore::new()), client).unwrap()
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Prefetch Flows
// =============================================================================

#[tokio::test]
async fn queue_next_request_is_extracted_and_cached() {
    let client = ScriptedClient::new(0, 0);
    let resolver = resolver(fast_config(), Arc::clone(&client));
    let shutdown = CancellationToken::new();
    let tasks = resolver.spawn_background(shutdown.clone());

    let key = CacheKey::new("youtube", "abc");
    resolver
        .queue()
        .enqueue(PrefetchRequest::new("youtube", "abc", PrefetchSource::QueueNext));

    let queue = Arc::clone(resolver.queue());
    wait_until(|| {
        let queue = Arc::clone(&queue);
        async move { queue.stats().completed == 1 }
    })
    .await;

    let descriptor = resolver.cache().get(&key).await.unwrap();
    assert_eq!(
        descriptor.stream_url.as_deref(),
        Some("https://cdn.test/youtube/abc")
    );
    assert_eq!(
        resolver.cache().get_extraction_status(&key),
        ExtractionStatus::Idle
    );
    assert_eq!(client.calls(), 1);
    assert!(resolver.queue().is_empty());

    shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn exhausted_retries_count_one_failure() {
    let client = ScriptedClient::new(usize::MAX, 0);
    let resolver = resolver(fast_config(), Arc::clone(&client));
    let shutdown = CancellationToken::new();
    let _tasks = resolver.spawn_background(shutdown.clone());

    resolver
        .queue()
        .enqueue(PrefetchRequest::new("vimeo", "7", PrefetchSource::Hover));

    let queue = Arc::clone(resolver.queue());
    wait_until(|| {
        let queue = Arc::clone(&queue);
        async move { queue.stats().failed == 1 }
    })
    .await;

    // Nothing is requeued after the final failure
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = resolver.queue().stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dispatched, 3);
    assert_eq!(client.calls(), 3);
    assert_eq!(
        resolver
            .cache()
            .get_extraction_status(&CacheKey::new("vimeo", "7")),
        ExtractionStatus::Failed
    );

    shutdown.cancel();
}

#[tokio::test]
async fn queue_next_dispatches_before_scroll_ahead() {
    let mut config = fast_config();
    config.prefetch.max_concurrent = 1;
    let resolver = resolver(config, ScriptedClient::new(0, 50));
    let queue = resolver.queue();

    queue.enqueue(PrefetchRequest::new("youtube", "far", PrefetchSource::ScrollAhead));
    queue.enqueue(PrefetchRequest::new("youtube", "next", PrefetchSource::QueueNext));

    assert_eq!(
        queue.tick(),
        TickOutcome::Dispatched(CacheKey::new("youtube", "next"))
    );
    assert_eq!(queue.tick(), TickOutcome::Saturated);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn re_enqueue_keeps_one_entry_at_higher_priority() {
    let resolver = resolver(fast_config(), ScriptedClient::new(0, 0));
    let queue = resolver.queue();

    queue.enqueue(PrefetchRequest::new("youtube", "abc", PrefetchSource::FeedLoad));
    queue.enqueue(PrefetchRequest::new("youtube", "abc", PrefetchSource::Hover));

    let pending = queue.snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source, PrefetchSource::Hover);
}

#[tokio::test]
async fn concurrent_triggers_share_one_extraction() {
    let client = ScriptedClient::new(0, 50);
    let resolver = resolver(fast_config(), Arc::clone(&client));
    let key = CacheKey::new("youtube", "shared");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = Arc::clone(resolver.cache());
        let client = Arc::clone(&client);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache
                .resolve_with(&key, CachePriority::High, move || async move {
                    client.resolve("youtube", "shared").await
                })
                .await
        }));
    }

    for handle in handles {
        let descriptor = handle.await.unwrap().unwrap();
        assert_eq!(
            descriptor.stream_url.as_deref(),
            Some("https://cdn.test/youtube/shared")
        );
    }
    assert_eq!(client.calls(), 1);
}

// =============================================================================
// Playback Flows
// =============================================================================

#[tokio::test]
async fn embed_session_upgrades_once_at_a_pause() {
    let client = ScriptedClient::new(0, 0);
    let resolver = resolver(fast_config(), Arc::clone(&client));
    let lifecycle = resolver.lifecycle();
    let key = CacheKey::new("youtube", "live");

    resolver
        .queue()
        .enqueue(PrefetchRequest::for_key(key.clone(), PrefetchSource::QueueUpcoming));

    let snapshot = lifecycle.initialize_playback(key.clone()).await;
    assert_eq!(snapshot.state, LifecycleState::EmbedLoading);
    assert!(!resolver.queue().contains(&key));
    assert!(resolver.cache().is_protected(&key));

    let cache = Arc::clone(resolver.cache());
    let waiting_key = key.clone();
    wait_until(|| {
        let cache = Arc::clone(&cache);
        let key = waiting_key.clone();
        async move { cache.has(&key) }
    })
    .await;

    let ready = lifecycle.embed_ready().unwrap();
    assert_eq!(ready.state, LifecycleState::StreamReady);
    assert!(!lifecycle.should_attempt_upgrade());

    assert!(lifecycle.on_pause());
    assert!(lifecycle.should_attempt_upgrade());
    assert!(lifecycle.attempt_upgrade(42.0, false));
    assert_eq!(lifecycle.state(), LifecycleState::Upgrading);

    lifecycle.upgrade_complete().unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::DirectPlaying);
    assert_eq!(lifecycle.active_strategy(), Some(PlaybackStrategy::Direct));
    assert!(!lifecycle.attempt_upgrade(50.0, true));
    assert_eq!(client.calls(), 1);

    lifecycle.cleanup();
    assert!(!resolver.cache().is_protected(&key));
    assert_eq!(lifecycle.state(), LifecycleState::Idle);
}

#[tokio::test]
async fn upgrade_refused_without_resolved_stream() {
    let client = ScriptedClient::new(usize::MAX, 0);
    let resolver = resolver(fast_config(), Arc::clone(&client));
    let lifecycle = resolver.lifecycle();
    let key = CacheKey::new("youtube", "blocked");

    lifecycle.initialize_playback(key.clone()).await;

    let cache = Arc::clone(resolver.cache());
    wait_until(|| {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        async move { cache.get_extraction_status(&key) == ExtractionStatus::Failed }
    })
    .await;

    lifecycle.embed_ready().unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::EmbedPlaying);
    assert!(!lifecycle.on_pause());
    assert!(!lifecycle.attempt_upgrade(10.0, true));
    assert_eq!(lifecycle.state(), LifecycleState::EmbedPlaying);
    assert_eq!(lifecycle.active_strategy(), Some(PlaybackStrategy::Embed));
}
