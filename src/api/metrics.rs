//! Prometheus Exporter
//!
//! Counters live in the components as atomics; the exporter copies a
//! [`ResolverStatus`] into its own registry on every scrape.

use crate::error::{Error, Result};
use crate::playback::state::LifecycleState;
use crate::resolver::{Resolver, ResolverStatus};
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const NAMESPACE: &str = "stream_resolver";

const LIFECYCLE_STATES: [LifecycleState; 9] = [
    LifecycleState::Idle,
    LifecycleState::EmbedLoading,
    LifecycleState::EmbedPlaying,
    LifecycleState::StreamExtracting,
    LifecycleState::StreamReady,
    LifecycleState::Upgrading,
    LifecycleState::DirectPlaying,
    LifecycleState::UpgradeFailed,
    LifecycleState::Error,
];

// =============================================================================
// Exporter
// =============================================================================

/// Resolver gauges in a private registry
pub struct PrometheusExporter {
    registry: Registry,
    cache_entries: IntGaugeVec,
    cache_ops: IntGaugeVec,
    extractions: IntGaugeVec,
    durable_available: IntGauge,
    prefetch: IntGaugeVec,
    playback_state: IntGaugeVec,
    uptime: IntGauge,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_entries = IntGaugeVec::new(
            opts("cache_entries", "Entries held per tier"),
            &["tier"],
        )?;
        let cache_ops = IntGaugeVec::new(
            opts("cache_operations", "Cumulative cache operations per tier"),
            &["tier", "op"],
        )?;
        let extractions = IntGaugeVec::new(
            opts("extractions", "Extraction attempts by outcome"),
            &["outcome"],
        )?;
        let durable_available = IntGauge::with_opts(opts(
            "durable_available",
            "1 when the durable tier is answering",
        ))?;
        let prefetch = IntGaugeVec::new(
            opts("prefetch", "Prefetch scheduler queue sizes and counters"),
            &["field"],
        )?;
        let playback_state = IntGaugeVec::new(
            opts("playback_state", "1 for the current lifecycle state"),
            &["state"],
        )?;
        let uptime = IntGauge::with_opts(opts("uptime_seconds", "Seconds since start"))?;

        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(cache_ops.clone()))?;
        registry.register(Box::new(extractions.clone()))?;
        registry.register(Box::new(durable_available.clone()))?;
        registry.register(Box::new(prefetch.clone()))?;
        registry.register(Box::new(playback_state.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            cache_entries,
            cache_ops,
            extractions,
            durable_available,
            prefetch,
            playback_state,
            uptime,
        })
    }

    /// Copy a status snapshot into the gauges
    pub fn observe(&self, status: &ResolverStatus) {
        let cache = &status.cache;
        self.cache_entries
            .with_label_values(&["fast"])
            .set(cache.fast_entries as i64);
        self.cache_entries
            .with_label_values(&["durable"])
            .set(cache.durable_entries.unwrap_or(0) as i64);

        for (tier, m) in [("fast", &cache.counters.fast), ("durable", &cache.counters.durable)] {
            for (op, value) in [
                ("hits", m.hits),
                ("misses", m.misses),
                ("writes", m.writes),
                ("promotions", m.promotions),
                ("evictions", m.evictions),
                ("expirations", m.expirations),
                ("failures", m.failures),
            ] {
                self.cache_ops
                    .with_label_values(&[tier, op])
                    .set(value as i64);
            }
        }

        self.extractions
            .with_label_values(&["started"])
            .set(cache.counters.extractions_started as i64);
        self.extractions
            .with_label_values(&["joined"])
            .set(cache.counters.extractions_joined as i64);
        self.extractions
            .with_label_values(&["failed"])
            .set(cache.counters.extractions_failed as i64);
        self.durable_available.set(cache.durable_available as i64);

        let p = &status.prefetch;
        for (field, value) in [
            ("queued", p.queued as u64),
            ("active", p.active as u64),
            ("waiting_retry", p.waiting_retry as u64),
            ("paused", p.paused as u64),
            ("enqueued", p.enqueued),
            ("dispatched", p.dispatched),
            ("completed", p.completed),
            ("failed", p.failed),
            ("retried", p.retried),
            ("skipped", p.skipped),
        ] {
            self.prefetch.with_label_values(&[field]).set(value as i64);
        }

        for state in LIFECYCLE_STATES {
            let name = state.to_string();
            self.playback_state
                .with_label_values(&[name.as_str()])
                .set((state == status.playback.state) as i64);
        }

        self.uptime.set(status.uptime_secs);
    }

    /// Text exposition of the registry
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

// =============================================================================
// Metrics Server
// =============================================================================

/// Serve `/metrics` until `shutdown` fires
pub async fn run_metrics_server(
    addr: SocketAddr,
    resolver: Arc<Resolver>,
    shutdown: CancellationToken,
) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let exporter = Arc::new(PrometheusExporter::new()?);

    let make_svc = make_service_fn(move |_conn| {
        let resolver = Arc::clone(&resolver);
        let exporter = Arc::clone(&exporter);
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let resolver = Arc::clone(&resolver);
                let exporter = Arc::clone(&exporter);
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != "/metrics" {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("not found");
                        return Ok::<_, std::convert::Infallible>(response);
                    }

                    exporter.observe(&resolver.status().await);
                    match exporter.encode() {
                        Ok(buffer) => {
                            if let Ok(value) = exporter.content_type().parse() {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from(e.to_string());
                        }
                    }
                    Ok(response)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!(addr = %addr, "Metrics server listening");
    server
        .serve(make_svc)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::VolatileStore;
    use crate::cache::entry::{CacheKey, CachePriority, StreamDescriptor};
    use crate::config::ResolverConfig;
    use crate::domain::ports::ExtractionClient;
    use crate::error::ExtractionError;
    use async_trait::async_trait;

    struct NeverClient;

    #[async_trait]
    impl ExtractionClient for NeverClient {
        async fn resolve(
            &self,
            _platform: &str,
            _content_id: &str,
        ) -> std::result::Result<StreamDescriptor, ExtractionError> {
            Err(ExtractionError::Unreachable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_exporter_reflects_status() {
        let resolver = Resolver::build(
            ResolverConfig::default(),
            Arc::new(VolatileStore::new()),
            Arc::new(NeverClient),
        )
        .unwrap();
        resolver
            .cache()
            .set(
                &CacheKey::new("youtube", "a"),
                StreamDescriptor::new("https://cdn/a"),
                CachePriority::Normal,
            )
            .await;

        let exporter = PrometheusExporter::new().unwrap();
        exporter.observe(&resolver.status().await);
        let text = String::from_utf8(exporter.encode().unwrap()).unwrap();

        assert!(text.contains("stream_resolver_cache_entries{tier=\"fast\"} 1"));
        assert!(text.contains("stream_resolver_playback_state{state=\"idle\"} 1"));
        assert!(text.contains("stream_resolver_playback_state{state=\"error\"} 0"));
        assert!(text.contains("stream_resolver_durable_available 1"));
    }
}
