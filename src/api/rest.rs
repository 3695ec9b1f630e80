//! REST API Handlers
//!
//! JSON surface over the resolver: prefetch hints, cached stream lookups,
//! network conditions and the playback session.

use crate::cache::entry::{CacheKey, StreamDescriptor};
use crate::cache::extraction::ExtractionStateView;
use crate::cache::tier::CacheTier;
use crate::cache::CacheLookupResult;
use crate::domain::ports::{NetworkConditions, NetworkMonitor};
use crate::error::{Error, ExtractionError};
use crate::playback::state::PlaybackSnapshot;
use crate::prefetch::queue::EnqueueOutcome;
use crate::prefetch::request::{PrefetchRequest, PrefetchSource};
use crate::resolver::Resolver;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Most requests accepted by one batch call
const MAX_BATCH: usize = 200;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Prefetch hint for one content item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchBody {
    pub platform: String,
    pub content_id: String,
    pub source: PrefetchSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchBatchBody {
    pub requests: Vec<PrefetchBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchResponse {
    pub key: CacheKey,
    pub outcome: EnqueueOutcome,
}

/// Cached stream lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    pub key: CacheKey,
    pub descriptor: StreamDescriptor,
    /// Tier that served the hit, absent for a fresh extraction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<CacheTier>,
    pub promoted: bool,
    pub protected: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// Extract on a miss instead of answering 404
    #[serde(default)]
    pub resolve: bool,
}

/// Start a playback session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackBody {
    pub platform: String,
    pub content_id: String,
}

/// Optional payload of a playback event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Player position report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionBody {
    pub current_time: f64,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEventResponse {
    pub event: String,
    /// Whether the event changed anything
    pub accepted: bool,
    pub playback: PlaybackSnapshot,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    resolver: Arc<Resolver>,
}

impl RestRouter {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            resolver: self.resolver,
        };

        Router::new()
            // Prefetch endpoints
            .route("/v1/prefetch", post(enqueue_prefetch))
            .route("/v1/prefetch/batch", post(enqueue_prefetch_batch))
            .route("/v1/prefetch/pause", post(pause_prefetch))
            .route("/v1/prefetch/resume", post(resume_prefetch))
            .route("/v1/prefetch/queue", get(list_prefetch_queue))
            .route(
                "/v1/prefetch/:platform/:id",
                axum::routing::delete(cancel_prefetch),
            )
            // Stream endpoints
            .route(
                "/v1/streams/:platform/:id",
                get(get_stream).delete(remove_stream),
            )
            .route(
                "/v1/streams/:platform/:id/protect",
                post(protect_stream).delete(unprotect_stream),
            )
            // Environment and stats
            .route("/v1/network", put(update_network).get(get_network))
            .route("/v1/stats", get(get_stats))
            // Playback endpoints
            .route(
                "/v1/playback",
                get(get_playback).post(start_playback).delete(stop_playback),
            )
            .route("/v1/playback/upgrade", post(attempt_upgrade))
            .route("/v1/playback/position", post(update_position))
            .route("/v1/playback/:event", post(playback_event))
            // Health endpoints
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn status_for(err: &Error) -> (StatusCode, &'static str) {
    match err {
        Error::ApiValidation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        Error::InvalidKey(_) => (StatusCode::BAD_REQUEST, "invalid_key"),
        Error::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        Error::NoActiveSession => (StatusCode::CONFLICT, "no_active_session"),
        Error::UnsupportedPlatform { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_platform")
        }
        Error::Extraction(ExtractionError::NoStream { .. }) => (StatusCode::NOT_FOUND, "no_stream"),
        Error::Extraction(_) => (StatusCode::BAD_GATEWAY, "extraction_failed"),
        Error::StoreUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response(err: Error) -> Response {
    let (status, code) = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }
    (
        status,
        Json(ApiErrorResponse {
            error: code.into(),
            message: err.to_string(),
            details: None,
        }),
    )
        .into_response()
}

fn not_found(message: String, details: Option<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiErrorResponse {
            error: "not_found".into(),
            message,
            details,
        }),
    )
        .into_response()
}

/// Validate path or body key parts
fn parse_key(platform: &str, content_id: &str) -> Result<CacheKey, Error> {
    let platform = platform.trim();
    let content_id = content_id.trim();
    if platform.is_empty() || content_id.is_empty() {
        return Err(Error::InvalidKey(
            "platform and content id must not be empty".into(),
        ));
    }
    if platform.contains(':') {
        return Err(Error::InvalidKey(format!(
            "platform must not contain ':': {}",
            platform
        )));
    }
    Ok(CacheKey::new(platform, content_id))
}

// =============================================================================
// Prefetch Handlers
// =============================================================================

/// Queue one prefetch hint
async fn enqueue_prefetch(
    State(state): State<AppState>,
    Json(body): Json<PrefetchBody>,
) -> impl IntoResponse {
    let key = match parse_key(&body.platform, &body.content_id) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    let outcome = state
        .resolver
        .queue()
        .enqueue(PrefetchRequest::for_key(key.clone(), body.source));
    let status = if outcome.is_accepted() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(PrefetchResponse { key, outcome })).into_response()
}

/// Queue a batch of hints, one outcome per request
async fn enqueue_prefetch_batch(
    State(state): State<AppState>,
    Json(body): Json<PrefetchBatchBody>,
) -> impl IntoResponse {
    if body.requests.len() > MAX_BATCH {
        return error_response(Error::ApiValidation(format!(
            "batch of {} exceeds the limit of {}",
            body.requests.len(),
            MAX_BATCH
        )));
    }

    let mut requests = Vec::with_capacity(body.requests.len());
    for item in &body.requests {
        match parse_key(&item.platform, &item.content_id) {
            Ok(key) => requests.push(PrefetchRequest::for_key(key, item.source)),
            Err(e) => return error_response(e),
        }
    }

    let keys: Vec<CacheKey> = requests.iter().map(|r| r.key.clone()).collect();
    let outcomes = state.resolver.queue().enqueue_many(requests);
    debug!(
        count = keys.len(),
        accepted = outcomes.iter().filter(|o| o.is_accepted()).count(),
        "Prefetch batch"
    );

    let responses: Vec<PrefetchResponse> = keys
        .into_iter()
        .zip(outcomes)
        .map(|(key, outcome)| PrefetchResponse { key, outcome })
        .collect();
    (StatusCode::OK, Json(responses)).into_response()
}

/// Cancel a pending or retrying prefetch
async fn cancel_prefetch(
    State(state): State<AppState>,
    Path((platform, id)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match parse_key(&platform, &id) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    if state.resolver.queue().cancel(&key) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(format!("No prefetch queued for {}", key), None)
    }
}

async fn pause_prefetch(State(state): State<AppState>) -> impl IntoResponse {
    state.resolver.queue().pause();
    (StatusCode::OK, Json(state.resolver.queue().stats()))
}

async fn resume_prefetch(State(state): State<AppState>) -> impl IntoResponse {
    state.resolver.queue().resume();
    (StatusCode::OK, Json(state.resolver.queue().stats()))
}

/// Pending requests in dispatch order
async fn list_prefetch_queue(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.resolver.queue().snapshot()))
}

// =============================================================================
// Stream Handlers
// =============================================================================

/// Cached descriptor for a key, optionally extracting on a miss
async fn get_stream(
    State(state): State<AppState>,
    Path((platform, id)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let key = match parse_key(&platform, &id) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };
    let cache = state.resolver.cache();

    if let CacheLookupResult::Hit {
        descriptor,
        tier,
        promoted,
    } = cache.lookup(&key).await
    {
        let protected = cache.is_protected(&key);
        return (
            StatusCode::OK,
            Json(StreamResponse {
                key,
                descriptor: (*descriptor).clone(),
                tier: Some(tier),
                promoted,
                protected,
            }),
        )
            .into_response();
    }

    if !query.resolve {
        let extraction = cache
            .extraction_state(&key)
            .map(|s| ExtractionStateView::from(&s))
            .unwrap_or_default();
        let details = serde_json::to_string(&extraction).ok();
        return not_found(format!("No cached stream for {}", key), details);
    }

    if !state.resolver.capabilities().supports_extraction(&key.platform) {
        return error_response(Error::UnsupportedPlatform {
            platform: key.platform.clone(),
        });
    }

    info!(key = %key, "Resolving stream on demand");
    match state.resolver.queue().resolve_now(&key).await {
        Ok(descriptor) => (
            StatusCode::OK,
            Json(StreamResponse {
                protected: cache.is_protected(&key),
                key,
                descriptor: (*descriptor).clone(),
                tier: None,
                promoted: false,
            }),
        )
            .into_response(),
        Err(e) => error_response(Error::Extraction(e)),
    }
}

/// Drop a key from both tiers
async fn remove_stream(
    State(state): State<AppState>,
    Path((platform, id)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = match parse_key(&platform, &id) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    if state.resolver.cache().remove(&key).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(format!("No cached stream for {}", key), None)
    }
}

async fn protect_stream(
    State(state): State<AppState>,
    Path((platform, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match parse_key(&platform, &id) {
        Ok(key) => {
            state.resolver.cache().protect(&key);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn unprotect_stream(
    State(state): State<AppState>,
    Path((platform, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match parse_key(&platform, &id) {
        Ok(key) => {
            state.resolver.cache().unprotect(&key);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Network and Stats Handlers
// =============================================================================

/// Report new network conditions, gating background extraction
async fn update_network(
    State(state): State<AppState>,
    Json(conditions): Json<NetworkConditions>,
) -> impl IntoResponse {
    state.resolver.network().update(conditions);
    (StatusCode::OK, Json(state.resolver.network().conditions()))
}

async fn get_network(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.resolver.network().conditions()))
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.resolver.status().await))
}

// =============================================================================
// Playback Handlers
// =============================================================================

async fn get_playback(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.resolver.lifecycle().snapshot()))
}

/// Start a session, replacing any active one
async fn start_playback(
    State(state): State<AppState>,
    Json(body): Json<PlaybackBody>,
) -> impl IntoResponse {
    let key = match parse_key(&body.platform, &body.content_id) {
        Ok(key) => key,
        Err(e) => return error_response(e),
    };

    let snapshot = state.resolver.lifecycle().initialize_playback(key).await;
    (StatusCode::OK, Json(snapshot)).into_response()
}

async fn stop_playback(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.resolver.lifecycle().cleanup()))
}

/// Player events driving the lifecycle
async fn playback_event(
    State(state): State<AppState>,
    Path(event): Path<String>,
    body: Option<Json<EventBody>>,
) -> impl IntoResponse {
    let lifecycle = state.resolver.lifecycle();
    let reason = body.and_then(|Json(b)| b.reason);

    let accepted = match event.as_str() {
        "embed-ready" => lifecycle.embed_ready().map(|_| true),
        "pause" => Ok(lifecycle.on_pause()),
        "buffering" => Ok(lifecycle.on_buffering()),
        "background" => Ok(lifecycle.on_background()),
        "request-upgrade" => Ok(lifecycle.request_upgrade()),
        "upgrade-complete" => lifecycle.upgrade_complete().map(|_| true),
        "upgrade-failed" => lifecycle
            .upgrade_failed(reason.unwrap_or_else(|| "direct player failed".into()))
            .map(|_| true),
        "retry-extraction" => lifecycle.retry_extraction(),
        "fail" => lifecycle
            .fail(reason.unwrap_or_else(|| "player error".into()))
            .map(|_| true),
        _ => {
            return not_found(format!("Unknown playback event {}", event), None);
        }
    };

    match accepted {
        Ok(accepted) => (
            StatusCode::OK,
            Json(PlaybackEventResponse {
                event,
                accepted,
                playback: lifecycle.snapshot(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Try the embed-to-direct switch at the reported position
async fn attempt_upgrade(
    State(state): State<AppState>,
    Json(body): Json<PositionBody>,
) -> impl IntoResponse {
    let lifecycle = state.resolver.lifecycle();
    let accepted = lifecycle.attempt_upgrade(body.current_time, body.is_playing);
    (
        StatusCode::OK,
        Json(PlaybackEventResponse {
            event: "upgrade".into(),
            accepted,
            playback: lifecycle.snapshot(),
        }),
    )
}

async fn update_position(
    State(state): State<AppState>,
    Json(body): Json<PositionBody>,
) -> impl IntoResponse {
    let lifecycle = state.resolver.lifecycle();
    match lifecycle.update_position(body.current_time, body.is_playing) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Health Handlers
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready when the durable tier answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.resolver.is_ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "durable tier unavailable")
    }
}
