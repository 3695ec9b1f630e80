//! Playback Lifecycle
//!
//! Drives the single active playback session: picks the initial player,
//! requests the stream at critical priority, collects upgrade opportunities
//! and switches from the embedded player to the resolved stream when the
//! moment is right.
//!
//! Every session carries a generation number. Work that completes after the
//! session was reset or replaced compares generations and becomes a no-op.

use crate::cache::entry::{CacheKey, CachePriority};
use crate::cache::extraction::ExtractionOutcome;
use crate::cache::manager::TieredStreamCache;
use crate::domain::ports::ExtractionClientRef;
use crate::error::{Error, Result};
use crate::playback::capabilities::CapabilityTable;
use crate::playback::state::{
    LifecycleState, OpportunityKind, PlaybackRecord, PlaybackSnapshot, PlaybackStrategy,
    UpgradeOpportunity,
};
use crate::prefetch::queue::PriorityPrefetchQueue;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Playback Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Player to start on when a resolved stream is already cached
    pub preferred_strategy: PlaybackStrategy,
    /// Shield the active item from cache eviction
    pub protect_active: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            preferred_strategy: PlaybackStrategy::Embed,
            protect_active: true,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Default)]
struct Session {
    record: PlaybackRecord,
    generation: u64,
    /// Task waiting on this session's extraction
    watcher: Option<JoinHandle<()>>,
}

impl Session {
    fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }

    fn require_active(&self) -> Result<&CacheKey> {
        self.record.key.as_ref().ok_or(Error::NoActiveSession)
    }
}

/// State shared with extraction watcher tasks
struct Shared {
    session: Mutex<Session>,
    updates: watch::Sender<PlaybackSnapshot>,
}

impl Shared {
    fn publish(&self, session: &Session) -> PlaybackSnapshot {
        let snapshot = PlaybackSnapshot::from(&session.record);
        self.updates.send_replace(snapshot.clone());
        snapshot
    }

    fn on_extraction(&self, generation: u64, outcome: ExtractionOutcome) {
        let mut session = self.session.lock();
        if session.generation != generation {
            debug!(generation, "Ignoring extraction result for a finished session");
            return;
        }
        session.watcher = None;

        let record = &mut session.record;
        match outcome {
            Ok(descriptor) => {
                record.descriptor = Some(descriptor);
                record.stream_error = None;

                let next = match (record.state, record.active_strategy) {
                    // Nothing is playing yet, go straight to the stream
                    (LifecycleState::StreamExtracting, None) => {
                        record.active_strategy = Some(PlaybackStrategy::Direct);
                        Some(LifecycleState::DirectPlaying)
                    }
                    (LifecycleState::EmbedPlaying, _) | (LifecycleState::StreamExtracting, _) => {
                        Some(LifecycleState::StreamReady)
                    }
                    _ => None,
                };

                if let Some(next) = next {
                    if let Err(e) = record.transition(next) {
                        warn!(error = %e, "Stream ready but transition rejected");
                    }
                }
                info!(state = %record.state, "Stream resolved for active session");
            }
            Err(e) => {
                // Playback continues on whatever player is running
                warn!(error = %e, state = %record.state, "Stream extraction failed for active session");
                record.stream_error = Some(e.to_string());
            }
        }

        self.publish(&session);
    }
}

// =============================================================================
// Playback Lifecycle
// =============================================================================

/// State machine for the currently playing item
pub struct PlaybackLifecycle {
    shared: Arc<Shared>,
    cache: Arc<TieredStreamCache>,
    queue: Arc<PriorityPrefetchQueue>,
    client: ExtractionClientRef,
    capabilities: Arc<CapabilityTable>,
    config: PlaybackConfig,
}

impl PlaybackLifecycle {
    pub fn new(
        cache: Arc<TieredStreamCache>,
        queue: Arc<PriorityPrefetchQueue>,
        client: ExtractionClientRef,
        capabilities: Arc<CapabilityTable>,
    ) -> Arc<Self> {
        Self::with_config(PlaybackConfig::default(), cache, queue, client, capabilities)
    }

    pub fn with_config(
        config: PlaybackConfig,
        cache: Arc<TieredStreamCache>,
        queue: Arc<PriorityPrefetchQueue>,
        client: ExtractionClientRef,
        capabilities: Arc<CapabilityTable>,
    ) -> Arc<Self> {
        let (updates, _) = watch::channel(PlaybackSnapshot::default());
        Arc::new(Self {
            shared: Arc::new(Shared {
                session: Mutex::new(Session::default()),
                updates,
            }),
            cache,
            queue,
            client,
            capabilities,
            config,
        })
    }

    /// Receive a snapshot after every change
    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.shared.updates.subscribe()
    }

    // =========================================================================
    // Session Start / End
    // =========================================================================

    /// Start a session for `key`, replacing any current one
    pub async fn initialize_playback(&self, key: CacheKey) -> PlaybackSnapshot {
        let capabilities = self.capabilities.get(&key.platform);

        let generation = {
            let mut session = self.shared.session.lock();
            self.reset(&mut session);
            session.record =
                PlaybackRecord::start(key.clone(), capabilities, self.config.preferred_strategy);
            if self.config.protect_active {
                self.cache.protect(&key);
            }
            session.generation
        };

        let cached = self.cache.get(&key).await;

        let mut session = self.shared.session.lock();
        if session.generation != generation {
            // Replaced or cleaned up while reading the durable tier
            return PlaybackSnapshot::from(&session.record);
        }

        let prefer_direct = self.config.preferred_strategy == PlaybackStrategy::Direct
            && capabilities.can_direct_stream;

        let (next, strategy, extract) = if capabilities.audio_only {
            let missing = cached.is_none();
            session.record.descriptor = cached;
            (
                LifecycleState::DirectPlaying,
                Some(PlaybackStrategy::Direct),
                missing && capabilities.can_resolve(),
            )
        } else {
            match cached {
                Some(descriptor) => {
                    session.record.descriptor = Some(descriptor);
                    if prefer_direct || !capabilities.can_embed {
                        (LifecycleState::DirectPlaying, Some(PlaybackStrategy::Direct), false)
                    } else {
                        (LifecycleState::EmbedLoading, Some(PlaybackStrategy::Embed), false)
                    }
                }
                None if capabilities.can_embed => (
                    LifecycleState::EmbedLoading,
                    Some(PlaybackStrategy::Embed),
                    capabilities.can_resolve(),
                ),
                None if capabilities.can_resolve() => (LifecycleState::StreamExtracting, None, true),
                None => {
                    session.record.stream_error =
                        Some(format!("platform {} cannot be played", key.platform));
                    (LifecycleState::Error, None, false)
                }
            }
        };

        session.record.active_strategy = strategy;
        if let Err(e) = session.record.transition(next) {
            warn!(key = %key, error = %e, "Initial transition rejected");
        }
        if extract {
            self.start_extraction(&mut session);
        }

        info!(
            key = %key,
            state = %session.record.state,
            cached = session.record.descriptor.is_some(),
            extracting = extract,
            "Playback initialized"
        );
        self.shared.publish(&session)
    }

    /// End the session, idempotent
    pub fn cleanup(&self) -> PlaybackSnapshot {
        let mut session = self.shared.session.lock();
        if let Some(key) = session.record.key.as_ref() {
            info!(key = %key, state = %session.record.state, "Playback cleaned up");
        }
        self.reset(&mut session);
        self.shared.publish(&session)
    }

    fn reset(&self, session: &mut Session) {
        session.stop_watcher();
        if let Some(key) = session.record.key.take() {
            if self.config.protect_active {
                self.cache.unprotect(&key);
            }
        }
        session.generation += 1;
        session.record = PlaybackRecord::default();
    }

    /// Hand the active key's extraction to the cache at critical priority
    fn start_extraction(&self, session: &mut Session) {
        let Some(key) = session.record.key.clone() else {
            return;
        };

        // The queue would only duplicate this work
        self.queue.dequeue(&key);

        let client = Arc::clone(&self.client);
        let platform = key.platform.clone();
        let content_id = key.content_id.clone();
        let handle = self
            .cache
            .resolve_with(&key, CachePriority::Critical, move || async move {
                client.resolve(&platform, &content_id).await
            });

        let shared = Arc::clone(&self.shared);
        let generation = session.generation;
        session.stop_watcher();
        session.record.stream_error = None;
        session.watcher = Some(tokio::spawn(async move {
            let outcome = handle.await;
            shared.on_extraction(generation, outcome);
        }));

        debug!(key = %key, generation, "Watching extraction for active session");
    }

    // =========================================================================
    // Player Events
    // =========================================================================

    /// Embedded player finished loading
    pub fn embed_ready(&self) -> Result<PlaybackSnapshot> {
        let mut session = self.shared.session.lock();
        let key = session.require_active()?.clone();

        if session.record.state != LifecycleState::EmbedLoading {
            return Err(Error::InvalidTransition {
                from: session.record.state.to_string(),
                to: LifecycleState::EmbedPlaying.to_string(),
            });
        }

        if !session.record.has_playable_stream() {
            session.record.descriptor = self.cache.get_fast(&key);
        }
        let next = if session.record.has_playable_stream() {
            LifecycleState::StreamReady
        } else {
            LifecycleState::EmbedPlaying
        };
        session.record.transition(next)?;

        debug!(key = %key, state = %next, "Embed ready");
        Ok(self.shared.publish(&session))
    }

    pub fn on_pause(&self) -> bool {
        self.record_opportunity(OpportunityKind::Pause)
    }

    pub fn on_buffering(&self) -> bool {
        self.record_opportunity(OpportunityKind::Buffering)
    }

    pub fn on_background(&self) -> bool {
        self.record_opportunity(OpportunityKind::Background)
    }

    pub fn request_upgrade(&self) -> bool {
        self.record_opportunity(OpportunityKind::UserRequested)
    }

    /// Note a moment at which switching would be unobtrusive
    fn record_opportunity(&self, kind: OpportunityKind) -> bool {
        let mut session = self.shared.session.lock();
        if !session.record.can_upgrade() {
            return false;
        }

        session.record.opportunities.push(UpgradeOpportunity {
            kind,
            at: Utc::now(),
        });
        debug!(
            kind = %kind,
            recorded = session.record.opportunities.len(),
            "Upgrade opportunity"
        );
        self.shared.publish(&session);
        true
    }

    /// Upgrade allowed and a pause or buffering stall was seen
    pub fn should_attempt_upgrade(&self) -> bool {
        let session = self.shared.session.lock();
        let record = &session.record;
        record.can_upgrade()
            && record.opportunities.iter().any(|o| {
                matches!(o.kind, OpportunityKind::Pause | OpportunityKind::Buffering)
            })
    }

    /// Begin switching to the resolved stream
    ///
    /// Returns false without any change when there is no resolved stream,
    /// an upgrade was already attempted, or playback is already direct.
    pub fn attempt_upgrade(&self, current_time: f64, is_playing: bool) -> bool {
        let mut session = self.shared.session.lock();
        let record = &mut session.record;
        if !record.state.can_start_upgrade() || !record.can_upgrade() {
            return false;
        }
        if record.transition(LifecycleState::Upgrading).is_err() {
            return false;
        }

        record.upgrade_attempted = true;
        record.last_known_position = current_time;
        record.was_playing = is_playing;

        info!(position = current_time, playing = is_playing, "Upgrading to direct stream");
        self.shared.publish(&session);
        true
    }

    /// Direct player took over
    pub fn upgrade_complete(&self) -> Result<PlaybackSnapshot> {
        let mut session = self.shared.session.lock();
        session.require_active()?;
        self.expect_upgrading(&session, LifecycleState::DirectPlaying)?;

        session.record.transition(LifecycleState::DirectPlaying)?;
        session.record.active_strategy = Some(PlaybackStrategy::Direct);

        info!("Upgrade complete");
        Ok(self.shared.publish(&session))
    }

    /// Direct player could not take over, stay on the embed for this session
    pub fn upgrade_failed(&self, reason: impl Into<String>) -> Result<PlaybackSnapshot> {
        let reason = reason.into();
        let mut session = self.shared.session.lock();
        session.require_active()?;
        self.expect_upgrading(&session, LifecycleState::UpgradeFailed)?;

        session.record.transition(LifecycleState::UpgradeFailed)?;
        warn!(reason = %reason, "Upgrade failed, staying on embed");
        session.record.stream_error = Some(reason);

        Ok(self.shared.publish(&session))
    }

    fn expect_upgrading(&self, session: &Session, to: LifecycleState) -> Result<()> {
        if session.record.state == LifecycleState::Upgrading {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: session.record.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Start a fresh extraction after a failure
    ///
    /// Returns false when a stream is already resolved or an extraction for
    /// this session is still running.
    pub fn retry_extraction(&self) -> Result<bool> {
        let mut session = self.shared.session.lock();
        let key = session.require_active()?.clone();

        if session.record.has_playable_stream() {
            return Ok(false);
        }
        if session.watcher.is_some() && self.cache.is_extracting(&key) {
            return Ok(false);
        }
        if !self.capabilities.supports_extraction(&key.platform) {
            return Err(Error::UnsupportedPlatform {
                platform: key.platform,
            });
        }

        match session.record.state {
            LifecycleState::EmbedPlaying => {
                session.record.transition(LifecycleState::StreamExtracting)?;
            }
            LifecycleState::EmbedLoading
            | LifecycleState::StreamExtracting
            | LifecycleState::DirectPlaying => {}
            other => {
                return Err(Error::InvalidTransition {
                    from: other.to_string(),
                    to: LifecycleState::StreamExtracting.to_string(),
                });
            }
        }

        self.start_extraction(&mut session);
        info!(key = %key, state = %session.record.state, "Retrying extraction");
        self.shared.publish(&session);
        Ok(true)
    }

    /// Record the player's position
    pub fn update_position(&self, position: f64, is_playing: bool) -> Result<()> {
        let mut session = self.shared.session.lock();
        session.require_active()?;
        session.record.last_known_position = position;
        session.record.was_playing = is_playing;
        self.shared.publish(&session);
        Ok(())
    }

    /// Unrecoverable player failure
    pub fn fail(&self, reason: impl Into<String>) -> Result<PlaybackSnapshot> {
        let reason = reason.into();
        let mut session = self.shared.session.lock();
        session.require_active()?;

        session.record.transition(LifecycleState::Error)?;
        session.stop_watcher();
        warn!(reason = %reason, "Playback failed");
        session.record.stream_error = Some(reason);

        Ok(self.shared.publish(&session))
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot::from(&self.shared.session.lock().record)
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.session.lock().record.state
    }

    pub fn current_key(&self) -> Option<CacheKey> {
        self.shared.session.lock().record.key.clone()
    }

    pub fn active_strategy(&self) -> Option<PlaybackStrategy> {
        self.shared.session.lock().record.active_strategy
    }

    pub fn stream_url(&self) -> Option<String> {
        let session = self.shared.session.lock();
        session.record.descriptor.as_ref().and_then(|d| d.stream_url.clone())
    }

    pub fn audio_url(&self) -> Option<String> {
        let session = self.shared.session.lock();
        session.record.descriptor.as_ref().and_then(|d| d.audio_url.clone())
    }

    pub fn quality(&self) -> Option<String> {
        let session = self.shared.session.lock();
        session.record.descriptor.as_ref().and_then(|d| d.quality.clone())
    }

    pub fn is_embed(&self) -> bool {
        self.shared.session.lock().record.is_embed()
    }

    pub fn is_direct(&self) -> bool {
        self.shared.session.lock().record.is_direct()
    }

    pub fn can_upgrade(&self) -> bool {
        self.shared.session.lock().record.can_upgrade()
    }

    pub fn stream_error(&self) -> Option<String> {
        self.shared.session.lock().record.stream_error.clone()
    }
}
