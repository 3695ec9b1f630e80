//! Playback State
//!
//! Lifecycle states, the transition table and the per-session record.

use crate::cache::entry::{CacheKey, StreamDescriptor};
use crate::error::{Error, Result};
use crate::playback::capabilities::PlatformCapabilities;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Lifecycle State
// =============================================================================

/// State of the single active playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Idle,
    EmbedLoading,
    EmbedPlaying,
    StreamExtracting,
    StreamReady,
    Upgrading,
    DirectPlaying,
    UpgradeFailed,
    Error,
}

impl LifecycleState {
    /// States from which an embed-to-direct upgrade may start
    pub fn can_start_upgrade(&self) -> bool {
        matches!(
            self,
            LifecycleState::EmbedPlaying
                | LifecycleState::StreamExtracting
                | LifecycleState::StreamReady
        )
    }

    /// Whether the transition `self -> next` is allowed
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if *self == next {
            return false;
        }
        // cleanup and fatal errors are reachable from anywhere
        if next == Idle || next == Error {
            return true;
        }

        matches!(
            (*self, next),
            (Idle, EmbedLoading)
                | (Idle, StreamExtracting)
                | (Idle, DirectPlaying)
                | (EmbedLoading, EmbedPlaying)
                | (EmbedLoading, StreamReady)
                | (EmbedPlaying, StreamExtracting)
                | (EmbedPlaying, StreamReady)
                | (EmbedPlaying, Upgrading)
                | (StreamExtracting, StreamReady)
                | (StreamExtracting, DirectPlaying)
                | (StreamExtracting, Upgrading)
                | (StreamReady, Upgrading)
                | (Upgrading, DirectPlaying)
                | (Upgrading, UpgradeFailed)
        )
    }

    /// Check a transition, returning an error naming both states
    pub fn check_transition(&self, next: LifecycleState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::EmbedLoading => "embed_loading",
            LifecycleState::EmbedPlaying => "embed_playing",
            LifecycleState::StreamExtracting => "stream_extracting",
            LifecycleState::StreamReady => "stream_ready",
            LifecycleState::Upgrading => "upgrading",
            LifecycleState::DirectPlaying => "direct_playing",
            LifecycleState::UpgradeFailed => "upgrade_failed",
            LifecycleState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// Strategy and Opportunities
// =============================================================================

/// How the media is being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStrategy {
    /// Platform's embedded player
    #[default]
    Embed,
    /// Resolved stream played by the native player
    Direct,
}

/// Moment at which switching players would not disrupt the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Pause,
    Buffering,
    Background,
    UserRequested,
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityKind::Pause => write!(f, "pause"),
            OpportunityKind::Buffering => write!(f, "buffering"),
            OpportunityKind::Background => write!(f, "background"),
            OpportunityKind::UserRequested => write!(f, "user_requested"),
        }
    }
}

/// A recorded upgrade opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOpportunity {
    pub kind: OpportunityKind,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Playback Record
// =============================================================================

/// Everything known about the active session
#[derive(Debug, Clone, Default)]
pub struct PlaybackRecord {
    pub key: Option<CacheKey>,
    pub state: LifecycleState,
    pub capabilities: Option<PlatformCapabilities>,
    pub preferred_strategy: PlaybackStrategy,
    /// Player currently producing output, `None` while waiting for a stream
    pub active_strategy: Option<PlaybackStrategy>,
    pub descriptor: Option<Arc<StreamDescriptor>>,
    pub upgrade_attempted: bool,
    pub opportunities: Vec<UpgradeOpportunity>,
    /// Seconds into the media at the last report
    pub last_known_position: f64,
    pub was_playing: bool,
    pub stream_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PlaybackRecord {
    /// Fresh record for a new session
    pub fn start(
        key: CacheKey,
        capabilities: PlatformCapabilities,
        preferred_strategy: PlaybackStrategy,
    ) -> Self {
        Self {
            key: Some(key),
            capabilities: Some(capabilities),
            preferred_strategy,
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Move to `next` if the transition table allows it
    pub fn transition(&mut self, next: LifecycleState) -> Result<()> {
        self.state.check_transition(next)?;
        self.state = next;
        Ok(())
    }

    /// Whether the session holds a playable resolved stream
    pub fn has_playable_stream(&self) -> bool {
        self.descriptor.as_ref().is_some_and(|d| d.is_playable())
    }

    /// Direct upgrade possible: stream ready, not yet tried, not already direct
    pub fn can_upgrade(&self) -> bool {
        self.has_playable_stream()
            && !self.upgrade_attempted
            && self.active_strategy != Some(PlaybackStrategy::Direct)
    }

    pub fn is_embed(&self) -> bool {
        self.active_strategy == Some(PlaybackStrategy::Embed)
    }

    pub fn is_direct(&self) -> bool {
        self.active_strategy == Some(PlaybackStrategy::Direct)
    }
}

// =============================================================================
// Playback Snapshot
// =============================================================================

/// UI-facing view of the session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub key: Option<CacheKey>,
    pub state: LifecycleState,
    pub active_strategy: Option<PlaybackStrategy>,
    pub preferred_strategy: PlaybackStrategy,
    pub capabilities: Option<PlatformCapabilities>,
    pub stream_url: Option<String>,
    pub audio_url: Option<String>,
    pub quality: Option<String>,
    pub is_embed: bool,
    pub is_direct: bool,
    pub can_upgrade: bool,
    pub upgrade_attempted: bool,
    pub opportunity_count: usize,
    pub last_known_position: f64,
    pub was_playing: bool,
    pub stream_error: Option<String>,
}

impl From<&PlaybackRecord> for PlaybackSnapshot {
    fn from(record: &PlaybackRecord) -> Self {
        let descriptor = record.descriptor.as_deref();
        Self {
            key: record.key.clone(),
            state: record.state,
            active_strategy: record.active_strategy,
            preferred_strategy: record.preferred_strategy,
            capabilities: record.capabilities,
            stream_url: descriptor.and_then(|d| d.stream_url.clone()),
            audio_url: descriptor.and_then(|d| d.audio_url.clone()),
            quality: descriptor.and_then(|d| d.quality.clone()),
            is_embed: record.is_embed(),
            is_direct: record.is_direct(),
            can_upgrade: record.can_upgrade(),
            upgrade_attempted: record.upgrade_attempted,
            opportunity_count: record.opportunities.len(),
            last_known_position: record.last_known_position,
            was_playing: record.was_playing,
            stream_error: record.stream_error.clone(),
        }
    }
}
