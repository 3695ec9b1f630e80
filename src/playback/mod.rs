//! Playback Lifecycle
//!
//! State machine for the single active playback session, moving it from a
//! low-latency embedded player to the resolved stream when that can happen
//! without a visible glitch.
//!
//! ```text
//! idle ─> embed_loading ─> embed_playing ─> stream_extracting ─> stream_ready
//!                                                                    │
//!                    upgrade_failed <─ upgrading <──────────────────┘
//!                                         │
//!                                         └─> direct_playing
//!
//! any state ─> error, any state ─> idle (cleanup)
//! ```

pub mod capabilities;
pub mod lifecycle;
pub mod state;

pub use capabilities::{CapabilityTable, PlatformCapabilities};
pub use lifecycle::{PlaybackConfig, PlaybackLifecycle};
pub use state::{
    LifecycleState, OpportunityKind, PlaybackRecord, PlaybackSnapshot, PlaybackStrategy,
    UpgradeOpportunity,
};
