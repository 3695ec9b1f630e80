//! Prefetch Scheduling
//!
//! Background extraction ahead of playback, ordered by how likely an item
//! is to be played next.
//!
//! ```text
//! enqueue ──> [dedupe/upgrade] ──> pending (IndexMap)
//!                                       │  tick: paused? saturated? network?
//!                                       v
//!                         TieredStreamCache::resolve_with ──> ExtractionClient
//!                                       │
//!                        success ───────┴─────── failure ──> retry after delay
//! ```

pub mod network;
pub mod queue;
pub mod request;

pub use network::StaticNetworkMonitor;
pub use queue::{
    EnqueueOutcome, PrefetchConfig, PrefetchStats, PriorityPrefetchQueue, QueuedRequestView,
    TickOutcome,
};
pub use request::{PrefetchRequest, PrefetchSource, PriorityWeights};
