//! Stream Resolver
//!
//! Resolves content items from media platforms into directly playable stream
//! descriptors, keeps them warm in a two-tier cache, extracts ahead of demand
//! and drives the embed-to-direct playback upgrade.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          REST API (axum)                              │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐            ┌──────────────────────────────┐ │
//! │  │ PriorityPrefetchQueue│            │      PlaybackLifecycle       │ │
//! │  │ (tick, retry, gate)  │            │ (embed -> stream -> direct)  │ │
//! │  └──────────┬───────────┘            └──────────────┬───────────────┘ │
//! │             │        resolve_with (single flight)   │                 │
//! │             └───────────────────┬───────────────────┘                 │
//! │                     ┌───────────┴───────────┐                         │
//! │                     │  TieredStreamCache    │──── ExtractionClient    │
//! │                     │  fast  │  durable     │     (HTTP backend)      │
//! │                     └────────┴──────────────┘                         │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: two-tier descriptor cache with extraction tracking
//! - [`prefetch`]: priority-ordered background extraction
//! - [`playback`]: lifecycle state machine of the active session
//! - [`extract`]: HTTP extraction client
//! - [`api`]: REST, health and metrics servers
//! - [`resolver`]: component wiring
//! - [`domain`]: collaborator ports
//! - [`error`]: error types and handling

pub mod api;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod playback;
pub mod prefetch;
pub mod resolver;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, PrometheusExporter, RestRouter};

pub use cache::{
    CacheEntry, CacheEvent, CacheKey, CacheLookupResult, CachePriority, CacheStats, CacheTier,
    DurableStore, ExtractionStatus, FileStore, SharedDurableStore, StreamCacheConfig,
    StreamDescriptor, TierConfig, TieredStreamCache, VolatileStore,
};

pub use config::ResolverConfig;

pub use domain::ports::{
    ConnectionClass, ExtractionClient, ExtractionClientRef, NetworkConditions, NetworkMonitor,
    NetworkMonitorRef,
};

pub use error::{Error, ErrorAction, ExtractionError, Result};

pub use extract::{ExtractionConfig, HttpExtractionClient};

pub use playback::{
    CapabilityTable, LifecycleState, PlatformCapabilities, PlaybackConfig, PlaybackLifecycle,
    PlaybackSnapshot, PlaybackStrategy,
};

pub use prefetch::{
    EnqueueOutcome, PrefetchConfig, PrefetchRequest, PrefetchSource, PrefetchStats,
    PriorityPrefetchQueue, StaticNetworkMonitor,
};

pub use resolver::{Resolver, ResolverStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
