//! Resolver Configuration
//!
//! One YAML document with a section per component. Every section and field
//! has a default, so an empty file (or no file) yields a working setup.
//!
//! ```yaml
//! cache:
//!   fast: { capacity: 100, ttl_ms: 14400000 }
//!   durable: { capacity: 500, ttl_ms: 18000000, eviction_margin: 10 }
//! durable:
//!   path: /var/lib/stream-resolver
//! prefetch:
//!   max_concurrent: 2
//! extraction:
//!   base_url: http://extractor:8000
//! ```

use crate::cache::manager::StreamCacheConfig;
use crate::error::{Error, Result};
use crate::extract::http::ExtractionConfig;
use crate::playback::capabilities::CapabilityTable;
use crate::playback::lifecycle::PlaybackConfig;
use crate::prefetch::queue::PrefetchConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Sections
// =============================================================================

/// Durable tier backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    /// Directory of the file store, in-memory store when absent
    pub path: Option<PathBuf>,
    /// fsync each entry before it becomes visible
    pub sync_writes: bool,
    /// Period of the expired-entry sweep
    pub sweep_interval_secs: u64,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_writes: true,
            sweep_interval_secs: 300,
        }
    }
}

impl DurableConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Listen addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub rest_addr: String,
    pub health_addr: String,
    pub metrics_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rest_addr: "0.0.0.0:8090".to_string(),
            health_addr: "0.0.0.0:8081".to_string(),
            metrics_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn rest_socket(&self) -> Result<SocketAddr> {
        parse_addr("REST API", &self.rest_addr)
    }

    pub fn health_socket(&self) -> Result<SocketAddr> {
        parse_addr("health server", &self.health_addr)
    }

    pub fn metrics_socket(&self) -> Result<SocketAddr> {
        parse_addr("metrics server", &self.metrics_addr)
    }
}

fn parse_addr(what: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", what, addr, e)))
}

// =============================================================================
// Resolver Configuration
// =============================================================================

/// Complete configuration of the resolver daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub cache: StreamCacheConfig,
    pub durable: DurableConfig,
    pub prefetch: PrefetchConfig,
    pub playback: PlaybackConfig,
    pub platforms: CapabilityTable,
    pub extraction: ExtractionConfig,
    pub api: ApiConfig,
}

impl ResolverConfig {
    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: ResolverConfig = if raw.trim().is_empty() {
            ResolverConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.prefetch.validate()?;
        self.extraction.validate()?;
        if self.durable.sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "durable sweep interval must be positive".into(),
            ));
        }
        self.api.rest_socket()?;
        self.api.health_socket()?;
        self.api.metrics_socket()?;
        Ok(())
    }
}
