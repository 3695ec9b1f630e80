//! Domain Ports - Collaborator traits for the stream resolver
//!
//! These traits define the boundaries between the resolver core and the
//! outside world. Adapters implement them to provide concrete functionality.

use crate::cache::entry::StreamDescriptor;
use crate::error::ExtractionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Extraction Client Port
// =============================================================================

/// Port for the remote extraction operation
///
/// One call per (platform, content id), idempotent, no side effects beyond
/// the remote service. Timeouts are the implementation's concern.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Resolve a content item to a stream descriptor
    async fn resolve(
        &self,
        platform: &str,
        content_id: &str,
    ) -> std::result::Result<StreamDescriptor, ExtractionError>;
}

// =============================================================================
// Network Condition Port
// =============================================================================

/// Connection speed class reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionClass {
    Slow,
    Medium,
    #[default]
    Fast,
}

impl std::fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionClass::Slow => write!(f, "slow"),
            ConnectionClass::Medium => write!(f, "medium"),
            ConnectionClass::Fast => write!(f, "fast"),
        }
    }
}

/// Host network signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConditions {
    pub is_online: bool,
    pub is_data_saver_mode: bool,
    pub connection_class: ConnectionClass,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            is_online: true,
            is_data_saver_mode: false,
            connection_class: ConnectionClass::Fast,
        }
    }
}

impl NetworkConditions {
    /// Whether background extraction may run under these conditions
    pub fn allows_background_work(&self) -> bool {
        self.is_online && !self.is_data_saver_mode && self.connection_class != ConnectionClass::Slow
    }
}

/// Port for the host's network signal set, polled once per scheduling tick
pub trait NetworkMonitor: Send + Sync {
    /// Current conditions
    fn conditions(&self) -> NetworkConditions;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ExtractionClientRef = Arc<dyn ExtractionClient>;
pub type NetworkMonitorRef = Arc<dyn NetworkMonitor>;
