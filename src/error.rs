//! Error types for the Stream Resolver
//!
//! Provides structured error types for the tiered cache, the prefetch
//! scheduler, the playback lifecycle and the outer API surface.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the resolver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Durable Storage Errors
    // =========================================================================
    #[error("Durable store unavailable: {store}")]
    StoreUnavailable { store: String },

    #[error("Durable store entry corrupt: {key} - {reason}")]
    StoreCorrupt { key: String, reason: String },

    // =========================================================================
    // Extraction Errors
    // =========================================================================
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Platform does not support extraction: {platform}")]
    UnsupportedPlatform { platform: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("No active playback session")]
    NoActiveSession,

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed extraction
///
/// Cloneable so that every caller joined on the same in-flight extraction
/// observes the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("extraction backend unreachable: {0}")]
    Unreachable(String),

    #[error("extraction backend returned {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("no playable stream for {key}")]
    NoStream { key: String },

    #[error("extraction rejected: {0}")]
    Rejected(String),

    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

impl ExtractionError {
    /// Whether a later attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Unreachable(_) | ExtractionError::Aborted(_) => true,
            ExtractionError::Remote { status, .. } => *status >= 500 || *status == 429,
            ExtractionError::NoStream { .. } | ExtractionError::Rejected(_) => false,
        }
    }
}

/// Action to take on error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry the operation after a delay
    RetryAfter(Duration),
    /// Keep running on the remaining healthy components
    Degrade,
    /// Don't retry, the request itself is wrong
    NoRetry,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Extraction failures - retry later
            Error::Extraction(_) | Error::Http(_) => {
                ErrorAction::RetryAfter(Duration::from_secs(5))
            }

            // Durable tier problems never reach callers, fast tier keeps serving
            Error::StoreUnavailable { .. } | Error::StoreCorrupt { .. } | Error::Io(_) => {
                ErrorAction::Degrade
            }

            // Contract violations and bad input
            Error::Configuration(_)
            | Error::UnsupportedPlatform { .. }
            | Error::InvalidTransition { .. }
            | Error::NoActiveSession
            | Error::ApiValidation(_)
            | Error::InvalidKey(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRetry,

            Error::Internal(_) | Error::Metrics(_) => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.action(), ErrorAction::RetryAfter(_))
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Extraction(e) => e.is_transient(),
            Error::Http(_) | Error::StoreUnavailable { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for the resolver
pub type Result<T> = std::result::Result<T, Error>;
