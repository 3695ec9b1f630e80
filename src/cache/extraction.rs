//! Extraction State Tracking
//!
//! Per-key record of the extraction lifecycle. At most one record per key can
//! be `Extracting`, and it carries a shared handle that every concurrent
//! caller awaits instead of starting a second extraction.

use crate::cache::entry::StreamDescriptor;
use crate::error::ExtractionError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one extraction attempt, shared by every joined caller
pub type ExtractionOutcome = std::result::Result<Arc<StreamDescriptor>, ExtractionError>;

/// Awaitable handle to an in-flight extraction
pub type ExtractionHandle = Shared<BoxFuture<'static, ExtractionOutcome>>;

// =============================================================================
// Extraction Status
// =============================================================================

/// Extraction status of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    #[default]
    Idle,
    Extracting,
    Ready,
    Failed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Idle => write!(f, "idle"),
            ExtractionStatus::Extracting => write!(f, "extracting"),
            ExtractionStatus::Ready => write!(f, "ready"),
            ExtractionStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Extraction State
// =============================================================================

/// Extraction record for one key
#[derive(Clone)]
pub struct ExtractionState {
    pub status: ExtractionStatus,
    pub started_at: DateTime<Utc>,
    pub handle: Option<ExtractionHandle>,
    pub error: Option<ExtractionError>,
    /// Attempt that owns this record
    attempt: u64,
}

impl fmt::Debug for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionState")
            .field("status", &self.status)
            .field("started_at", &self.started_at)
            .field("in_flight", &self.handle.is_some())
            .field("error", &self.error)
            .finish()
    }
}

/// Serializable view of an extraction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStateView {
    pub status: ExtractionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&ExtractionState> for ExtractionStateView {
    fn from(state: &ExtractionState) -> Self {
        Self {
            status: state.status,
            started_at: Some(state.started_at),
            error: state.error.as_ref().map(|e| e.to_string()),
        }
    }
}

impl Default for ExtractionStateView {
    fn default() -> Self {
        Self {
            status: ExtractionStatus::Idle,
            started_at: None,
            error: None,
        }
    }
}

// =============================================================================
// Join Outcome
// =============================================================================

/// Whether a caller started a new extraction or joined a running one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Started { attempt: u64 },
    Joined,
}

// =============================================================================
// Extraction Tracker
// =============================================================================

/// Map of extraction records keyed by `platform:contentId`
#[derive(Default)]
pub struct ExtractionTracker {
    states: Mutex<HashMap<String, ExtractionState>>,
    next_attempt: AtomicU64,
}

impl ExtractionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of a key, `Idle` when no record exists
    pub fn status(&self, key: &str) -> ExtractionStatus {
        self.states
            .lock()
            .get(key)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Full record of a key
    pub fn state(&self, key: &str) -> Option<ExtractionState> {
        self.states.lock().get(key).cloned()
    }

    /// Set a record directly, `Idle` removes it
    pub fn set_status(
        &self,
        key: &str,
        status: ExtractionStatus,
        handle: Option<ExtractionHandle>,
        error: Option<ExtractionError>,
    ) {
        let mut states = self.states.lock();
        if status == ExtractionStatus::Idle {
            states.remove(key);
            return;
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        states.insert(
            key.to_string(),
            ExtractionState {
                status,
                started_at: Utc::now(),
                handle,
                error,
                attempt,
            },
        );
    }

    /// Handle of the in-flight extraction for a key
    pub fn in_flight(&self, key: &str) -> Option<ExtractionHandle> {
        self.states
            .lock()
            .get(key)
            .filter(|s| s.status == ExtractionStatus::Extracting)
            .and_then(|s| s.handle.clone())
    }

    /// Whether an extraction is running for a key
    pub fn is_extracting(&self, key: &str) -> bool {
        self.in_flight(key).is_some()
    }

    /// Join the in-flight extraction for `key` or start one with `start`
    ///
    /// `start` runs under the tracker lock and receives the attempt number it
    /// must pass back to [`ExtractionTracker::finish`]. It must not block.
    pub fn join_or_start<F>(&self, key: &str, start: F) -> (ExtractionHandle, JoinKind)
    where
        F: FnOnce(u64) -> ExtractionHandle,
    {
        let mut states = self.states.lock();

        if let Some(handle) = states
            .get(key)
            .filter(|s| s.status == ExtractionStatus::Extracting)
            .and_then(|s| s.handle.clone())
        {
            return (handle, JoinKind::Joined);
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        let handle = start(attempt);
        states.insert(
            key.to_string(),
            ExtractionState {
                status: ExtractionStatus::Extracting,
                started_at: Utc::now(),
                handle: Some(handle.clone()),
                error: None,
                attempt,
            },
        );

        (handle, JoinKind::Started { attempt })
    }

    /// Settle the record owned by `attempt`
    ///
    /// Success clears the record, failure leaves it `Failed` until a new
    /// attempt is triggered. Records replaced since `attempt` began are left
    /// untouched. Returns whether the record was settled.
    pub fn finish(&self, key: &str, attempt: u64, error: Option<ExtractionError>) -> bool {
        let mut states = self.states.lock();
        let owned = states.get(key).is_some_and(|s| s.attempt == attempt);
        if !owned {
            return false;
        }

        match error {
            None => {
                states.remove(key);
            }
            Some(error) => {
                if let Some(state) = states.get_mut(key) {
                    state.status = ExtractionStatus::Failed;
                    state.handle = None;
                    state.error = Some(error);
                }
            }
        }
        true
    }

    /// Drop the record of a key
    pub fn clear(&self, key: &str) {
        self.states.lock().remove(key);
    }

    /// Drop every record
    pub fn clear_all(&self) {
        self.states.lock().clear();
    }

    /// Number of running extractions
    pub fn extracting_count(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|s| s.status == ExtractionStatus::Extracting)
            .count()
    }

    /// Number of keys left in `Failed`
    pub fn failed_count(&self) -> usize {
        self.states
            .lock()
            .values()
            .filter(|s| s.status == ExtractionStatus::Failed)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn ready_handle(url: &str) -> ExtractionHandle {
        let descriptor = Arc::new(StreamDescriptor::new(url));
        async move { Ok(descriptor) }.boxed().shared()
    }

    #[test]
    fn test_idle_removes_record() {
        let tracker = ExtractionTracker::new();
        assert_eq!(tracker.status("youtube:a"), ExtractionStatus::Idle);

        tracker.set_status("youtube:a", ExtractionStatus::Ready, None, None);
        assert_eq!(tracker.status("youtube:a"), ExtractionStatus::Ready);

        tracker.set_status("youtube:a", ExtractionStatus::Idle, None, None);
        assert!(tracker.state("youtube:a").is_none());
    }

    #[tokio::test]
    async fn test_join_reuses_in_flight_handle() {
        let tracker = ExtractionTracker::new();
        let mut starts = 0;

        let (first, kind) = tracker.join_or_start("youtube:a", |_| {
            starts += 1;
            ready_handle("https://cdn/a")
        });
        assert!(matches!(kind, JoinKind::Started { .. }));

        let (second, kind) = tracker.join_or_start("youtube:a", |_| {
            starts += 1;
            ready_handle("https://cdn/other")
        });
        assert_eq!(kind, JoinKind::Joined);
        assert_eq!(starts, 1);
        assert_eq!(tracker.extracting_count(), 1);

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_finish_success_clears() {
        let tracker = ExtractionTracker::new();
        let (_, kind) = tracker.join_or_start("youtube:a", |_| ready_handle("u"));
        let JoinKind::Started { attempt } = kind else {
            panic!("expected a new attempt");
        };

        assert!(tracker.finish("youtube:a", attempt, None));
        assert_eq!(tracker.status("youtube:a"), ExtractionStatus::Idle);
    }

    #[test]
    fn test_finish_failure_is_terminal_until_retried() {
        let tracker = ExtractionTracker::new();
        let (_, kind) = tracker.join_or_start("youtube:a", |_| ready_handle("u"));
        let JoinKind::Started { attempt } = kind else {
            panic!("expected a new attempt");
        };

        let error = ExtractionError::Rejected("private video".into());
        assert!(tracker.finish("youtube:a", attempt, Some(error.clone())));

        let state = tracker.state("youtube:a").unwrap();
        assert_eq!(state.status, ExtractionStatus::Failed);
        assert_eq!(state.error, Some(error));
        assert!(state.handle.is_none());
        assert_eq!(tracker.failed_count(), 1);

        // A failed record does not block a new attempt
        let (_, kind) = tracker.join_or_start("youtube:a", |_| ready_handle("u"));
        assert!(matches!(kind, JoinKind::Started { .. }));
    }

    #[test]
    fn test_stale_attempt_does_not_settle_newer_record() {
        let tracker = ExtractionTracker::new();
        let (_, kind) = tracker.join_or_start("youtube:a", |_| ready_handle("u"));
        let JoinKind::Started { attempt: stale } = kind else {
            panic!("expected a new attempt");
        };

        tracker.clear("youtube:a");
        let (_, _) = tracker.join_or_start("youtube:a", |_| ready_handle("u"));

        assert!(!tracker.finish("youtube:a", stale, None));
        assert_eq!(tracker.status("youtube:a"), ExtractionStatus::Extracting);
    }
}
