//! Volatile Durable Store
//!
//! In-process implementation of the durable store port. Used when no
//! persistence path is configured and in tests, where availability can be
//! toggled to exercise fast-tier-only degradation.

use crate::cache::storage::{DurableStore, StoredEntry};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// Volatile Store
// =============================================================================

/// Durable-tier store that lives only as long as the process
pub struct VolatileStore {
    /// Entries keyed by `platform:contentId`
    store: RwLock<HashMap<String, StoredEntry>>,
    /// Is the store answering calls
    available: AtomicBool,
    /// Number of calls that were refused while unavailable
    refused: AtomicU64,
}

impl VolatileStore {
    /// Create an empty, available store
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            refused: AtomicU64::new(0),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Check if available
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Number of calls refused while unavailable
    pub fn refused_calls(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.refused.fetch_add(1, Ordering::Relaxed);
            Err(Error::StoreUnavailable {
                store: self.name().to_string(),
            })
        }
    }
}

impl Default for VolatileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for VolatileStore {
    fn name(&self) -> &'static str {
        "volatile"
    }

    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        self.ensure_available()?;
        Ok(self.store.read().get(key).cloned())
    }

    async fn put(&self, entry: StoredEntry) -> Result<()> {
        self.ensure_available()?;
        self.store.write().insert(entry.storage_key(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.store.write().remove(key).is_some())
    }

    async fn record_access(
        &self,
        key: &str,
        cached_at: DateTime<Utc>,
        accessed_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.ensure_available()?;
        match self.store.write().get_mut(key) {
            Some(entry) if entry.is_version(cached_at) => {
                entry.record_access(accessed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_version(&self, key: &str, cached_at: DateTime<Utc>) -> Result<bool> {
        self.ensure_available()?;
        let mut store = self.store.write();
        if store.get(key).is_some_and(|e| e.is_version(cached_at)) {
            store.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list_all(&self) -> Result<Vec<StoredEntry>> {
        self.ensure_available()?;
        Ok(self.store.read().values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        self.ensure_available()?;
        Ok(self.store.read().len())
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available()?;
        self.store.write().clear();
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available())
    }
}
