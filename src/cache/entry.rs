//! Cache Entry Types
//!
//! Defines cache keys, stream descriptors, priorities and cache entries.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Cache Key
// =============================================================================

/// Unique identifier for a content item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKey {
    /// Platform name (e.g., "youtube", "vimeo")
    pub platform: String,
    /// Content identifier within the platform
    pub content_id: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(platform: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            content_id: content_id.into(),
        }
    }

    /// Get the `platform:contentId` string used by every tier
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}", self.platform, self.content_id)
    }

    /// Parse from storage key string
    ///
    /// Only the first `:` separates platform from content id, content ids
    /// may themselves contain colons.
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let (platform, content_id) = key.split_once(':')?;
        if platform.is_empty() || content_id.is_empty() {
            return None;
        }
        Some(Self::new(platform, content_id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.content_id)
    }
}

// =============================================================================
// Stream Descriptor
// =============================================================================

/// Resolved playable-stream metadata for one content item
///
/// Immutable once produced. Re-resolution replaces the whole descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Primary stream URL
    #[serde(default)]
    pub stream_url: Option<String>,
    /// Separate audio URL for split audio/video delivery
    #[serde(default)]
    pub audio_url: Option<String>,
    /// Quality label (e.g., "1080p")
    #[serde(default)]
    pub quality: Option<String>,
    /// Stream requires an authenticated session
    #[serde(default)]
    pub requires_auth: bool,
    /// Stream is premium-only content
    #[serde(default)]
    pub is_premium: bool,
    /// Error reported by the extraction backend
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamDescriptor {
    /// Create a descriptor for a single muxed stream
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: Some(stream_url.into()),
            ..Default::default()
        }
    }

    /// Set the split audio URL
    pub fn with_audio(mut self, audio_url: impl Into<String>) -> Self {
        self.audio_url = Some(audio_url.into());
        self
    }

    /// Set the quality label
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    /// Whether this descriptor carries a playable URL
    pub fn is_playable(&self) -> bool {
        self.error.is_none() && self.stream_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Whether audio is delivered separately from video
    pub fn is_split(&self) -> bool {
        self.audio_url.is_some()
    }
}

// =============================================================================
// Cache Priority
// =============================================================================

/// Retention priority of a cache entry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl CachePriority {
    /// Numeric rank, higher is kept longer
    pub fn rank(&self) -> u8 {
        match self {
            CachePriority::Low => 0,
            CachePriority::Normal => 1,
            CachePriority::High => 2,
            CachePriority::Critical => 3,
        }
    }
}

impl fmt::Display for CachePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePriority::Low => write!(f, "low"),
            CachePriority::Normal => write!(f, "normal"),
            CachePriority::High => write!(f, "high"),
            CachePriority::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached stream descriptor with retention metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Unique key for this entry
    pub key: CacheKey,
    /// The resolved descriptor
    pub descriptor: Arc<StreamDescriptor>,
    /// Time when the entry was written
    pub cached_at: DateTime<Utc>,
    /// Time after which the entry is logically absent
    pub expires_at: DateTime<Utc>,
    /// Number of successful reads
    pub access_count: u64,
    /// Time of the last successful read
    pub last_accessed_at: DateTime<Utc>,
    /// Retention priority
    pub priority: CachePriority,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now
    pub fn new(
        key: CacheKey,
        descriptor: Arc<StreamDescriptor>,
        priority: CachePriority,
        ttl: Duration,
    ) -> Self {
        Self::created_at(key, descriptor, priority, ttl, Utc::now())
    }

    /// Create a new entry as of `now`
    pub fn created_at(
        key: CacheKey,
        descriptor: Arc<StreamDescriptor>,
        priority: CachePriority,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        // expires_at must stay strictly after cached_at
        let ttl = ChronoDuration::from_std(ttl)
            .unwrap_or(ChronoDuration::MAX)
            .max(ChronoDuration::milliseconds(1));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key,
            descriptor,
            cached_at: now,
            expires_at,
            access_count: 0,
            last_accessed_at: now,
            priority,
        }
    }

    /// Record a successful read
    pub fn record_access(&mut self) {
        self.record_access_at(Utc::now());
    }

    /// Record a successful read at a given time
    pub fn record_access_at(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count += 1;
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the entry has expired as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Copy of this entry for another tier, expiring no later than `ttl` from now
    pub fn promoted(&self, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut entry = self.clone();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let cap = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        entry.expires_at = entry.expires_at.min(cap);
        entry
    }
}
