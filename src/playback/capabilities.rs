//! Platform Capabilities
//!
//! Injectable table of what each platform supports. The defaults cover the
//! common platforms; deployments override or extend them through config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a platform supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformCapabilities {
    /// Platform offers an embeddable player
    pub can_embed: bool,
    /// Resolved streams can be played directly
    pub can_direct_stream: bool,
    /// Embedded player exposes a scripting API
    pub can_use_native_api: bool,
    /// Embedded player reports end of playback
    pub can_detect_end: bool,
    /// Embedded playback shows ads
    pub has_ads: bool,
    /// Audio-only platform, always played directly
    pub audio_only: bool,
    /// Platform can be resolved by the extraction backend
    pub supports_extraction: bool,
}

impl Default for PlatformCapabilities {
    /// Unknown platforms: no embed, resolved and played directly
    fn default() -> Self {
        Self {
            can_embed: false,
            can_direct_stream: true,
            can_use_native_api: false,
            can_detect_end: false,
            has_ads: false,
            audio_only: false,
            supports_extraction: true,
        }
    }
}

impl PlatformCapabilities {
    fn embeddable(has_ads: bool, native_api: bool) -> Self {
        Self {
            can_embed: true,
            can_direct_stream: true,
            can_use_native_api: native_api,
            can_detect_end: native_api,
            has_ads,
            audio_only: false,
            supports_extraction: true,
        }
    }

    fn audio() -> Self {
        Self {
            audio_only: true,
            can_detect_end: true,
            ..Self::default()
        }
    }

    /// Whether a stream for this platform is worth resolving at all
    pub fn can_resolve(&self) -> bool {
        self.supports_extraction && self.can_direct_stream
    }
}

/// Capabilities keyed by platform name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityTable {
    /// Known platforms (case-sensitive names)
    pub platforms: BTreeMap<String, PlatformCapabilities>,
    /// Capabilities of platforms missing from the table
    pub fallback: PlatformCapabilities,
}

impl Default for CapabilityTable {
    fn default() -> Self {
        let platforms = [
            ("youtube", PlatformCapabilities::embeddable(true, true)),
            ("vimeo", PlatformCapabilities::embeddable(false, true)),
            ("dailymotion", PlatformCapabilities::embeddable(true, true)),
            ("twitch", PlatformCapabilities::embeddable(true, false)),
            ("soundcloud", PlatformCapabilities::audio()),
            ("bandcamp", PlatformCapabilities::audio()),
        ]
        .into_iter()
        .map(|(name, caps)| (name.to_string(), caps))
        .collect();

        Self {
            platforms,
            fallback: PlatformCapabilities::default(),
        }
    }
}

impl CapabilityTable {
    /// Empty table where every platform gets `fallback`
    pub fn with_fallback(fallback: PlatformCapabilities) -> Self {
        Self {
            platforms: BTreeMap::new(),
            fallback,
        }
    }

    /// Add or replace a platform
    pub fn insert(&mut self, platform: impl Into<String>, caps: PlatformCapabilities) {
        self.platforms.insert(platform.into(), caps);
    }

    /// Capabilities of a platform
    pub fn get(&self, platform: &str) -> PlatformCapabilities {
        self.platforms.get(platform).copied().unwrap_or(self.fallback)
    }

    /// Whether the extraction backend can resolve this platform
    pub fn supports_extraction(&self, platform: &str) -> bool {
        self.get(platform).can_resolve()
    }
}
