// Catalogs
// Embedded platform table and seeded encoding presets

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::{Platform, Preset, PresetSummary};

const PLATFORMS_JSON: &str = include_str!("../../data/platforms.json");
const PRESETS_JSON: &str = include_str!("../../data/presets.json");

/// Per-platform behavior flags and defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    pub platform: Platform,

    pub display_name: String,

    /// Default RTMP server used when a destination omits its URL
    #[serde(default)]
    pub default_server: Option<String>,

    pub default_preset_id: String,

    /// Whether destinations of this platform are backed by a channel
    pub requires_channel: bool,

    pub requires_stream_key: bool,

    /// Stream key position in the URL path (0 = no masking, 2 = /app/KEY)
    #[serde(default)]
    pub stream_key_position: usize,
}

impl PlatformConfig {
    /// Redact the stream key segment from an RTMP URL for logging
    pub fn redact_url(&self, url: &str) -> String {
        if !(url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
            return url.to_string();
        }
        if self.stream_key_position == 0 {
            return url.to_string();
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return url.to_string();
        };
        let Some((host, path)) = rest.split_once('/') else {
            return url.to_string();
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < self.stream_key_position {
            return url.to_string();
        }

        let safe_path = segments[..self.stream_key_position - 1].join("/");
        format!("{scheme}://{host}/{safe_path}/***")
    }
}

#[derive(Deserialize)]
struct PlatformTable {
    platforms: Vec<PlatformConfig>,
}

/// Lookup table from platform tag to its behavior
pub struct PlatformCatalog {
    configs: HashMap<Platform, PlatformConfig>,
}

impl PlatformCatalog {
    /// Load the embedded platform table; every platform must have an entry
    pub fn load() -> Result<Self, String> {
        let table: PlatformTable = serde_json::from_str(PLATFORMS_JSON)
            .map_err(|e| format!("Failed to parse platforms.json: {e}"))?;

        let configs: HashMap<Platform, PlatformConfig> = table
            .platforms
            .into_iter()
            .map(|config| (config.platform, config))
            .collect();

        if let Some(missing) = Platform::ALL.iter().find(|p| !configs.contains_key(p)) {
            return Err(format!("platforms.json has no entry for '{missing}'"));
        }

        Ok(Self { configs })
    }

    pub fn get(&self, platform: Platform) -> Option<&PlatformConfig> {
        self.configs.get(&platform)
    }

    /// All platform entries in declaration order
    pub fn list(&self) -> Vec<&PlatformConfig> {
        Platform::ALL.iter().filter_map(|p| self.configs.get(p)).collect()
    }

    pub fn requires_channel(&self, platform: Platform) -> bool {
        self.get(platform).map(|c| c.requires_channel).unwrap_or(true)
    }

    /// Redact a URL using the platform's key position, falling back to the last segment
    pub fn redact_url(&self, platform: Platform, url: &str) -> String {
        match self.get(platform) {
            Some(config) if config.stream_key_position > 0 => config.redact_url(url),
            _ => generic_redact(url),
        }
    }
}

/// Mask the last path segment of an RTMP URL
pub fn generic_redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((host, path)) = rest.split_once('/') else {
        return url.to_string();
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return url.to_string();
    }

    let safe_path = segments[..segments.len() - 1].join("/");
    format!("{scheme}://{host}/{safe_path}/***")
}

fn rtmp_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"rtmps?://[^\s"']+"#).expect("Invalid RTMP URL pattern"))
}

/// Mask stream keys inside any RTMP URLs embedded in free text
pub fn redact_secrets(message: &str) -> String {
    rtmp_url_pattern()
        .replace_all(message, |caps: &regex::Captures| generic_redact(&caps[0]))
        .into_owned()
}

#[derive(Deserialize)]
struct PresetTable {
    presets: Vec<Preset>,
}

/// Read-only preset catalog seeded from the embedded defaults
pub struct PresetCatalog {
    presets: Vec<Preset>,
}

impl PresetCatalog {
    pub fn load() -> Result<Self, String> {
        let table: PresetTable = serde_json::from_str(PRESETS_JSON)
            .map_err(|e| format!("Failed to parse presets.json: {e}"))?;
        Ok(Self { presets: table.presets })
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.id == id)
    }

    pub fn list(&self) -> &[Preset] {
        &self.presets
    }

    pub fn summaries(&self) -> Vec<PresetSummary> {
        self.presets.iter().map(Preset::to_summary).collect()
    }

    pub fn list_for(&self, platform: Platform) -> Vec<&Preset> {
        self.presets.iter().filter(|preset| preset.platform == platform).collect()
    }

    /// The platform's default preset, if it is present in the catalog
    pub fn default_for(&self, platforms: &PlatformCatalog, platform: Platform) -> Option<&Preset> {
        platforms
            .get(platform)
            .and_then(|config| self.get(&config.default_preset_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_platform_has_a_default_preset() {
        let platforms = PlatformCatalog::load().unwrap();
        let presets = PresetCatalog::load().unwrap();
        for platform in Platform::ALL {
            let preset = presets.default_for(&platforms, platform);
            assert!(preset.is_some(), "no default preset for {platform}");
            assert_eq!(preset.unwrap().platform, platform);
        }
    }

    #[test]
    fn test_hls_needs_no_channel() {
        let platforms = PlatformCatalog::load().unwrap();
        assert!(!platforms.requires_channel(Platform::Hls));
        assert!(platforms.requires_channel(Platform::Youtube));
    }

    #[test]
    fn test_redact_url_masks_key_segment() {
        let platforms = PlatformCatalog::load().unwrap();
        assert_eq!(
            platforms.redact_url(Platform::Youtube, "rtmp://a.rtmp.youtube.com/live2/abcd-efgh"),
            "rtmp://a.rtmp.youtube.com/live2/***"
        );
        assert_eq!(
            platforms.redact_url(Platform::Custom, "rtmps://ingest.example.com/app/secret"),
            "rtmps://ingest.example.com/app/***"
        );
    }

    #[test]
    fn test_redact_secrets_in_free_text() {
        let message = "push to rtmp://live.twitch.tv/app/live_123_abc failed: timeout";
        assert_eq!(
            redact_secrets(message),
            "push to rtmp://live.twitch.tv/app/*** failed: timeout"
        );
    }
}
