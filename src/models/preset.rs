// Preset Model
// Encoding parameter bundles referenced by destinations

use serde::{Deserialize, Serialize};
use crate::models::Platform;

/// Video encoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoParams {
    /// Codec name (e.g., "h264", "h265")
    pub codec: String,

    pub width: u32,

    pub height: u32,

    /// Frame rate (e.g., 30, 60)
    pub framerate: u32,

    pub bitrate_kbps: u32,

    /// Codec profile (e.g., "high", "main")
    #[serde(default)]
    pub profile: Option<String>,

    /// GOP size in frames
    pub gop_size: u32,

    /// Rate control mode (e.g., "CBR", "VBR", "QVBR")
    pub rate_control: String,
}

impl VideoParams {
    /// Get resolution as "WIDTHxHEIGHT"
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Audio encoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Codec name (e.g., "aac")
    pub codec: String,

    pub bitrate_kbps: u32,

    /// Sample rate in Hz (e.g., 48000)
    pub sample_rate: u32,

    /// Channel layout (e.g., "stereo", "mono")
    pub channel_layout: String,
}

/// Optional platform-specific tuning hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformHints {
    #[serde(default)]
    pub max_bitrate_kbps: Option<u32>,

    #[serde(default)]
    pub keyframe_interval_secs: Option<u32>,

    #[serde(default)]
    pub low_latency: bool,
}

/// Immutable-by-convention encoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub video: VideoParams,
    pub audio: AudioParams,
    #[serde(default)]
    pub hints: PlatformHints,
}

impl Preset {
    pub fn to_summary(&self) -> PresetSummary {
        PresetSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            platform: self.platform,
            resolution: self.video.resolution(),
            framerate: self.video.framerate,
            video_bitrate_kbps: self.video.bitrate_kbps,
        }
    }
}

/// Lightweight preset view for list endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PresetSummary {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub resolution: String,
    pub framerate: u32,
    pub video_bitrate_kbps: u32,
}
