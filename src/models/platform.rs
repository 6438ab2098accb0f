// Platform Model
// Closed set of streaming platforms a destination can target

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported streaming platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Generic,
    Youtube,
    Twitch,
    Linkedin,
    Custom,
    Hls,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Generic,
        Platform::Youtube,
        Platform::Twitch,
        Platform::Linkedin,
        Platform::Custom,
        Platform::Hls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Generic => "generic",
            Platform::Youtube => "youtube",
            Platform::Twitch => "twitch",
            Platform::Linkedin => "linkedin",
            Platform::Custom => "custom",
            Platform::Hls => "hls",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Platform::ALL
            .iter()
            .copied()
            .find(|platform| platform.as_str() == normalized)
            .ok_or_else(|| format!("Unknown platform '{value}'"))
    }
}
