// Destination Model
// A logical streaming target and its persisted lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Platform;

/// Marker substituted for stored stream keys in every response
pub const REDACTED_SECRET: &str = "********";

/// Persisted lifecycle status of a destination.
///
/// The status is stored rather than derived because the backing channel is
/// polled asynchronously and its reported state may lag behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationStatus {
    #[default]
    #[serde(alias = "idle", alias = "stopped")]
    Ready,
    Starting,
    #[serde(alias = "live", alias = "active")]
    Streaming,
    Stopping,
    #[serde(alias = "failed")]
    Error,
}

impl DestinationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationStatus::Ready => "ready",
            DestinationStatus::Starting => "starting",
            DestinationStatus::Streaming => "streaming",
            DestinationStatus::Stopping => "stopping",
            DestinationStatus::Error => "error",
        }
    }

    /// Start is accepted from `ready` and, as an operator retry, from `error`
    pub fn can_start(&self) -> bool {
        matches!(self, DestinationStatus::Ready | DestinationStatus::Error)
    }

    /// Stop is accepted from `streaming` and, as an operator retry, from `error`
    pub fn can_stop(&self) -> bool {
        matches!(self, DestinationStatus::Streaming | DestinationStatus::Error)
    }

    /// A start or stop is in flight
    pub fn is_transitioning(&self) -> bool {
        matches!(self, DestinationStatus::Starting | DestinationStatus::Stopping)
    }
}

impl fmt::Display for DestinationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// A registered streaming destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    /// Unique identifier (generated at creation)
    pub id: String,

    /// Display name
    pub name: String,

    /// Target platform
    #[serde(default)]
    pub platform: Platform,

    /// RTMP ingest URL (None for platforms without an RTMP endpoint)
    #[serde(default)]
    pub rtmp_url: Option<String>,

    /// Name of the secret holding the stream key
    #[serde(default)]
    pub stream_key_param: Option<String>,

    /// Encoding preset reference
    #[serde(default)]
    pub preset_id: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub status: DestinationStatus,

    /// Channel currently backing this destination
    #[serde(default)]
    pub channel_id: Option<String>,

    #[serde(default)]
    pub channel_arn: Option<String>,

    /// Dedicated input (set only for dynamically provisioned destinations)
    #[serde(default)]
    pub input_id: Option<String>,

    /// Dedicated ingest-flow output (set only for dynamically provisioned destinations)
    #[serde(default)]
    pub flow_output_arn: Option<String>,

    /// Message of the failure that moved the destination into `error`
    #[serde(default)]
    pub last_error: Option<String>,

    /// Last time the channel state was confirmed
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Create a new destination in the `ready` state with a fresh id
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            platform,
            rtmp_url: None,
            stream_key_param: None,
            preset_id: None,
            enabled: true,
            status: DestinationStatus::Ready,
            channel_id: None,
            channel_arn: None,
            input_id: None,
            flow_output_arn: None,
            last_error: None,
            last_sync: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this destination owns a dynamically provisioned input/output/channel triple
    pub fn is_dedicated(&self) -> bool {
        self.input_id.is_some()
    }
}

/// Typed partial update applied atomically to a single destination.
///
/// `None` leaves a field untouched. `last_error` uses a nested option so it
/// can be cleared explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationPatch {
    pub name: Option<String>,
    pub rtmp_url: Option<String>,
    pub stream_key_param: Option<String>,
    pub preset_id: Option<String>,
    pub enabled: Option<bool>,
    pub status: Option<DestinationStatus>,
    pub channel_id: Option<String>,
    pub channel_arn: Option<String>,
    pub input_id: Option<String>,
    pub flow_output_arn: Option<String>,
    pub last_error: Option<Option<String>>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl DestinationPatch {
    pub fn status(status: DestinationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Status change to `error` recording the failure message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(DestinationStatus::Error),
            last_error: Some(Some(message.into())),
            ..Self::default()
        }
    }

    /// Status change that also clears any previous failure and stamps the sync time
    pub fn synced(status: DestinationStatus) -> Self {
        Self {
            status: Some(status),
            last_error: Some(None),
            last_sync: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel_id: &str) -> Self {
        self.channel_id = Some(channel_id.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to a destination and bump `updated_at`
    pub fn apply(&self, destination: &mut Destination) {
        if let Some(name) = &self.name {
            destination.name = name.clone();
        }
        if let Some(rtmp_url) = &self.rtmp_url {
            destination.rtmp_url = Some(rtmp_url.clone());
        }
        if let Some(param) = &self.stream_key_param {
            destination.stream_key_param = Some(param.clone());
        }
        if let Some(preset_id) = &self.preset_id {
            destination.preset_id = Some(preset_id.clone());
        }
        if let Some(enabled) = self.enabled {
            destination.enabled = enabled;
        }
        if let Some(status) = self.status {
            destination.status = status;
        }
        if let Some(channel_id) = &self.channel_id {
            destination.channel_id = Some(channel_id.clone());
        }
        if let Some(channel_arn) = &self.channel_arn {
            destination.channel_arn = Some(channel_arn.clone());
        }
        if let Some(input_id) = &self.input_id {
            destination.input_id = Some(input_id.clone());
        }
        if let Some(output_arn) = &self.flow_output_arn {
            destination.flow_output_arn = Some(output_arn.clone());
        }
        if let Some(last_error) = &self.last_error {
            destination.last_error = last_error.clone();
        }
        if let Some(last_sync) = self.last_sync {
            destination.last_sync = Some(last_sync);
        }
        destination.updated_at = Utc::now();
    }
}

/// Destination as returned to API callers (stream key redacted)
#[derive(Debug, Clone, Serialize)]
pub struct DestinationView {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub rtmp_url: Option<String>,
    pub stream_key: Option<&'static str>,
    pub preset_id: Option<String>,
    pub enabled: bool,
    pub status: DestinationStatus,
    pub channel_id: Option<String>,
    pub channel_arn: Option<String>,
    pub dedicated: bool,
    pub last_error: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Destination> for DestinationView {
    fn from(destination: &Destination) -> Self {
        Self {
            id: destination.id.clone(),
            name: destination.name.clone(),
            platform: destination.platform,
            rtmp_url: destination.rtmp_url.clone(),
            stream_key: destination.stream_key_param.as_ref().map(|_| REDACTED_SECRET),
            preset_id: destination.preset_id.clone(),
            enabled: destination.enabled,
            status: destination.status,
            channel_id: destination.channel_id.clone(),
            channel_arn: destination.channel_arn.clone(),
            dedicated: destination.is_dedicated(),
            last_error: destination.last_error.clone(),
            last_sync: destination.last_sync,
            created_at: destination.created_at,
            updated_at: destination.updated_at,
        }
    }
}
