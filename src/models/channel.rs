// Channel Model
// Managed encoding channel state and provisioning descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Preset;

/// Lifecycle state reported by the channel service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Creating,
    Idle,
    Starting,
    Running,
    Stopping,
    /// Configuration change in progress; settles back to IDLE
    Updating,
    Deleting,
    Deleted,
    /// Inferred from failure states; the service never reports a plain error
    Error,
}

impl ChannelState {
    /// Map a service state string onto the states the orchestrator acts on
    pub fn from_service_str(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "CREATING" => ChannelState::Creating,
            "IDLE" => ChannelState::Idle,
            "STARTING" | "RECOVERING" => ChannelState::Starting,
            "RUNNING" => ChannelState::Running,
            "STOPPING" => ChannelState::Stopping,
            "UPDATING" => ChannelState::Updating,
            "DELETING" => ChannelState::Deleting,
            "DELETED" => ChannelState::Deleted,
            "CREATE_FAILED" | "UPDATE_FAILED" => ChannelState::Error,
            _ => ChannelState::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Creating => "CREATING",
            ChannelState::Idle => "IDLE",
            ChannelState::Starting => "STARTING",
            ChannelState::Running => "RUNNING",
            ChannelState::Stopping => "STOPPING",
            ChannelState::Updating => "UPDATING",
            ChannelState::Deleting => "DELETING",
            ChannelState::Deleted => "DELETED",
            ChannelState::Error => "ERROR",
        }
    }

    /// States from which the channel will not reach RUNNING or IDLE on its own
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ChannelState::Error | ChannelState::Deleting | ChannelState::Deleted
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `describe`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDescription {
    pub channel_id: String,
    pub arn: Option<String>,
    pub name: Option<String>,
    pub state: ChannelState,
    pub pipelines_running: u32,
    pub pipeline_count: u32,
    pub input_count: u32,
    pub output_count: u32,
}

/// Dedicated input created for one destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDescriptor {
    pub input_id: String,
    pub arn: Option<String>,
    /// Ingest endpoints the flow output should push to
    pub endpoints: Vec<String>,
}

/// Parameters for provisioning a dedicated channel
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub input_id: String,
    pub rtmp_url: String,
    pub stream_key: String,
    pub preset: Option<Preset>,
}

/// Identity of a provisioned channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelDescriptor {
    pub channel_id: String,
    pub arn: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_states_map_to_error() {
        assert_eq!(ChannelState::from_service_str("CREATE_FAILED"), ChannelState::Error);
        assert_eq!(ChannelState::from_service_str("UPDATE_FAILED"), ChannelState::Error);
        assert_eq!(ChannelState::from_service_str("RECOVERING"), ChannelState::Starting);
        assert_eq!(ChannelState::from_service_str("running"), ChannelState::Running);
        assert!(ChannelState::Error.is_failed());
        assert!(!ChannelState::Stopping.is_failed());
    }

    #[test]
    fn test_updating_is_not_a_failure() {
        let state = ChannelState::from_service_str("UPDATING");
        assert_eq!(state, ChannelState::Updating);
        assert!(!state.is_failed());
        assert_eq!(state.to_string(), "UPDATING");
    }
}
