// Flow Model
// Ingest flow topology: sources, outputs and failover

use serde::{Deserialize, Serialize};

/// Status reported by the ingest-flow service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Standby,
    Active,
    Updating,
    Starting,
    Stopping,
    Deleting,
    Error,
}

impl FlowStatus {
    pub fn from_service_str(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "STANDBY" => FlowStatus::Standby,
            "ACTIVE" => FlowStatus::Active,
            "UPDATING" => FlowStatus::Updating,
            "STARTING" => FlowStatus::Starting,
            "STOPPING" => FlowStatus::Stopping,
            "DELETING" => FlowStatus::Deleting,
            _ => FlowStatus::Error,
        }
    }
}

/// An ingest entry point on the flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSource {
    pub name: String,
    pub arn: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub ingest_port: Option<u16>,
    /// Address of the currently connected sender, empty when nobody is pushing
    #[serde(default)]
    pub peer_ip_address: Option<String>,
}

impl FlowSource {
    pub fn is_connected(&self) -> bool {
        self.peer_ip_address
            .as_deref()
            .map(|peer| !peer.trim().is_empty())
            .unwrap_or(false)
    }
}

/// A fan-out leg of the flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowOutput {
    pub name: String,
    pub arn: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverMode {
    #[default]
    Merge,
    Failover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailoverState {
    Enabled,
    #[default]
    Disabled,
}

/// Source failover settings for a two-source flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default)]
    pub state: FailoverState,
    #[serde(default)]
    pub failover_mode: FailoverMode,
    /// Name of the preferred source in FAILOVER mode
    #[serde(default)]
    pub primary_source: Option<String>,
    #[serde(default)]
    pub recovery_window_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowDescription {
    pub flow_arn: String,
    pub name: Option<String>,
    pub status: FlowStatus,
    pub sources: Vec<FlowSource>,
    pub outputs: Vec<FlowOutput>,
    pub failover: Option<FailoverConfig>,
}

/// Output to attach to a flow
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub protocol: String,
    /// Target endpoint, e.g. a channel input URL
    pub destination: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Source to attach to a flow
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub protocol: String,
    #[serde(default)]
    pub ingest_port: Option<u16>,
    /// CIDR allowed to push to the source
    #[serde(default)]
    pub whitelist_cidr: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Per-source connectivity derived from the peer address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub name: String,
    pub arn: String,
    pub connected: bool,
    pub peer_ip_address: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Aggregate ingest health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputHealth {
    pub status: HealthStatus,
    pub sources: Vec<SourceHealth>,
    pub connected_sources: usize,
    pub total_sources: usize,
}
