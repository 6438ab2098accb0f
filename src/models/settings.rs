// Settings Model
// Server-wide configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::Platform;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8010
}

fn default_rate_limit_per_minute() -> u32 {
    300
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".to_string(),
        "http://127.0.0.1:*".to_string(),
    ]
}

fn default_destinations_table() -> String {
    "relaycast-destinations".to_string()
}

fn default_presets_table() -> String {
    "relaycast-presets".to_string()
}

fn default_secret_prefix() -> String {
    "/relaycast/destinations".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_start_timeout_secs() -> u64 {
    120
}

fn default_stop_timeout_secs() -> u64 {
    120
}

fn default_simulator_latency_ms() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> u32 {
    2
}

/// Which family of clients backs the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// File-backed registry and secrets with an in-process control plane
    #[default]
    Local,
    /// DynamoDB, Parameter Store, MediaLive and MediaConnect
    Aws,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Aws => "aws",
        }
    }
}

/// How destinations are bound to channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One pre-provisioned channel per platform, shared by its destinations
    #[default]
    Shared,
    /// One provisioned input/output/channel triple per destination
    Dedicated,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Shared => "shared",
            Topology::Dedicated => "dedicated",
        }
    }
}

/// Backoff settings for transient control-plane failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    // HTTP
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    // Paths (empty = platform default)
    #[serde(default)]
    pub data_dir: String,
    #[serde(default)]
    pub log_dir: String,

    // Backends
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub channels: BTreeMap<Platform, String>,
    #[serde(default)]
    pub flow_arn: String,
    #[serde(default = "default_destinations_table")]
    pub destinations_table: String,
    #[serde(default = "default_presets_table")]
    pub presets_table: String,
    #[serde(default = "default_secret_prefix")]
    pub secret_prefix: String,

    // Orchestration timing
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,

    // Managed services
    #[serde(default)]
    pub aws_region: String,
    #[serde(default)]
    pub channel_role_arn: String,
    #[serde(default)]
    pub template_channel_id: String,

    // Local control plane
    #[serde(default = "default_simulator_latency_ms")]
    pub simulator_latency_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: String::new(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            cors_origins: default_cors_origins(),
            data_dir: String::new(),
            log_dir: String::new(),
            backend: BackendKind::default(),
            topology: Topology::default(),
            channels: BTreeMap::new(),
            flow_arn: String::new(),
            destinations_table: default_destinations_table(),
            presets_table: default_presets_table(),
            secret_prefix: default_secret_prefix(),
            poll_interval_secs: default_poll_interval_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            retry: RetryPolicy::default(),
            aws_region: String::new(),
            channel_role_arn: String::new(),
            template_channel_id: String::new(),
            simulator_latency_ms: default_simulator_latency_ms(),
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Check values that would make the orchestrator misbehave
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be non-zero".to_string());
        }
        if self.poll_interval_secs == 0 {
            return Err("pollIntervalSecs must be at least 1".to_string());
        }
        if self.start_timeout_secs < self.poll_interval_secs
            || self.stop_timeout_secs < self.poll_interval_secs
        {
            return Err("start/stop timeouts must not be shorter than the poll interval".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.maxAttempts must be at least 1".to_string());
        }
        if self.secret_prefix.trim().is_empty() {
            return Err("secretPrefix must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_fills_defaults() {
        let json = r#"{ "port": 9000, "channels": { "youtube": "1234567" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.channels.get(&Platform::Youtube).map(String::as_str), Some("1234567"));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.topology, Topology::Shared);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_timeout_below_interval() {
        let config = AppConfig {
            poll_interval_secs: 10,
            start_timeout_secs: 5,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
