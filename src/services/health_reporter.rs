// Health Reporter
// Read-only channel, flow and destination aggregation

use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::{
    ChannelDescription, ChannelState, Destination, DestinationStatus, FlowDescription, InputHealth,
    Platform,
};
use crate::services::{
    input_health, ChannelControl, FlowControl, OrchestratorError, OrchestratorResult,
    ResourceRegistry,
};

/// Best-effort status of every configured channel
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelStatusReport {
    pub statuses: BTreeMap<Platform, ChannelDescription>,
    pub errors: BTreeMap<Platform, String>,
}

/// Validation result for one platform mapping
#[derive(Debug, Clone, Serialize)]
pub struct ChannelValidation {
    pub channel_id: String,
    pub reachable: bool,
    pub state: Option<ChannelState>,
    pub input_count: u32,
    pub output_count: u32,
    /// Registered destinations bound to the channel (informational)
    pub destination_count: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<String>,
    pub channels: BTreeMap<Platform, ChannelValidation>,
}

/// Destination counts plus channel states
#[derive(Debug, Clone, Serialize)]
pub struct StreamingStatus {
    pub total_destinations: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub streaming: Vec<String>,
    pub channels: BTreeMap<Platform, ChannelState>,
    pub channel_errors: BTreeMap<Platform, String>,
}

pub struct HealthReporter {
    registry: Arc<dyn ResourceRegistry>,
    channels: Arc<dyn ChannelControl>,
    flows: Arc<dyn FlowControl>,
    channel_map: BTreeMap<Platform, String>,
    flow_arn: Option<String>,
}

impl HealthReporter {
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        channels: Arc<dyn ChannelControl>,
        flows: Arc<dyn FlowControl>,
        channel_map: BTreeMap<Platform, String>,
        flow_arn: Option<String>,
    ) -> Self {
        Self {
            registry,
            channels,
            flows,
            channel_map,
            flow_arn: flow_arn.filter(|arn| !arn.trim().is_empty()),
        }
    }

    /// Describe every configured channel in parallel.
    ///
    /// A channel that cannot be described lands in `errors`; the rest are
    /// still reported.
    pub async fn get_all_channel_statuses(&self) -> ChannelStatusReport {
        let lookups = self.channel_map.iter().map(|(platform, channel_id)| async move {
            if channel_id.trim().is_empty() {
                return (*platform, Err("No channel id configured".to_string()));
            }
            let result = self
                .channels
                .describe(channel_id)
                .await
                .map_err(|e| e.to_string());
            (*platform, result)
        });

        let mut report = ChannelStatusReport::default();
        for (platform, result) in join_all(lookups).await {
            match result {
                Ok(description) => {
                    report.statuses.insert(platform, description);
                }
                Err(message) => {
                    log::warn!("[HealthReporter] Channel for {} unavailable: {}", platform, message);
                    report.errors.insert(platform, message);
                }
            }
        }
        report
    }

    /// Check every platform mapping and enumerate all issues found
    pub async fn validate_configuration(&self) -> OrchestratorResult<ValidationReport> {
        let destinations = self.registry.scan().await?;
        let statuses = self.get_all_channel_statuses().await;

        let mut issues = Vec::new();
        let mut channels = BTreeMap::new();

        if self.channel_map.is_empty() {
            issues.push("No platform channels are configured".to_string());
        }

        for (platform, channel_id) in &self.channel_map {
            let mut channel_issues = Vec::new();
            let destination_count = destinations
                .iter()
                .filter(|d| uses_shared_channel(d, *platform, channel_id))
                .count();

            let description = statuses.statuses.get(platform);
            if channel_id.trim().is_empty() {
                channel_issues.push(format!("Platform '{platform}' has no channel id configured"));
            } else if let Some(error) = statuses.errors.get(platform) {
                channel_issues.push(format!(
                    "Channel '{channel_id}' for platform '{platform}' is unreachable: {error}"
                ));
            } else if let Some(description) = description {
                if description.input_count == 0 {
                    channel_issues.push(format!(
                        "Channel '{channel_id}' for platform '{platform}' has no input attached"
                    ));
                }
                if description.output_count == 0 {
                    channel_issues.push(format!(
                        "Channel '{channel_id}' for platform '{platform}' has no destinations"
                    ));
                }
            }

            issues.extend(channel_issues.iter().cloned());
            channels.insert(
                *platform,
                ChannelValidation {
                    channel_id: channel_id.clone(),
                    reachable: description.is_some(),
                    state: description.map(|d| d.state),
                    input_count: description.map(|d| d.input_count).unwrap_or(0),
                    output_count: description.map(|d| d.output_count).unwrap_or(0),
                    destination_count,
                    issues: channel_issues,
                },
            );
        }

        Ok(ValidationReport {
            valid: issues.is_empty(),
            issues,
            channels,
        })
    }

    fn require_flow(&self) -> OrchestratorResult<&str> {
        self.flow_arn
            .as_deref()
            .ok_or_else(|| OrchestratorError::NotFound("No ingest flow is configured".to_string()))
    }

    pub async fn get_flow_status(&self) -> OrchestratorResult<FlowDescription> {
        let flow_arn = self.require_flow()?;
        Ok(self.flows.describe_flow(flow_arn).await?)
    }

    pub async fn get_input_health(&self) -> OrchestratorResult<InputHealth> {
        let flow = self.get_flow_status().await?;
        Ok(input_health(&flow))
    }

    pub async fn streaming_status(&self) -> OrchestratorResult<StreamingStatus> {
        let destinations = self.registry.scan().await?;

        let mut by_status: BTreeMap<&'static str, usize> = [
            DestinationStatus::Ready,
            DestinationStatus::Starting,
            DestinationStatus::Streaming,
            DestinationStatus::Stopping,
            DestinationStatus::Error,
        ]
        .iter()
        .map(|status| (status.as_str(), 0))
        .collect();
        for destination in &destinations {
            *by_status.entry(destination.status.as_str()).or_insert(0) += 1;
        }

        let streaming = destinations
            .iter()
            .filter(|d| d.status == DestinationStatus::Streaming)
            .map(|d| d.id.clone())
            .collect();

        let report = self.get_all_channel_statuses().await;
        Ok(StreamingStatus {
            total_destinations: destinations.len(),
            by_status,
            streaming,
            channels: report
                .statuses
                .iter()
                .map(|(platform, description)| (*platform, description.state))
                .collect(),
            channel_errors: report.errors,
        })
    }
}

fn uses_shared_channel(destination: &Destination, platform: Platform, channel_id: &str) -> bool {
    if destination.is_dedicated() {
        return false;
    }
    match &destination.channel_id {
        Some(bound) => bound == channel_id,
        None => destination.platform == platform,
    }
}
