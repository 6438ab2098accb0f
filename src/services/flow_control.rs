// Flow Control
// Client seam for the managed ingest-flow service and source health derivation

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{
    FailoverConfig, FlowDescription, FlowSource, HealthStatus, InputHealth, OutputSpec,
    RetryPolicy, SourceHealth, SourceSpec,
};
use crate::services::{execute_with_retry, ServiceError};

/// Operations against the ingest flow feeding every channel
#[async_trait]
pub trait FlowControl: Send + Sync {
    async fn describe_flow(&self, flow_arn: &str) -> Result<FlowDescription, ServiceError>;

    /// Attach an output; returns its ARN
    async fn add_output(&self, flow_arn: &str, output: &OutputSpec) -> Result<String, ServiceError>;

    async fn remove_output(&self, flow_arn: &str, output_arn: &str) -> Result<(), ServiceError>;

    async fn add_source(&self, flow_arn: &str, source: &SourceSpec) -> Result<FlowSource, ServiceError>;

    async fn update_failover(&self, flow_arn: &str, config: &FailoverConfig) -> Result<(), ServiceError>;

    async fn start(&self, flow_arn: &str) -> Result<(), ServiceError>;

    async fn stop(&self, flow_arn: &str) -> Result<(), ServiceError>;
}

/// Wraps a flow client so every call goes through the Retry Executor
pub struct RetryingFlowControl<F: ?Sized> {
    inner: Arc<F>,
    policy: RetryPolicy,
}

impl<F: ?Sized> RetryingFlowControl<F> {
    pub fn new(inner: Arc<F>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<F: FlowControl + ?Sized> FlowControl for RetryingFlowControl<F> {
    async fn describe_flow(&self, flow_arn: &str) -> Result<FlowDescription, ServiceError> {
        execute_with_retry("DescribeFlow", &self.policy, || self.inner.describe_flow(flow_arn)).await
    }

    async fn add_output(&self, flow_arn: &str, output: &OutputSpec) -> Result<String, ServiceError> {
        execute_with_retry("AddFlowOutputs", &self.policy, || self.inner.add_output(flow_arn, output))
            .await
    }

    async fn remove_output(&self, flow_arn: &str, output_arn: &str) -> Result<(), ServiceError> {
        execute_with_retry("RemoveFlowOutput", &self.policy, || {
            self.inner.remove_output(flow_arn, output_arn)
        })
        .await
    }

    async fn add_source(&self, flow_arn: &str, source: &SourceSpec) -> Result<FlowSource, ServiceError> {
        execute_with_retry("AddFlowSources", &self.policy, || self.inner.add_source(flow_arn, source))
            .await
    }

    async fn update_failover(&self, flow_arn: &str, config: &FailoverConfig) -> Result<(), ServiceError> {
        execute_with_retry("UpdateFlow", &self.policy, || self.inner.update_failover(flow_arn, config))
            .await
    }

    async fn start(&self, flow_arn: &str) -> Result<(), ServiceError> {
        execute_with_retry("StartFlow", &self.policy, || self.inner.start(flow_arn)).await
    }

    async fn stop(&self, flow_arn: &str) -> Result<(), ServiceError> {
        execute_with_retry("StopFlow", &self.policy, || self.inner.stop(flow_arn)).await
    }
}

/// Derive ingest health from a flow description.
///
/// A source counts as connected iff it reports a non-empty peer address; the
/// flow is healthy iff at least one source is connected.
pub fn input_health(flow: &FlowDescription) -> InputHealth {
    let primary = flow
        .failover
        .as_ref()
        .and_then(|failover| failover.primary_source.clone())
        .or_else(|| flow.sources.first().map(|source| source.name.clone()));

    let sources: Vec<SourceHealth> = flow
        .sources
        .iter()
        .map(|source| SourceHealth {
            name: source.name.clone(),
            arn: source.arn.clone(),
            connected: source.is_connected(),
            peer_ip_address: source.peer_ip_address.clone().filter(|peer| !peer.trim().is_empty()),
            is_primary: primary.as_deref() == Some(source.name.as_str()),
        })
        .collect();

    let connected_sources = sources.iter().filter(|source| source.connected).count();
    let status = if connected_sources > 0 {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    InputHealth {
        status,
        total_sources: sources.len(),
        connected_sources,
        sources,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailoverMode, FailoverState, FlowStatus};

    fn source(name: &str, peer: Option<&str>) -> FlowSource {
        FlowSource {
            name: name.to_string(),
            arn: format!("arn:aws:mediaconnect:us-east-1:000000000000:source:{name}"),
            protocol: Some("srt-listener".to_string()),
            ingest_port: Some(5000),
            peer_ip_address: peer.map(str::to_string),
        }
    }

    fn flow(sources: Vec<FlowSource>, failover: Option<FailoverConfig>) -> FlowDescription {
        FlowDescription {
            flow_arn: "arn:flow".to_string(),
            name: Some("ingest".to_string()),
            status: FlowStatus::Active,
            sources,
            outputs: Vec::new(),
            failover,
        }
    }

    #[test]
    fn test_one_connected_source_is_healthy() {
        let health = input_health(&flow(
            vec![source("primary", Some("203.0.113.10")), source("backup", Some(""))],
            None,
        ));

        assert_eq!(health.connected_sources, 1);
        assert_eq!(health.total_sources, 2);
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.sources[0].is_primary);
        assert!(health.sources[1].peer_ip_address.is_none());
    }

    #[test]
    fn test_no_connected_source_is_degraded() {
        let failover = FailoverConfig {
            state: FailoverState::Enabled,
            failover_mode: FailoverMode::Failover,
            primary_source: Some("backup".to_string()),
            recovery_window_ms: Some(200),
        };
        let health = input_health(&flow(vec![source("primary", None), source("backup", None)], Some(failover)));

        assert_eq!(health.connected_sources, 0);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!health.sources[0].is_primary);
        assert!(health.sources[1].is_primary);
    }
}
