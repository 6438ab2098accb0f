// MediaConnect Control
// Ingest flow sources, outputs and failover against AWS Elemental MediaConnect

use async_trait::async_trait;
use aws_sdk_mediaconnect::types::{
    AddOutputRequest, FailoverMode as SdkFailoverMode, Protocol, SetSourceRequest, SourcePriority,
    State, UpdateFailoverConfig,
};
use aws_sdk_mediaconnect::Client;

use super::service_error;
use crate::models::{
    FailoverConfig, FailoverMode, FailoverState, FlowDescription, FlowOutput, FlowSource, FlowStatus,
    OutputSpec, SourceSpec,
};
use crate::services::{FlowControl, ServiceError};

pub struct MediaConnectFlowControl {
    client: Client,
}

impl MediaConnectFlowControl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn port(value: Option<i32>) -> Option<u16> {
    value.and_then(|port| u16::try_from(port).ok())
}

fn source(source: &aws_sdk_mediaconnect::types::Source) -> FlowSource {
    FlowSource {
        name: source.name().to_string(),
        arn: source.source_arn().to_string(),
        protocol: source.transport().map(|transport| transport.protocol().as_str().to_string()),
        ingest_port: port(source.ingest_port()),
        peer_ip_address: source.peer_ip_address().map(str::to_string),
    }
}

fn failover(config: &aws_sdk_mediaconnect::types::FailoverConfig) -> FailoverConfig {
    FailoverConfig {
        state: match config.state() {
            Some(State::Enabled) => FailoverState::Enabled,
            _ => FailoverState::Disabled,
        },
        failover_mode: match config.failover_mode() {
            Some(SdkFailoverMode::Failover) => FailoverMode::Failover,
            _ => FailoverMode::Merge,
        },
        primary_source: config
            .source_priority()
            .and_then(|priority| priority.primary_source())
            .map(str::to_string),
        recovery_window_ms: config.recovery_window().and_then(|ms| u32::try_from(ms).ok()),
    }
}

#[async_trait]
impl FlowControl for MediaConnectFlowControl {
    async fn describe_flow(&self, flow_arn: &str) -> Result<FlowDescription, ServiceError> {
        let output = self
            .client
            .describe_flow()
            .flow_arn(flow_arn)
            .send()
            .await
            .map_err(service_error)?;
        let flow = output
            .flow()
            .ok_or_else(|| ServiceError::new("NotFoundException", format!("Flow '{flow_arn}' not found")))?;

        let mut sources: Vec<FlowSource> = flow.sources().iter().map(source).collect();
        if sources.is_empty() {
            if let Some(single) = flow.source() {
                sources.push(source(single));
            }
        }

        Ok(FlowDescription {
            flow_arn: flow.flow_arn().to_string(),
            name: Some(flow.name().to_string()),
            status: FlowStatus::from_service_str(flow.status().as_str()),
            sources,
            outputs: flow
                .outputs()
                .iter()
                .map(|output| FlowOutput {
                    name: output.name().to_string(),
                    arn: output.output_arn().to_string(),
                    destination: output.destination().map(str::to_string),
                    port: port(output.port()),
                    protocol: output.transport().map(|transport| transport.protocol().as_str().to_string()),
                })
                .collect(),
            failover: flow.source_failover_config().map(failover),
        })
    }

    async fn add_output(&self, flow_arn: &str, spec: &OutputSpec) -> Result<String, ServiceError> {
        let request = AddOutputRequest::builder()
            .name(&spec.name)
            .protocol(Protocol::from(spec.protocol.as_str()))
            .destination(&spec.destination)
            .set_port(spec.port.map(i32::from))
            .set_description(spec.description.clone())
            .build()
            .map_err(|e| ServiceError::new("BadRequestException", e.to_string()))?;

        let output = self
            .client
            .add_flow_outputs()
            .flow_arn(flow_arn)
            .outputs(request)
            .send()
            .await
            .map_err(service_error)?;
        let arn = output
            .outputs()
            .first()
            .map(|added| added.output_arn().to_string())
            .ok_or_else(|| ServiceError::new("InternalFailure", "AddFlowOutputs returned no output"))?;
        log::info!("[MediaConnect] Added output {} to {}", spec.name, flow_arn);
        Ok(arn)
    }

    async fn remove_output(&self, flow_arn: &str, output_arn: &str) -> Result<(), ServiceError> {
        self.client
            .remove_flow_output()
            .flow_arn(flow_arn)
            .output_arn(output_arn)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaConnect] Removed output {}", output_arn);
        Ok(())
    }

    async fn add_source(&self, flow_arn: &str, spec: &SourceSpec) -> Result<FlowSource, ServiceError> {
        let request = SetSourceRequest::builder()
            .name(&spec.name)
            .protocol(Protocol::from(spec.protocol.as_str()))
            .set_ingest_port(spec.ingest_port.map(i32::from))
            .set_whitelist_cidr(spec.whitelist_cidr.clone())
            .set_description(spec.description.clone())
            .build();

        let output = self
            .client
            .add_flow_sources()
            .flow_arn(flow_arn)
            .sources(request)
            .send()
            .await
            .map_err(service_error)?;
        let added = output
            .sources()
            .iter()
            .find(|added| added.name() == spec.name)
            .ok_or_else(|| ServiceError::new("InternalFailure", "AddFlowSources returned no source"))?;
        log::info!("[MediaConnect] Added source {} to {}", spec.name, flow_arn);
        Ok(source(added))
    }

    async fn update_failover(&self, flow_arn: &str, config: &FailoverConfig) -> Result<(), ServiceError> {
        let state = match config.state {
            FailoverState::Enabled => State::Enabled,
            FailoverState::Disabled => State::Disabled,
        };
        let mode = match config.failover_mode {
            FailoverMode::Failover => SdkFailoverMode::Failover,
            FailoverMode::Merge => SdkFailoverMode::Merge,
        };
        let priority = config
            .primary_source
            .as_ref()
            .map(|primary| SourcePriority::builder().primary_source(primary).build());

        self.client
            .update_flow()
            .flow_arn(flow_arn)
            .source_failover_config(
                UpdateFailoverConfig::builder()
                    .state(state)
                    .failover_mode(mode)
                    .set_recovery_window(config.recovery_window_ms.and_then(|ms| i32::try_from(ms).ok()))
                    .set_source_priority(priority)
                    .build(),
            )
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaConnect] Updated failover on {}", flow_arn);
        Ok(())
    }

    async fn start(&self, flow_arn: &str) -> Result<(), ServiceError> {
        self.client
            .start_flow()
            .flow_arn(flow_arn)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaConnect] Start requested for {}", flow_arn);
        Ok(())
    }

    async fn stop(&self, flow_arn: &str) -> Result<(), ServiceError> {
        self.client
            .stop_flow()
            .flow_arn(flow_arn)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaConnect] Stop requested for {}", flow_arn);
        Ok(())
    }
}
