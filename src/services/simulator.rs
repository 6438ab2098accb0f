// Simulated Control Plane
// In-process stand-in for the channel and ingest-flow services

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{
    ChannelDescription, ChannelDescriptor, ChannelSpec, ChannelState, FailoverConfig,
    FlowDescription, FlowOutput, FlowSource, FlowStatus, InputDescriptor, OutputSpec, SourceSpec,
};
use crate::services::{ChannelControl, ChannelProvisioner, FlowControl, ServiceError};

const ARN_PREFIX: &str = "arn:relaycast:local";

struct SimChannel {
    name: String,
    state: ChannelState,
    // State the channel settles into once the deadline passes
    pending: Option<(ChannelState, Instant)>,
    input_ids: Vec<String>,
    output_count: u32,
}

impl SimChannel {
    fn settle(&mut self, now: Instant) {
        if let Some((target, at)) = self.pending {
            if now >= at {
                self.state = target;
                self.pending = None;
            }
        }
    }
}

struct SimInput {
    arn: String,
    endpoints: Vec<String>,
}

struct PlaneState {
    channels: HashMap<String, SimChannel>,
    inputs: HashMap<String, SimInput>,
    flows: HashMap<String, FlowDescription>,
    failures: HashMap<String, (ServiceError, u32)>,
    calls: HashMap<String, u32>,
    next_id: u64,
}

/// Channel, input and flow simulator with a fixed transition latency.
///
/// Starting and stopping put the channel in STARTING/STOPPING until the
/// latency has elapsed on the tokio clock, so tests with a paused clock can
/// observe every intermediate state.
pub struct SimulatedControlPlane {
    latency: Duration,
    state: Mutex<PlaneState>,
}

impl SimulatedControlPlane {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            state: Mutex::new(PlaneState {
                channels: HashMap::new(),
                inputs: HashMap::new(),
                flows: HashMap::new(),
                failures: HashMap::new(),
                calls: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaneState> {
        // A panic while holding the lock leaves plain data behind; keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed a pre-provisioned channel with one attached input
    pub fn with_channel(self, channel_id: &str, state: ChannelState) -> Self {
        self.add_channel(channel_id, state);
        self
    }

    pub fn add_channel(&self, channel_id: &str, state: ChannelState) {
        let mut plane = self.lock();
        let input_id = format!("input-{channel_id}");
        plane.inputs.insert(
            input_id.clone(),
            SimInput {
                arn: format!("{ARN_PREFIX}:input:{input_id}"),
                endpoints: vec![format!("rtp://10.0.0.1:5000/{input_id}")],
            },
        );
        plane.channels.insert(
            channel_id.to_string(),
            SimChannel {
                name: format!("channel-{channel_id}"),
                state,
                pending: None,
                input_ids: vec![input_id],
                output_count: 1,
            },
        );
    }

    /// Seed an ingest flow with a connected primary and an idle backup source
    pub fn with_flow(self, flow_arn: &str) -> Self {
        self.add_flow(flow_arn);
        self
    }

    pub fn add_flow(&self, flow_arn: &str) {
        let sources = vec![
            FlowSource {
                name: "primary".to_string(),
                arn: format!("{flow_arn}:source:primary"),
                protocol: Some("srt-listener".to_string()),
                ingest_port: Some(5000),
                peer_ip_address: Some("203.0.113.10".to_string()),
            },
            FlowSource {
                name: "backup".to_string(),
                arn: format!("{flow_arn}:source:backup"),
                protocol: Some("srt-listener".to_string()),
                ingest_port: Some(5001),
                peer_ip_address: None,
            },
        ];
        self.lock().flows.insert(
            flow_arn.to_string(),
            FlowDescription {
                flow_arn: flow_arn.to_string(),
                name: Some("ingest".to_string()),
                status: FlowStatus::Active,
                sources,
                outputs: Vec::new(),
                failover: Some(FailoverConfig::default()),
            },
        );
    }

    /// Force a channel into a state, cancelling any pending transition
    pub fn set_channel_state(&self, channel_id: &str, state: ChannelState) {
        if let Some(channel) = self.lock().channels.get_mut(channel_id) {
            channel.state = state;
            channel.pending = None;
        }
    }

    /// Detach every input from a channel
    pub fn detach_inputs(&self, channel_id: &str) {
        if let Some(channel) = self.lock().channels.get_mut(channel_id) {
            channel.input_ids.clear();
        }
    }

    /// Overwrite the number of output destinations a channel reports
    pub fn set_output_count(&self, channel_id: &str, count: u32) {
        if let Some(channel) = self.lock().channels.get_mut(channel_id) {
            channel.output_count = count;
        }
    }

    /// Overwrite the peer address reported by a flow source
    pub fn set_source_peer(&self, flow_arn: &str, source_name: &str, peer: Option<&str>) {
        if let Some(flow) = self.lock().flows.get_mut(flow_arn) {
            for source in flow.sources.iter_mut().filter(|s| s.name == source_name) {
                source.peer_ip_address = peer.map(str::to_string);
            }
        }
    }

    /// Make the next `times` calls of `operation` fail with `error`
    pub fn inject_failure(&self, operation: &str, error: ServiceError, times: u32) {
        self.lock().failures.insert(operation.to_string(), (error, times));
    }

    /// Number of calls of `operation` that reached the simulator
    pub fn call_count(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn channel_exists(&self, channel_id: &str) -> bool {
        self.lock().channels.contains_key(channel_id)
    }

    pub fn input_exists(&self, input_id: &str) -> bool {
        self.lock().inputs.contains_key(input_id)
    }

    pub fn flow_output_count(&self, flow_arn: &str) -> usize {
        self.lock().flows.get(flow_arn).map(|flow| flow.outputs.len()).unwrap_or(0)
    }

    /// Record the call and return the injected failure, if any is armed
    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, PlaneState>, ServiceError> {
        let mut plane = self.lock();
        *plane.calls.entry(operation.to_string()).or_insert(0) += 1;

        if let Some((error, remaining)) = plane.failures.get_mut(operation) {
            let error = error.clone();
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                plane.failures.remove(operation);
            }
            return Err(error);
        }

        let now = Instant::now();
        for channel in plane.channels.values_mut() {
            channel.settle(now);
        }
        Ok(plane)
    }

    fn allocate_id(plane: &mut PlaneState) -> u64 {
        let id = plane.next_id;
        plane.next_id += 1;
        id
    }
}

fn channel_not_found(channel_id: &str) -> ServiceError {
    ServiceError::new("NotFoundException", format!("Channel '{channel_id}' does not exist"))
}

fn flow_not_found(flow_arn: &str) -> ServiceError {
    ServiceError::new("NotFoundException", format!("Flow '{flow_arn}' does not exist"))
}

#[async_trait]
impl ChannelControl for SimulatedControlPlane {
    async fn describe(&self, channel_id: &str) -> Result<ChannelDescription, ServiceError> {
        let plane = self.enter("describe")?;
        let channel = plane.channels.get(channel_id).ok_or_else(|| channel_not_found(channel_id))?;
        let pipelines_running = if channel.state == ChannelState::Running { 2 } else { 0 };

        Ok(ChannelDescription {
            channel_id: channel_id.to_string(),
            arn: Some(format!("{ARN_PREFIX}:channel:{channel_id}")),
            name: Some(channel.name.clone()),
            state: channel.state,
            pipelines_running,
            pipeline_count: 2,
            input_count: channel.input_ids.len() as u32,
            output_count: channel.output_count,
        })
    }

    async fn start(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        let mut plane = self.enter("start")?;
        let latency = self.latency;
        let channel = plane.channels.get_mut(channel_id).ok_or_else(|| channel_not_found(channel_id))?;

        if channel.state != ChannelState::Idle {
            return Err(ServiceError::new(
                "ConflictException",
                format!("Channel '{channel_id}' is {} and cannot be started", channel.state),
            ));
        }
        channel.state = ChannelState::Starting;
        channel.pending = Some((ChannelState::Running, Instant::now() + latency));
        Ok(channel.state)
    }

    async fn stop(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        let mut plane = self.enter("stop")?;
        let latency = self.latency;
        let channel = plane.channels.get_mut(channel_id).ok_or_else(|| channel_not_found(channel_id))?;

        if channel.state != ChannelState::Running {
            return Err(ServiceError::new(
                "ConflictException",
                format!("Channel '{channel_id}' is {} and cannot be stopped", channel.state),
            ));
        }
        channel.state = ChannelState::Stopping;
        channel.pending = Some((ChannelState::Idle, Instant::now() + latency));
        Ok(channel.state)
    }
}

#[async_trait]
impl ChannelProvisioner for SimulatedControlPlane {
    async fn create_input(&self, name: &str) -> Result<InputDescriptor, ServiceError> {
        let mut plane = self.enter("create_input")?;
        let id = Self::allocate_id(&mut plane);
        let input_id = format!("input-{id}");
        let input = SimInput {
            arn: format!("{ARN_PREFIX}:input:{input_id}"),
            endpoints: vec![format!("rtp://10.0.1.{}:5000/{name}", id % 250)],
        };
        let descriptor = InputDescriptor {
            input_id: input_id.clone(),
            arn: Some(input.arn.clone()),
            endpoints: input.endpoints.clone(),
        };
        plane.inputs.insert(input_id, input);
        Ok(descriptor)
    }

    async fn delete_input(&self, input_id: &str) -> Result<(), ServiceError> {
        let mut plane = self.enter("delete_input")?;
        if plane.channels.values().any(|channel| channel.input_ids.iter().any(|id| id == input_id)) {
            return Err(ServiceError::new(
                "ConflictException",
                format!("Input '{input_id}' is attached to a channel"),
            ));
        }
        plane
            .inputs
            .remove(input_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::new("NotFoundException", format!("Input '{input_id}' does not exist")))
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ChannelDescriptor, ServiceError> {
        let mut plane = self.enter("create_channel")?;
        if !plane.inputs.contains_key(&spec.input_id) {
            return Err(ServiceError::new(
                "BadRequestException",
                format!("Input '{}' does not exist", spec.input_id),
            ));
        }
        let channel_id = (1000 + Self::allocate_id(&mut plane)).to_string();
        plane.channels.insert(
            channel_id.clone(),
            SimChannel {
                name: spec.name.clone(),
                state: ChannelState::Idle,
                pending: None,
                input_ids: vec![spec.input_id.clone()],
                output_count: 1,
            },
        );
        Ok(ChannelDescriptor {
            arn: Some(format!("{ARN_PREFIX}:channel:{channel_id}")),
            channel_id,
        })
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), ServiceError> {
        let mut plane = self.enter("delete_channel")?;
        let channel = plane.channels.get(channel_id).ok_or_else(|| channel_not_found(channel_id))?;
        if !matches!(channel.state, ChannelState::Idle | ChannelState::Error) {
            return Err(ServiceError::new(
                "ConflictException",
                format!("Channel '{channel_id}' is {} and cannot be deleted", channel.state),
            ));
        }
        plane.channels.remove(channel_id);
        Ok(())
    }
}

#[async_trait]
impl FlowControl for SimulatedControlPlane {
    async fn describe_flow(&self, flow_arn: &str) -> Result<FlowDescription, ServiceError> {
        let plane = self.enter("describe_flow")?;
        plane.flows.get(flow_arn).cloned().ok_or_else(|| flow_not_found(flow_arn))
    }

    async fn add_output(&self, flow_arn: &str, output: &OutputSpec) -> Result<String, ServiceError> {
        let mut plane = self.enter("add_output")?;
        let id = Self::allocate_id(&mut plane);
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        let arn = format!("{flow_arn}:output:{}-{id}", output.name);
        flow.outputs.push(FlowOutput {
            name: output.name.clone(),
            arn: arn.clone(),
            destination: Some(output.destination.clone()),
            port: output.port,
            protocol: Some(output.protocol.clone()),
        });
        Ok(arn)
    }

    async fn remove_output(&self, flow_arn: &str, output_arn: &str) -> Result<(), ServiceError> {
        let mut plane = self.enter("remove_output")?;
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        let before = flow.outputs.len();
        flow.outputs.retain(|output| output.arn != output_arn);
        if flow.outputs.len() == before {
            return Err(ServiceError::new(
                "NotFoundException",
                format!("Output '{output_arn}' does not exist"),
            ));
        }
        Ok(())
    }

    async fn add_source(&self, flow_arn: &str, source: &SourceSpec) -> Result<FlowSource, ServiceError> {
        let mut plane = self.enter("add_source")?;
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        if flow.sources.len() >= 2 {
            return Err(ServiceError::new("BadRequestException", "A flow supports at most two sources"));
        }
        if flow.sources.iter().any(|existing| existing.name == source.name) {
            return Err(ServiceError::new(
                "BadRequestException",
                format!("Source '{}' already exists", source.name),
            ));
        }
        let added = FlowSource {
            name: source.name.clone(),
            arn: format!("{flow_arn}:source:{}", source.name),
            protocol: Some(source.protocol.clone()),
            ingest_port: source.ingest_port,
            peer_ip_address: None,
        };
        flow.sources.push(added.clone());
        Ok(added)
    }

    async fn update_failover(&self, flow_arn: &str, config: &FailoverConfig) -> Result<(), ServiceError> {
        let mut plane = self.enter("update_failover")?;
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        if let Some(primary) = &config.primary_source {
            if !flow.sources.iter().any(|source| &source.name == primary) {
                return Err(ServiceError::new(
                    "BadRequestException",
                    format!("Primary source '{primary}' is not attached to the flow"),
                ));
            }
        }
        flow.failover = Some(config.clone());
        Ok(())
    }

    async fn start(&self, flow_arn: &str) -> Result<(), ServiceError> {
        let mut plane = self.enter("start_flow")?;
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        flow.status = FlowStatus::Active;
        Ok(())
    }

    async fn stop(&self, flow_arn: &str) -> Result<(), ServiceError> {
        let mut plane = self.enter("stop_flow")?;
        let flow = plane.flows.get_mut(flow_arn).ok_or_else(|| flow_not_found(flow_arn))?;
        flow.status = FlowStatus::Standby;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_channel_settles_after_latency() {
        let plane = SimulatedControlPlane::new(Duration::from_secs(10)).with_channel("1001", ChannelState::Idle);

        assert_eq!(ChannelControl::start(&plane, "1001").await, Ok(ChannelState::Starting));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(plane.describe("1001").await.unwrap().state, ChannelState::Starting);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(plane.describe("1001").await.unwrap().state, ChannelState::Running);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let plane = SimulatedControlPlane::new(Duration::ZERO).with_channel("1001", ChannelState::Idle);
        plane.inject_failure("describe", ServiceError::new("ThrottlingException", "slow"), 1);

        assert!(plane.describe("1001").await.is_err());
        assert!(plane.describe("1001").await.is_ok());
        assert_eq!(plane.call_count("describe"), 2);
    }

    #[tokio::test]
    async fn test_input_attached_to_channel_cannot_be_deleted() {
        let plane = SimulatedControlPlane::new(Duration::ZERO);
        let input = plane.create_input("dest").await.unwrap();
        let channel = plane
            .create_channel(&ChannelSpec {
                name: "dest".to_string(),
                input_id: input.input_id.clone(),
                rtmp_url: "rtmp://example.com/app".to_string(),
                stream_key: "key".to_string(),
                preset: None,
            })
            .await
            .unwrap();

        assert_eq!(plane.delete_input(&input.input_id).await.unwrap_err().code, "ConflictException");
        plane.delete_channel(&channel.channel_id).await.unwrap();
        plane.delete_input(&input.input_id).await.unwrap();
    }
}
