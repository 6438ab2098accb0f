// Provisioning Manager
// Dedicated input + flow output + channel per destination, with compensating cleanup

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    AppConfig, ChannelSpec, ChannelState, Destination, OutputSpec, Platform,
};
use crate::services::{
    await_channel_state, stream_key_secret_name, ChannelControl, ChannelProvisioner, FlowControl,
    OrchestratorError, OrchestratorResult, PresetCatalog, ResourceRegistry, SecretStore,
};

/// Validated input for a dedicated destination
#[derive(Debug, Clone)]
pub struct CreateDestinationSpec {
    pub name: String,
    pub platform: Platform,
    pub rtmp_url: String,
    pub stream_key: Option<String>,
    pub preset_id: Option<String>,
    pub enabled: bool,
}

/// Identifiers of everything provisioned for one destination
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProvisionedResources {
    pub input_id: Option<String>,
    pub flow_output_arn: Option<String>,
    pub channel_id: Option<String>,
    pub channel_arn: Option<String>,
    #[serde(skip)]
    pub secret_name: Option<String>,
}

/// Creates and tears down the dedicated resource triple of a destination
pub struct ProvisioningManager {
    registry: Arc<dyn ResourceRegistry>,
    secrets: Arc<dyn SecretStore>,
    provisioner: Arc<dyn ChannelProvisioner>,
    channels: Arc<dyn ChannelControl>,
    flows: Arc<dyn FlowControl>,
    presets: Arc<PresetCatalog>,
    flow_arn: Option<String>,
    secret_prefix: String,
    poll_interval: Duration,
    stop_timeout: Duration,
}

impl ProvisioningManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        secrets: Arc<dyn SecretStore>,
        provisioner: Arc<dyn ChannelProvisioner>,
        channels: Arc<dyn ChannelControl>,
        flows: Arc<dyn FlowControl>,
        presets: Arc<PresetCatalog>,
        config: &AppConfig,
    ) -> Self {
        Self {
            registry,
            secrets,
            provisioner,
            channels,
            flows,
            presets,
            flow_arn: Some(config.flow_arn.clone()).filter(|arn| !arn.is_empty()),
            secret_prefix: config.secret_prefix.clone(),
            poll_interval: config.poll_interval(),
            stop_timeout: config.stop_timeout(),
        }
    }

    fn require_flow_arn(&self) -> OrchestratorResult<&str> {
        self.flow_arn.as_deref().ok_or_else(|| {
            OrchestratorError::ValidationFailure(
                "Dedicated destinations require a configured ingest flow ARN".to_string(),
            )
        })
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Provision input, flow output and channel, then persist the record.
    ///
    /// On failure everything created so far is torn down in reverse order and
    /// the original error is returned; no registry record is left behind.
    pub async fn create_destination(
        &self,
        spec: CreateDestinationSpec,
    ) -> OrchestratorResult<(Destination, ProvisionedResources)> {
        let flow_arn = self.require_flow_arn()?.to_string();

        let mut destination = Destination::new(spec.name.clone(), spec.platform);
        destination.rtmp_url = Some(spec.rtmp_url.clone());
        destination.preset_id = spec.preset_id.clone();
        destination.enabled = spec.enabled;

        log::info!(
            "[Provisioning:{}] Creating dedicated resources for '{}' ({})",
            destination.id,
            destination.name,
            destination.platform
        );

        let mut created = ProvisionedResources::default();
        match self.provision(&flow_arn, &spec, &mut destination, &mut created).await {
            Ok(()) => {
                log::info!(
                    "[Provisioning:{}] Ready on channel {}",
                    destination.id,
                    created.channel_id.as_deref().unwrap_or("-")
                );
                Ok((destination, created))
            }
            Err(e) => {
                log::error!("[Provisioning:{}] Provisioning failed: {}", destination.id, e);
                self.compensate(&flow_arn, &destination.id, &created).await;
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        flow_arn: &str,
        spec: &CreateDestinationSpec,
        destination: &mut Destination,
        created: &mut ProvisionedResources,
    ) -> OrchestratorResult<()> {
        let resource_name = format!("relaycast-{}", destination.id);

        // 1. Input
        let input = self.provisioner.create_input(&resource_name).await?;
        created.input_id = Some(input.input_id.clone());
        log::info!("[Provisioning:{}] Created input {}", destination.id, input.input_id);

        // 2. Flow output pushing into the input
        let endpoint = input.endpoints.first().ok_or_else(|| {
            OrchestratorError::UpstreamFailure(format!("Input '{}' reported no endpoints", input.input_id))
        })?;
        let (host, port) = split_endpoint(endpoint);
        let output = OutputSpec {
            name: resource_name.clone(),
            protocol: "rtp".to_string(),
            destination: host,
            port,
            description: Some(format!("Relaycast destination {}", destination.name)),
        };
        let output_arn = self.flows.add_output(flow_arn, &output).await?;
        created.flow_output_arn = Some(output_arn.clone());
        log::info!("[Provisioning:{}] Attached flow output", destination.id);

        // 3. Channel encoding to the caller's endpoint
        let preset = spec
            .preset_id
            .as_deref()
            .and_then(|preset_id| self.presets.get(preset_id))
            .cloned();
        let channel = self
            .provisioner
            .create_channel(&ChannelSpec {
                name: resource_name,
                input_id: input.input_id.clone(),
                rtmp_url: spec.rtmp_url.clone(),
                stream_key: spec.stream_key.clone().unwrap_or_default(),
                preset,
            })
            .await?;
        created.channel_id = Some(channel.channel_id.clone());
        created.channel_arn = channel.arn.clone();
        log::info!("[Provisioning:{}] Created channel {}", destination.id, channel.channel_id);

        // 4. Secret and registry record
        if let Some(stream_key) = spec.stream_key.as_deref().filter(|key| !key.is_empty()) {
            let secret_name = stream_key_secret_name(&self.secret_prefix, &destination.id);
            self.secrets.put(&secret_name, stream_key).await?;
            created.secret_name = Some(secret_name.clone());
            destination.stream_key_param = Some(secret_name);
        }

        destination.input_id = Some(input.input_id);
        destination.flow_output_arn = Some(output_arn);
        destination.channel_id = Some(channel.channel_id);
        destination.channel_arn = channel.arn;
        self.registry.put(destination).await
    }

    async fn compensate(&self, flow_arn: &str, destination_id: &str, created: &ProvisionedResources) {
        if let Some(channel_id) = &created.channel_id {
            match self.provisioner.delete_channel(channel_id).await {
                Ok(()) => log::info!("[Provisioning:{}] Rolled back channel {}", destination_id, channel_id),
                Err(e) => log::error!(
                    "[Provisioning:{}] Failed to roll back channel {} (manual cleanup needed): {}",
                    destination_id,
                    channel_id,
                    e
                ),
            }
        }
        if let Some(output_arn) = &created.flow_output_arn {
            match self.flows.remove_output(flow_arn, output_arn).await {
                Ok(()) => log::info!("[Provisioning:{}] Rolled back flow output", destination_id),
                Err(e) => log::error!(
                    "[Provisioning:{}] Failed to roll back flow output {} (manual cleanup needed): {}",
                    destination_id,
                    output_arn,
                    e
                ),
            }
        }
        if let Some(input_id) = &created.input_id {
            match self.provisioner.delete_input(input_id).await {
                Ok(()) => log::info!("[Provisioning:{}] Rolled back input {}", destination_id, input_id),
                Err(e) => log::error!(
                    "[Provisioning:{}] Failed to roll back input {} (manual cleanup needed): {}",
                    destination_id,
                    input_id,
                    e
                ),
            }
        }
        if let Some(secret_name) = &created.secret_name {
            self.secrets.delete_best_effort(secret_name).await;
        }
    }

    // ========================================================================
    // Remove
    // ========================================================================

    /// Release every dedicated resource and the registry record.
    ///
    /// Each step is attempted even when an earlier one failed; any failure
    /// is reported as `PartialFailure` once all steps have run.
    pub async fn remove_destination(&self, destination_id: &str) -> OrchestratorResult<()> {
        let destination = self.registry.get(destination_id).await?;
        let mut failures: Vec<String> = Vec::new();

        log::info!("[Provisioning:{}] Removing dedicated resources", destination.id);

        if let Some(channel_id) = &destination.channel_id {
            if let Err(e) = self.stop_if_running(channel_id).await {
                failures.push(format!("stop channel {channel_id}: {e}"));
            }
            if let Err(e) = self.provisioner.delete_channel(channel_id).await {
                failures.push(format!("delete channel {channel_id}: {e}"));
            }
        }

        if let Some(output_arn) = &destination.flow_output_arn {
            match self.require_flow_arn() {
                Ok(flow_arn) => {
                    if let Err(e) = self.flows.remove_output(flow_arn, output_arn).await {
                        failures.push(format!("remove flow output {output_arn}: {e}"));
                    }
                }
                Err(e) => failures.push(format!("remove flow output {output_arn}: {e}")),
            }
        }

        if let Some(input_id) = &destination.input_id {
            if let Err(e) = self.provisioner.delete_input(input_id).await {
                failures.push(format!("delete input {input_id}: {e}"));
            }
        }

        if let Err(e) = self.registry.delete(&destination.id).await {
            failures.push(format!("delete registry record: {e}"));
        }

        if let Some(secret_name) = &destination.stream_key_param {
            self.secrets.delete_best_effort(secret_name).await;
        }

        if failures.is_empty() {
            log::info!("[Provisioning:{}] Removed", destination.id);
            return Ok(());
        }

        for failure in &failures {
            log::error!("[Provisioning:{}] Cleanup step failed: {}", destination.id, failure);
        }
        Err(OrchestratorError::PartialFailure {
            message: format!("Destination '{}' was only partly removed", destination.id),
            failures,
        })
    }

    async fn stop_if_running(&self, channel_id: &str) -> OrchestratorResult<()> {
        let description = match self.channels.describe(channel_id).await {
            Ok(description) => description,
            // Already gone; nothing to stop
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match description.state {
            ChannelState::Running => {
                self.channels.stop(channel_id).await?;
            }
            ChannelState::Starting => {
                await_channel_state(
                    self.channels.as_ref(),
                    channel_id,
                    ChannelState::Running,
                    self.poll_interval,
                    self.stop_timeout,
                )
                .await?;
                self.channels.stop(channel_id).await?;
            }
            ChannelState::Stopping => {}
            _ => return Ok(()),
        }

        await_channel_state(
            self.channels.as_ref(),
            channel_id,
            ChannelState::Idle,
            self.poll_interval,
            self.stop_timeout,
        )
        .await?;
        Ok(())
    }
}

/// Split an input endpoint such as `rtp://10.0.0.1:5000/name` into host and port
fn split_endpoint(endpoint: &str) -> (String, Option<u16>) {
    let without_scheme = endpoint.split_once("://").map(|(_, rest)| rest).unwrap_or(endpoint);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (authority.to_string(), None),
        },
        None => (authority.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetryPolicy;
    use crate::services::{
        ErrorKind, InMemoryRegistry, InMemorySecretStore, RetryingChannelControl, ServiceError,
        SimulatedControlPlane,
    };

    const FLOW_ARN: &str = "arn:relaycast:local:flow:ingest";

    struct Harness {
        manager: ProvisioningManager,
        registry: Arc<InMemoryRegistry>,
        secrets: Arc<InMemorySecretStore>,
        plane: Arc<SimulatedControlPlane>,
    }

    fn harness() -> Harness {
        let plane = Arc::new(SimulatedControlPlane::new(Duration::from_secs(5)).with_flow(FLOW_ARN));
        let registry = Arc::new(InMemoryRegistry::new());
        let secrets = Arc::new(InMemorySecretStore::new());
        let config = AppConfig {
            flow_arn: FLOW_ARN.to_string(),
            ..AppConfig::default()
        };
        let channels = Arc::new(RetryingChannelControl::new(plane.clone(), RetryPolicy::default()));
        let manager = ProvisioningManager::new(
            registry.clone(),
            secrets.clone(),
            channels.clone(),
            channels,
            plane.clone(),
            Arc::new(PresetCatalog::load().unwrap()),
            &config,
        );
        Harness { manager, registry, secrets, plane }
    }

    fn spec() -> CreateDestinationSpec {
        CreateDestinationSpec {
            name: "Main".to_string(),
            platform: Platform::Youtube,
            rtmp_url: "rtmp://a.rtmp.youtube.com/live2".to_string(),
            stream_key: Some("abcd-efgh".to_string()),
            preset_id: Some("youtube-1080p30".to_string()),
            enabled: true,
        }
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("rtp://10.0.0.1:5000/in"), ("10.0.0.1".to_string(), Some(5000)));
        assert_eq!(split_endpoint("10.0.0.2"), ("10.0.0.2".to_string(), None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_links_all_resources() {
        let h = harness();
        let (destination, resources) = h.manager.create_destination(spec()).await.unwrap();

        assert!(destination.is_dedicated());
        assert_eq!(destination.channel_id, resources.channel_id);
        assert!(h.plane.channel_exists(resources.channel_id.as_deref().unwrap()));
        assert_eq!(h.plane.flow_output_count(FLOW_ARN), 1);

        let stored = h.registry.get(&destination.id).await.unwrap();
        let secret_name = stored.stream_key_param.unwrap();
        assert_eq!(h.secrets.get(&secret_name).await.unwrap(), "abcd-efgh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failure_rolls_back_output_and_input() {
        let h = harness();
        h.plane.inject_failure(
            "create_channel",
            ServiceError::new("BadRequestException", "Invalid encoder settings"),
            1,
        );

        let err = h.manager.create_destination(spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);

        assert_eq!(h.plane.call_count("remove_output"), 1);
        assert_eq!(h.plane.call_count("delete_input"), 1);
        assert_eq!(h.plane.flow_output_count(FLOW_ARN), 0);
        assert!(!h.plane.input_exists("input-1"));
        assert!(h.registry.scan().await.unwrap().is_empty());
        assert!(h.secrets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_without_flow_is_rejected_before_any_call() {
        let plane = Arc::new(SimulatedControlPlane::new(Duration::ZERO));
        let manager = ProvisioningManager::new(
            Arc::new(InMemoryRegistry::new()),
            Arc::new(InMemorySecretStore::new()),
            plane.clone(),
            plane.clone(),
            plane.clone(),
            Arc::new(PresetCatalog::load().unwrap()),
            &AppConfig::default(),
        );

        let err = manager.create_destination(spec()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailure);
        assert_eq!(plane.call_count("create_input"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_and_releases_everything() {
        let h = harness();
        let (destination, resources) = h.manager.create_destination(spec()).await.unwrap();
        let channel_id = resources.channel_id.unwrap();
        ChannelControl::start(h.plane.as_ref(), &channel_id).await.unwrap();

        h.manager.remove_destination(&destination.id).await.unwrap();

        assert_eq!(h.plane.call_count("stop"), 1);
        assert!(!h.plane.channel_exists(&channel_id));
        assert!(!h.plane.input_exists(resources.input_id.as_deref().unwrap()));
        assert_eq!(h.plane.flow_output_count(FLOW_ARN), 0);
        assert!(h.registry.get(&destination.id).await.unwrap_err().is_not_found());
        assert!(h.secrets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_attempts_every_step_and_reports_partial_failure() {
        let h = harness();
        let (destination, resources) = h.manager.create_destination(spec()).await.unwrap();
        h.plane.inject_failure(
            "delete_channel",
            ServiceError::new("ForbiddenException", "Access denied"),
            1,
        );

        let err = h.manager.remove_destination(&destination.id).await.unwrap_err();
        match err {
            OrchestratorError::PartialFailure { failures, .. } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("delete channel"));
                // The input is still attached to the surviving channel
                assert!(failures[1].starts_with("delete input"));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        assert_eq!(h.plane.flow_output_count(FLOW_ARN), 0);
        assert!(h.plane.channel_exists(resources.channel_id.as_deref().unwrap()));
        assert!(h.registry.get(&destination.id).await.unwrap_err().is_not_found());
    }
}
