// Backends
// Client selection: local files plus simulator, or the managed AWS services

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{AppConfig, BackendKind, ChannelState};
use crate::services::{
    ChannelControl, ChannelProvisioner, EncryptedFileSecretStore, FlowControl, JsonFileRegistry,
    ResourceRegistry, RetryingChannelControl, RetryingFlowControl, SecretStore, SimulatedControlPlane,
};

/// The injected clients the orchestrator and services run against
pub struct Backends {
    pub name: &'static str,
    pub registry: Arc<dyn ResourceRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub channels: Arc<dyn ChannelControl>,
    pub provisioner: Arc<dyn ChannelProvisioner>,
    pub flows: Arc<dyn FlowControl>,
}

impl Backends {
    pub async fn from_config(config: &AppConfig) -> Result<Self, String> {
        match config.backend {
            BackendKind::Local => Self::local(config),
            BackendKind::Aws => Self::aws(config).await,
        }
    }

    /// File-backed registry and secrets with the in-process control plane.
    ///
    /// Every configured channel is seeded IDLE and the configured flow is
    /// seeded with a connected primary source.
    pub fn local(config: &AppConfig) -> Result<Self, String> {
        let data_dir = Path::new(&config.data_dir);
        let registry = JsonFileRegistry::new(data_dir).map_err(|e| e.to_string())?;
        let secrets = EncryptedFileSecretStore::new(data_dir).map_err(|e| e.to_string())?;

        let plane = Arc::new(SimulatedControlPlane::new(Duration::from_millis(
            config.simulator_latency_ms,
        )));
        for (platform, channel_id) in &config.channels {
            if channel_id.trim().is_empty() {
                continue;
            }
            plane.add_channel(channel_id, ChannelState::Idle);
            log::info!("[Backend] Simulated channel {} for {}", channel_id, platform);
        }
        if !config.flow_arn.trim().is_empty() {
            plane.add_flow(&config.flow_arn);
        }

        let channels = Arc::new(RetryingChannelControl::new(plane.clone(), config.retry));
        Ok(Self {
            name: "local",
            registry: Arc::new(registry),
            secrets: Arc::new(secrets),
            channels: channels.clone(),
            provisioner: channels,
            flows: Arc::new(RetryingFlowControl::new(plane, config.retry)),
        })
    }

    #[cfg(feature = "aws")]
    async fn aws(config: &AppConfig) -> Result<Self, String> {
        use crate::services::aws::{
            DynamoRegistry, MediaConnectFlowControl, MediaLiveChannelControl, SsmSecretStore,
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if !config.aws_region.is_empty() {
            loader = loader.region(aws_config::Region::new(config.aws_region.clone()));
        }
        let sdk_config = loader.load().await;

        let medialive = Arc::new(MediaLiveChannelControl::new(
            aws_sdk_medialive::Client::new(&sdk_config),
            config,
        ));
        let mediaconnect = Arc::new(MediaConnectFlowControl::new(aws_sdk_mediaconnect::Client::new(
            &sdk_config,
        )));
        let channels = Arc::new(RetryingChannelControl::new(medialive, config.retry));

        Ok(Self {
            name: "aws",
            registry: Arc::new(DynamoRegistry::new(
                aws_sdk_dynamodb::Client::new(&sdk_config),
                config.destinations_table.clone(),
            )),
            secrets: Arc::new(SsmSecretStore::new(aws_sdk_ssm::Client::new(&sdk_config))),
            channels: channels.clone(),
            provisioner: channels,
            flows: Arc::new(RetryingFlowControl::new(mediaconnect, config.retry)),
        })
    }

    #[cfg(not(feature = "aws"))]
    async fn aws(_config: &AppConfig) -> Result<Self, String> {
        Err("The aws backend requires building with --features aws".to_string())
    }
}
