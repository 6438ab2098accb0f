// MediaLive Control
// Channel lifecycle and per-destination provisioning against AWS Elemental MediaLive

use async_trait::async_trait;
use aws_sdk_medialive::types::{
    ChannelClass, InputAttachment, InputType, OutputDestination, OutputDestinationSettings,
};
use aws_sdk_medialive::Client;
use std::time::Duration;

use super::service_error;
use crate::models::{
    AppConfig, ChannelDescription, ChannelDescriptor, ChannelSpec, ChannelState, InputDescriptor,
};
use crate::services::{poll_until, ChannelControl, ChannelProvisioner, PollError, ServiceError};

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DELETE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct MediaLiveChannelControl {
    client: Client,
    role_arn: String,
    template_channel_id: String,
}

impl MediaLiveChannelControl {
    pub fn new(client: Client, config: &AppConfig) -> Self {
        Self {
            client,
            role_arn: config.channel_role_arn.clone(),
            template_channel_id: config.template_channel_id.clone(),
        }
    }

    fn require_template(&self) -> Result<&str, ServiceError> {
        if self.template_channel_id.trim().is_empty() {
            return Err(ServiceError::new(
                "BadRequestException",
                "No template channel configured for provisioning",
            ));
        }
        Ok(&self.template_channel_id)
    }

    /// Describe, mapping "no such channel" to `None`
    async fn state_if_exists(&self, channel_id: &str) -> Result<Option<ChannelState>, ServiceError> {
        match self.describe(channel_id).await {
            Ok(description) => Ok(Some(description.state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn pipeline_count(class: Option<&ChannelClass>) -> u32 {
    match class {
        Some(ChannelClass::SinglePipeline) => 1,
        _ => 2,
    }
}

#[async_trait]
impl ChannelControl for MediaLiveChannelControl {
    async fn describe(&self, channel_id: &str) -> Result<ChannelDescription, ServiceError> {
        let output = self
            .client
            .describe_channel()
            .channel_id(channel_id)
            .send()
            .await
            .map_err(service_error)?;

        let state = output
            .state()
            .map(|state| ChannelState::from_service_str(state.as_str()))
            .unwrap_or(ChannelState::Error);
        let pipelines = output.pipeline_details().len() as u32;

        Ok(ChannelDescription {
            channel_id: output.id().unwrap_or(channel_id).to_string(),
            arn: output.arn().map(str::to_string),
            name: output.name().map(str::to_string),
            state,
            pipelines_running: output.pipelines_running_count().unwrap_or(0).max(0) as u32,
            pipeline_count: if pipelines > 0 { pipelines } else { pipeline_count(output.channel_class()) },
            input_count: output.input_attachments().len() as u32,
            output_count: output.destinations().len() as u32,
        })
    }

    async fn start(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        let output = self
            .client
            .start_channel()
            .channel_id(channel_id)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaLive] Start requested for channel {}", channel_id);
        Ok(output
            .state()
            .map(|state| ChannelState::from_service_str(state.as_str()))
            .unwrap_or(ChannelState::Starting))
    }

    async fn stop(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        let output = self
            .client
            .stop_channel()
            .channel_id(channel_id)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaLive] Stop requested for channel {}", channel_id);
        Ok(output
            .state()
            .map(|state| ChannelState::from_service_str(state.as_str()))
            .unwrap_or(ChannelState::Stopping))
    }
}

#[async_trait]
impl ChannelProvisioner for MediaLiveChannelControl {
    /// Create an RTP push input sharing the template input's security groups
    async fn create_input(&self, name: &str) -> Result<InputDescriptor, ServiceError> {
        let template = self
            .client
            .describe_channel()
            .channel_id(self.require_template()?)
            .send()
            .await
            .map_err(service_error)?;

        let mut security_groups = Vec::new();
        if let Some(input_id) = template.input_attachments().first().and_then(|a| a.input_id()) {
            let template_input = self
                .client
                .describe_input()
                .input_id(input_id)
                .send()
                .await
                .map_err(service_error)?;
            security_groups = template_input.security_groups().to_vec();
        }

        let output = self
            .client
            .create_input()
            .name(name)
            .r#type(InputType::RtpPush)
            .set_input_security_groups(Some(security_groups).filter(|groups| !groups.is_empty()))
            .send()
            .await
            .map_err(service_error)?;
        let input = output
            .input()
            .ok_or_else(|| ServiceError::new("InternalFailure", "CreateInput returned no input"))?;

        let input_id = input
            .id()
            .ok_or_else(|| ServiceError::new("InternalFailure", "CreateInput returned no input id"))?
            .to_string();
        log::info!("[MediaLive] Created input {} ({})", input_id, name);
        Ok(InputDescriptor {
            input_id,
            arn: input.arn().map(str::to_string),
            endpoints: input
                .destinations()
                .iter()
                .filter_map(|destination| destination.url().map(str::to_string))
                .collect(),
        })
    }

    async fn delete_input(&self, input_id: &str) -> Result<(), ServiceError> {
        self.client
            .delete_input()
            .input_id(input_id)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaLive] Deleted input {}", input_id);
        Ok(())
    }

    /// Clone the template channel's encoder settings onto a new channel
    /// that publishes to the destination's RTMP endpoint
    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ChannelDescriptor, ServiceError> {
        let template = self
            .client
            .describe_channel()
            .channel_id(self.require_template()?)
            .send()
            .await
            .map_err(service_error)?;

        let destination_id = template
            .destinations()
            .first()
            .and_then(|destination| destination.id())
            .unwrap_or("destination1")
            .to_string();
        let pipelines = pipeline_count(template.channel_class());
        let settings: Vec<OutputDestinationSettings> = (0..pipelines)
            .map(|_| {
                OutputDestinationSettings::builder()
                    .url(&spec.rtmp_url)
                    .stream_name(&spec.stream_key)
                    .build()
            })
            .collect();

        let mut request = self
            .client
            .create_channel()
            .name(&spec.name)
            .set_channel_class(template.channel_class().cloned())
            .set_encoder_settings(template.encoder_settings().cloned())
            .set_input_specification(template.input_specification().cloned())
            .input_attachments(
                InputAttachment::builder()
                    .input_id(&spec.input_id)
                    .input_attachment_name(&spec.input_id)
                    .build(),
            )
            .destinations(
                OutputDestination::builder()
                    .id(destination_id)
                    .set_settings(Some(settings))
                    .build(),
            )
            .tags("relaycast:managed", "true");
        if !self.role_arn.is_empty() {
            request = request.role_arn(&self.role_arn);
        }
        if let Some(preset) = &spec.preset {
            request = request.tags("relaycast:preset", &preset.id);
        }

        let output = request.send().await.map_err(service_error)?;
        let channel = output
            .channel()
            .ok_or_else(|| ServiceError::new("InternalFailure", "CreateChannel returned no channel"))?;
        let channel_id = channel
            .id()
            .ok_or_else(|| ServiceError::new("InternalFailure", "CreateChannel returned no channel id"))?
            .to_string();
        log::info!("[MediaLive] Created channel {} ({})", channel_id, spec.name);
        Ok(ChannelDescriptor {
            channel_id,
            arn: channel.arn().map(str::to_string),
        })
    }

    /// Delete and wait until the channel is gone, so its input can be released
    async fn delete_channel(&self, channel_id: &str) -> Result<(), ServiceError> {
        self.client
            .delete_channel()
            .channel_id(channel_id)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[MediaLive] Deleting channel {}", channel_id);

        poll_until(
            || self.state_if_exists(channel_id),
            |state| Ok(matches!(state, None | Some(ChannelState::Deleted))),
            DELETE_POLL_INTERVAL,
            DELETE_TIMEOUT,
        )
        .await
        .map_err(|e| match e {
            PollError::Failed(err) => err,
            PollError::Timeout { elapsed } => ServiceError::new(
                "DeleteTimeout",
                format!("Channel '{channel_id}' still present after {}s", elapsed.as_secs()),
            ),
        })?;
        Ok(())
    }
}
