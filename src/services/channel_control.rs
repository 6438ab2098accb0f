// Channel Control
// Client seams for the managed channel service, plus the retrying decorator

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{
    ChannelDescription, ChannelDescriptor, ChannelSpec, ChannelState, InputDescriptor, RetryPolicy,
};
use crate::services::{execute_with_retry, ServiceError};

/// Start/stop/describe against the managed channel service
#[async_trait]
pub trait ChannelControl: Send + Sync {
    async fn describe(&self, channel_id: &str) -> Result<ChannelDescription, ServiceError>;

    /// Request a start; returns the state the service reports afterwards
    async fn start(&self, channel_id: &str) -> Result<ChannelState, ServiceError>;

    /// Request a stop; returns the state the service reports afterwards
    async fn stop(&self, channel_id: &str) -> Result<ChannelState, ServiceError>;
}

/// Creation and deletion of dedicated inputs and channels
#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    async fn create_input(&self, name: &str) -> Result<InputDescriptor, ServiceError>;

    async fn delete_input(&self, input_id: &str) -> Result<(), ServiceError>;

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ChannelDescriptor, ServiceError>;

    async fn delete_channel(&self, channel_id: &str) -> Result<(), ServiceError>;
}

/// Wraps a channel client so every call goes through the Retry Executor.
///
/// Start and stop are made idempotent: a conflict from the service is
/// resolved by describing the channel and accepting it when it is already
/// heading to the requested state.
pub struct RetryingChannelControl<C: ?Sized> {
    inner: Arc<C>,
    policy: RetryPolicy,
}

impl<C: ?Sized> RetryingChannelControl<C> {
    pub fn new(inner: Arc<C>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<C: ChannelControl + ?Sized> RetryingChannelControl<C> {
    async fn resolve_conflict(
        &self,
        channel_id: &str,
        err: ServiceError,
        accepted: [ChannelState; 2],
    ) -> Result<ChannelState, ServiceError> {
        if !err.is_conflict() {
            return Err(err);
        }
        let description = self.describe(channel_id).await?;
        if accepted.contains(&description.state) {
            log::info!(
                "[ChannelControl:{}] Conflict ignored, channel already {}",
                channel_id,
                description.state
            );
            Ok(description.state)
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl<C: ChannelControl + ?Sized> ChannelControl for RetryingChannelControl<C> {
    async fn describe(&self, channel_id: &str) -> Result<ChannelDescription, ServiceError> {
        execute_with_retry("DescribeChannel", &self.policy, || self.inner.describe(channel_id)).await
    }

    async fn start(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        match execute_with_retry("StartChannel", &self.policy, || self.inner.start(channel_id)).await {
            Ok(state) => Ok(state),
            Err(err) => {
                self.resolve_conflict(channel_id, err, [ChannelState::Starting, ChannelState::Running])
                    .await
            }
        }
    }

    async fn stop(&self, channel_id: &str) -> Result<ChannelState, ServiceError> {
        match execute_with_retry("StopChannel", &self.policy, || self.inner.stop(channel_id)).await {
            Ok(state) => Ok(state),
            Err(err) => {
                self.resolve_conflict(channel_id, err, [ChannelState::Stopping, ChannelState::Idle])
                    .await
            }
        }
    }
}

#[async_trait]
impl<C: ChannelProvisioner + ?Sized> ChannelProvisioner for RetryingChannelControl<C> {
    async fn create_input(&self, name: &str) -> Result<InputDescriptor, ServiceError> {
        execute_with_retry("CreateInput", &self.policy, || self.inner.create_input(name)).await
    }

    async fn delete_input(&self, input_id: &str) -> Result<(), ServiceError> {
        execute_with_retry("DeleteInput", &self.policy, || self.inner.delete_input(input_id)).await
    }

    async fn create_channel(&self, spec: &ChannelSpec) -> Result<ChannelDescriptor, ServiceError> {
        execute_with_retry("CreateChannel", &self.policy, || self.inner.create_channel(spec)).await
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), ServiceError> {
        execute_with_retry("DeleteChannel", &self.policy, || self.inner.delete_channel(channel_id))
            .await
    }
}
