// Channel Orchestrator
// Drives the destination start/stop state machine over shared or dedicated channels

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{
    AppConfig, ChannelDescription, ChannelState, Destination, DestinationPatch, DestinationStatus,
    Platform, Topology,
};
use crate::services::{
    poll_until, redact_secrets, ChannelControl, OrchestratorError, OrchestratorResult,
    PlatformCatalog, PollError, ResourceRegistry,
};

/// Static inputs of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Shared topology: the channel pre-provisioned for each platform
    pub channel_map: BTreeMap<Platform, String>,
    pub topology: Topology,
    pub poll_interval: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            channel_map: config.channels.clone(),
            topology: config.topology,
            poll_interval: config.poll_interval(),
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// What a transition did to the backing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelAction {
    /// The platform has no channel
    None,
    Started,
    AlreadyRunning,
    /// Another caller had already started it
    JoinedStart,
    Stopped,
    AlreadyStopping,
    AlreadyIdle,
    /// Other destinations still use the channel, so it was left running
    LeftRunning,
}

/// Result of a start/stop transition
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub destination: Destination,
    pub channel_id: Option<String>,
    pub channel_state: Option<ChannelState>,
    pub channel_action: ChannelAction,
}

/// Owns the destination lifecycle and every start/stop of the channels behind it.
///
/// Clones share the same registry, channel client and channel locks.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn ResourceRegistry>,
    channels: Arc<dyn ChannelControl>,
    platforms: Arc<PlatformCatalog>,
    config: OrchestratorConfig,
    // Serializes describe-then-act per channel within this process
    channel_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        channels: Arc<dyn ChannelControl>,
        platforms: Arc<PlatformCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            channels,
            platforms,
            config,
            channel_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Channel configured for a platform in the shared topology
    pub fn shared_channel_for(&self, platform: Platform) -> Option<&str> {
        self.config.channel_map.get(&platform).map(String::as_str)
    }

    // ========================================================================
    // Start / Stop
    // ========================================================================

    /// Bring a destination to `streaming`, starting its channel when needed.
    ///
    /// Blocks until the channel reports RUNNING or the start timeout passes.
    /// The transition runs on its own task, so dropping the returned future
    /// does not abandon the destination in `starting`.
    pub async fn start(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let this = self.clone();
        let id = destination_id.to_string();
        detach("start", async move { this.run_start(&id).await }).await
    }

    /// Bring a destination back to `ready`, stopping its channel only when no
    /// other destination still uses it. Runs detached like `start`.
    pub async fn stop(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let this = self.clone();
        let id = destination_id.to_string();
        detach("stop", async move { this.run_stop(&id).await }).await
    }

    async fn run_start(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let destination = self.registry.get(destination_id).await?;

        if !destination.enabled {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' is disabled",
                destination.id
            )));
        }
        if !destination.status.can_start() {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' is {} and cannot be started",
                destination.id, destination.status
            )));
        }

        log::info!(
            "[Orchestrator:{}] Starting {} destination '{}'",
            destination.id,
            destination.platform,
            destination.name
        );

        let result = match self.resolve_channel(&destination) {
            Ok(Some(channel_id)) => self.drive_start(&destination, &channel_id).await,
            Ok(None) => self.start_without_channel(&destination).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_error(&destination.id, &e).await;
                Err(e)
            }
        }
    }

    async fn run_stop(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let destination = self.registry.get(destination_id).await?;

        if !destination.status.can_stop() {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' is {} and cannot be stopped",
                destination.id, destination.status
            )));
        }

        log::info!(
            "[Orchestrator:{}] Stopping {} destination '{}'",
            destination.id,
            destination.platform,
            destination.name
        );

        let result = match self.bound_channel(&destination) {
            Ok(Some(channel_id)) => self.drive_stop(&destination, &channel_id).await,
            Ok(None) => self.stop_without_channel(&destination).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_error(&destination.id, &e).await;
                Err(e)
            }
        }
    }

    async fn start_without_channel(&self, destination: &Destination) -> OrchestratorResult<TransitionOutcome> {
        let updated = self
            .registry
            .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Streaming))
            .await?;
        log::info!("[Orchestrator:{}] No channel for {}, marked streaming", destination.id, destination.platform);
        Ok(TransitionOutcome {
            destination: updated,
            channel_id: None,
            channel_state: None,
            channel_action: ChannelAction::None,
        })
    }

    async fn stop_without_channel(&self, destination: &Destination) -> OrchestratorResult<TransitionOutcome> {
        let updated = self
            .registry
            .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Ready))
            .await?;
        Ok(TransitionOutcome {
            destination: updated,
            channel_id: None,
            channel_state: None,
            channel_action: ChannelAction::None,
        })
    }

    async fn drive_start(&self, destination: &Destination, channel_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let (description, action) = {
            let lock = self.channel_lock(channel_id);
            let _guard = lock.lock().await;
            self.ensure_channel_starting(destination, channel_id).await?
        };

        let mut patch = DestinationPatch::status(DestinationStatus::Starting).with_channel(channel_id);
        patch.channel_arn = description.arn.clone();
        patch.last_error = Some(None);
        self.registry.update_fields(&destination.id, &patch).await?;

        let state = if description.state == ChannelState::Running {
            description.state
        } else {
            self.wait_for_state(channel_id, ChannelState::Running, self.config.start_timeout)
                .await?
                .state
        };

        let updated = self
            .registry
            .update_fields(
                &destination.id,
                &DestinationPatch::synced(DestinationStatus::Streaming).with_channel(channel_id),
            )
            .await?;

        log::info!(
            "[Orchestrator:{}] Streaming on channel {} ({:?})",
            destination.id,
            channel_id,
            action
        );

        Ok(TransitionOutcome {
            destination: updated,
            channel_id: Some(channel_id.to_string()),
            channel_state: Some(state),
            channel_action: action,
        })
    }

    /// Describe the channel and issue a start only when it is not already on its way up
    async fn ensure_channel_starting(
        &self,
        destination: &Destination,
        channel_id: &str,
    ) -> OrchestratorResult<(ChannelDescription, ChannelAction)> {
        let description = self.channels.describe(channel_id).await?;

        match description.state {
            ChannelState::Running => {
                log::info!("[Orchestrator:{}] Channel {} already running", destination.id, channel_id);
                Ok((description, ChannelAction::AlreadyRunning))
            }
            ChannelState::Starting => {
                log::info!("[Orchestrator:{}] Channel {} already starting", destination.id, channel_id);
                Ok((description, ChannelAction::JoinedStart))
            }
            ChannelState::Idle => {
                let state = self.channels.start(channel_id).await?;
                log::info!("[Orchestrator:{}] Start issued for channel {}", destination.id, channel_id);
                Ok((ChannelDescription { state, ..description }, ChannelAction::Started))
            }
            ChannelState::Stopping | ChannelState::Creating | ChannelState::Updating => {
                log::info!(
                    "[Orchestrator:{}] Channel {} is {}, waiting for IDLE before starting",
                    destination.id,
                    channel_id,
                    description.state
                );
                let idle = self
                    .wait_for_state(channel_id, ChannelState::Idle, self.config.start_timeout)
                    .await?;
                let state = self.channels.start(channel_id).await?;
                Ok((ChannelDescription { state, ..idle }, ChannelAction::Started))
            }
            state => Err(OrchestratorError::UpstreamFailure(format!(
                "Channel '{channel_id}' is {state} and cannot be started"
            ))),
        }
    }

    async fn drive_stop(&self, destination: &Destination, channel_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let (description, action) = {
            let lock = self.channel_lock(channel_id);
            let _guard = lock.lock().await;

            // Fresh scan on every stop; never cached
            let siblings = self.active_siblings(&destination.id, channel_id).await?;
            if siblings > 0 {
                log::info!(
                    "[Orchestrator:{}] {} other destination(s) still on channel {}, leaving it running",
                    destination.id,
                    siblings,
                    channel_id
                );
                let updated = self
                    .registry
                    .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Ready))
                    .await?;
                return Ok(TransitionOutcome {
                    destination: updated,
                    channel_id: Some(channel_id.to_string()),
                    channel_state: None,
                    channel_action: ChannelAction::LeftRunning,
                });
            }

            self.registry
                .update_fields(&destination.id, &DestinationPatch::status(DestinationStatus::Stopping))
                .await?;
            self.ensure_channel_stopping(destination, channel_id).await?
        };

        let state = if description.state == ChannelState::Idle {
            description.state
        } else {
            self.wait_for_state(channel_id, ChannelState::Idle, self.config.stop_timeout)
                .await?
                .state
        };

        let updated = self
            .registry
            .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Ready))
            .await?;

        log::info!("[Orchestrator:{}] Stopped ({:?})", destination.id, action);

        Ok(TransitionOutcome {
            destination: updated,
            channel_id: Some(channel_id.to_string()),
            channel_state: Some(state),
            channel_action: action,
        })
    }

    /// Describe the channel and issue a stop only when it is not already on its way down
    async fn ensure_channel_stopping(
        &self,
        destination: &Destination,
        channel_id: &str,
    ) -> OrchestratorResult<(ChannelDescription, ChannelAction)> {
        let description = self.channels.describe(channel_id).await?;

        match description.state {
            ChannelState::Idle => Ok((description, ChannelAction::AlreadyIdle)),
            ChannelState::Stopping => Ok((description, ChannelAction::AlreadyStopping)),
            ChannelState::Running => {
                let state = self.channels.stop(channel_id).await?;
                log::info!("[Orchestrator:{}] Stop issued for channel {}", destination.id, channel_id);
                Ok((ChannelDescription { state, ..description }, ChannelAction::Stopped))
            }
            ChannelState::Starting => {
                // The service rejects a stop mid-start; let the start finish first
                let running = self
                    .wait_for_state(channel_id, ChannelState::Running, self.config.stop_timeout)
                    .await?;
                let state = self.channels.stop(channel_id).await?;
                Ok((ChannelDescription { state, ..running }, ChannelAction::Stopped))
            }
            state => Err(OrchestratorError::UpstreamFailure(format!(
                "Channel '{channel_id}' is {state} and cannot be stopped"
            ))),
        }
    }

    // ========================================================================
    // Direct channel control
    // ========================================================================

    /// Start the destination's channel and wait for RUNNING; the destination
    /// status is left alone apart from `last_sync`
    pub async fn start_channel(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let this = self.clone();
        let id = destination_id.to_string();
        detach("start-channel", async move { this.run_start_channel(&id).await }).await
    }

    /// Stop the destination's channel, refusing while other destinations stream on it
    pub async fn stop_channel(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let this = self.clone();
        let id = destination_id.to_string();
        detach("stop-channel", async move { this.run_stop_channel(&id).await }).await
    }

    async fn run_start_channel(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let destination = self.registry.get(destination_id).await?;
        let channel_id = self.require_channel(&destination)?;

        let (description, action) = {
            let lock = self.channel_lock(&channel_id);
            let _guard = lock.lock().await;
            self.ensure_channel_starting(&destination, &channel_id).await?
        };

        let state = if description.state == ChannelState::Running {
            description.state
        } else {
            self.wait_for_state(&channel_id, ChannelState::Running, self.config.start_timeout)
                .await?
                .state
        };

        let patch = DestinationPatch {
            last_sync: Some(chrono::Utc::now()),
            ..DestinationPatch::default()
        };
        let updated = self.registry.update_fields(&destination.id, &patch).await?;

        Ok(TransitionOutcome {
            destination: updated,
            channel_id: Some(channel_id),
            channel_state: Some(state),
            channel_action: action,
        })
    }

    async fn run_stop_channel(&self, destination_id: &str) -> OrchestratorResult<TransitionOutcome> {
        let destination = self.registry.get(destination_id).await?;
        let channel_id = match destination.channel_id.clone() {
            Some(channel_id) => channel_id,
            None => self.require_channel(&destination)?,
        };

        let (description, action) = {
            let lock = self.channel_lock(&channel_id);
            let _guard = lock.lock().await;

            let siblings = self.active_siblings(&destination.id, &channel_id).await?;
            if siblings > 0 {
                return Err(OrchestratorError::InvalidState(format!(
                    "Channel '{channel_id}' is still used by {siblings} other destination(s)"
                )));
            }
            self.ensure_channel_stopping(&destination, &channel_id).await?
        };

        let state = if description.state == ChannelState::Idle {
            description.state
        } else {
            self.wait_for_state(&channel_id, ChannelState::Idle, self.config.stop_timeout)
                .await?
                .state
        };

        let updated = self
            .registry
            .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Ready))
            .await?;

        Ok(TransitionOutcome {
            destination: updated,
            channel_id: Some(channel_id),
            channel_state: Some(state),
            channel_action: action,
        })
    }

    /// Move a destination from `error`, or from a transition that never
    /// settled, back to `ready` without touching its channel
    pub async fn reset(&self, destination_id: &str) -> OrchestratorResult<Destination> {
        let destination = self.registry.get(destination_id).await?;
        if destination.status != DestinationStatus::Error && !destination.status.is_transitioning() {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' is {}, only errored or transitioning destinations can be reset",
                destination.id, destination.status
            )));
        }
        log::info!("[Orchestrator:{}] Reset from {}", destination.id, destination.status);
        self.registry
            .update_fields(&destination.id, &DestinationPatch::synced(DestinationStatus::Ready))
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Channel that backs a destination, or None for platforms without one
    pub fn resolve_channel(&self, destination: &Destination) -> OrchestratorResult<Option<String>> {
        if !self.platforms.requires_channel(destination.platform) {
            return Ok(None);
        }
        if destination.is_dedicated() {
            return destination.channel_id.clone().map(Some).ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "Dedicated destination '{}' has no provisioned channel",
                    destination.id
                ))
            });
        }
        self.shared_channel_for(destination.platform)
            .map(|channel_id| Some(channel_id.to_string()))
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "No channel configured for platform '{}'",
                    destination.platform
                ))
            })
    }

    /// Channel a destination was last bound to, falling back to resolution
    fn bound_channel(&self, destination: &Destination) -> OrchestratorResult<Option<String>> {
        if !self.platforms.requires_channel(destination.platform) {
            return Ok(None);
        }
        match &destination.channel_id {
            Some(channel_id) => Ok(Some(channel_id.clone())),
            None => self.resolve_channel(destination),
        }
    }

    fn require_channel(&self, destination: &Destination) -> OrchestratorResult<String> {
        self.resolve_channel(destination)?.ok_or_else(|| {
            OrchestratorError::InvalidState(format!(
                "Destination '{}' ({}) has no channel",
                destination.id, destination.platform
            ))
        })
    }

    /// Count other destinations streaming on the channel
    async fn active_siblings(&self, destination_id: &str, channel_id: &str) -> OrchestratorResult<usize> {
        let destinations = self.registry.scan().await?;
        Ok(destinations
            .iter()
            .filter(|d| d.id != destination_id && d.status == DestinationStatus::Streaming)
            .filter(|d| self.is_bound_to(d, channel_id))
            .count())
    }

    fn is_bound_to(&self, destination: &Destination, channel_id: &str) -> bool {
        match &destination.channel_id {
            Some(bound) => bound == channel_id,
            None => {
                !destination.is_dedicated()
                    && self.shared_channel_for(destination.platform) == Some(channel_id)
            }
        }
    }

    async fn wait_for_state(
        &self,
        channel_id: &str,
        target: ChannelState,
        timeout: Duration,
    ) -> OrchestratorResult<ChannelDescription> {
        await_channel_state(self.channels.as_ref(), channel_id, target, self.config.poll_interval, timeout).await
    }

    fn channel_lock(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.channel_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(channel_id.to_string()).or_default().clone()
    }

    async fn mark_error(&self, destination_id: &str, error: &OrchestratorError) {
        let message = redact_secrets(&error.to_string());
        log::error!("[Orchestrator:{}] {}", destination_id, message);
        if let Err(e) = self
            .registry
            .update_fields(destination_id, &DestinationPatch::failed(message))
            .await
        {
            log::error!("[Orchestrator:{}] Failed to persist error status: {}", destination_id, e);
        }
    }
}

/// Run a transition on its own task and wait for it
async fn detach<F>(operation: &str, transition: F) -> OrchestratorResult<TransitionOutcome>
where
    F: Future<Output = OrchestratorResult<TransitionOutcome>> + Send + 'static,
{
    tokio::spawn(transition).await.map_err(|e| {
        log::error!("[Orchestrator] {} task failed: {}", operation, e);
        OrchestratorError::UpstreamFailure(format!("{operation} did not complete: {e}"))
    })?
}

/// Poll `describe` until the channel reaches `target`.
///
/// Fails with `Timeout` when the budget runs out and with `UpstreamFailure`
/// as soon as the channel reports a failed state.
pub async fn await_channel_state(
    channels: &dyn ChannelControl,
    channel_id: &str,
    target: ChannelState,
    interval: Duration,
    timeout: Duration,
) -> OrchestratorResult<ChannelDescription> {
    let result = poll_until(
        move || async move { channels.describe(channel_id).await.map_err(OrchestratorError::from) },
        |description: &ChannelDescription| {
            if description.state == target {
                Ok(true)
            } else if description.state.is_failed() {
                Err(OrchestratorError::UpstreamFailure(format!(
                    "Channel '{channel_id}' entered {} while waiting for {target}",
                    description.state
                )))
            } else {
                Ok(false)
            }
        },
        interval,
        timeout,
    )
    .await;

    match result {
        Ok(description) => Ok(description),
        Err(PollError::Failed(e)) => Err(e),
        Err(PollError::Timeout { elapsed }) => {
            log::warn!(
                "[Orchestrator] Channel {} did not reach {} within {}s",
                channel_id,
                target,
                timeout.as_secs()
            );
            Err(OrchestratorError::Timeout {
                operation: format!("waiting for channel '{channel_id}' to reach {target}"),
                elapsed,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetryPolicy;
    use crate::services::{
        ErrorKind, InMemoryRegistry, RetryingChannelControl, ScriptedChannelControl, ServiceError,
        SimulatedControlPlane,
    };

    const YOUTUBE_CHANNEL: &str = "1001";
    const TWITCH_CHANNEL: &str = "1002";

    struct Harness {
        orchestrator: Orchestrator,
        registry: Arc<InMemoryRegistry>,
        plane: Arc<SimulatedControlPlane>,
    }

    fn harness(latency: Duration) -> Harness {
        let plane = Arc::new(
            SimulatedControlPlane::new(latency)
                .with_channel(YOUTUBE_CHANNEL, ChannelState::Idle)
                .with_channel(TWITCH_CHANNEL, ChannelState::Idle),
        );
        let registry = Arc::new(InMemoryRegistry::new());
        let config = OrchestratorConfig {
            channel_map: BTreeMap::from([
                (Platform::Youtube, YOUTUBE_CHANNEL.to_string()),
                (Platform::Twitch, TWITCH_CHANNEL.to_string()),
            ]),
            topology: Topology::Shared,
            poll_interval: Duration::from_secs(5),
            start_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(120),
        };
        let orchestrator = Orchestrator::new(
            registry.clone(),
            Arc::new(RetryingChannelControl::new(plane.clone(), RetryPolicy::default())),
            Arc::new(PlatformCatalog::load().unwrap()),
            config,
        );
        Harness { orchestrator, registry, plane }
    }

    async fn seed(registry: &InMemoryRegistry, name: &str, platform: Platform, status: DestinationStatus) -> Destination {
        let mut destination = Destination::new(name, platform);
        destination.status = status;
        registry.put(&destination).await.unwrap();
        destination
    }

    async fn channel_state(plane: &SimulatedControlPlane, channel_id: &str) -> ChannelState {
        plane.describe(channel_id).await.unwrap().state
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_destination_cannot_start() {
        let h = harness(Duration::from_secs(10));
        let mut destination = Destination::new("Disabled", Platform::Youtube);
        destination.enabled = false;
        h.registry.put(&destination).await.unwrap();

        let err = h.orchestrator.start(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Ready);
        assert_eq!(h.plane.call_count("describe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_guards() {
        let h = harness(Duration::from_secs(10));
        let streaming = seed(&h.registry, "Live", Platform::Youtube, DestinationStatus::Streaming).await;
        let ready = seed(&h.registry, "Idle", Platform::Youtube, DestinationStatus::Ready).await;

        let err = h.orchestrator.start(&streaming.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = h.orchestrator.stop(&ready.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert_eq!(h.registry.get(&streaming.id).await.unwrap().status, DestinationStatus::Streaming);
        assert_eq!(h.registry.get(&ready.id).await.unwrap().status, DestinationStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_destination_is_not_found() {
        let h = harness(Duration::from_secs(10));
        assert_eq!(h.orchestrator.start("nope").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(h.orchestrator.stop("nope").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_waits_for_running() {
        let h = harness(Duration::from_secs(12));
        let destination = seed(&h.registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;

        let outcome = h.orchestrator.start(&destination.id).await.unwrap();

        assert_eq!(outcome.channel_action, ChannelAction::Started);
        assert_eq!(outcome.channel_state, Some(ChannelState::Running));
        assert_eq!(outcome.destination.status, DestinationStatus::Streaming);
        assert_eq!(outcome.destination.channel_id.as_deref(), Some(YOUTUBE_CHANNEL));
        assert!(outcome.destination.last_sync.is_some());
        assert_eq!(h.plane.call_count("start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_starts_issue_one_channel_start() {
        let h = harness(Duration::from_secs(12));
        let a = seed(&h.registry, "A", Platform::Youtube, DestinationStatus::Ready).await;
        let b = seed(&h.registry, "B", Platform::Youtube, DestinationStatus::Ready).await;

        let (ra, rb) = tokio::join!(h.orchestrator.start(&a.id), h.orchestrator.start(&b.id));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(h.plane.call_count("start"), 1);
        assert_eq!(ra.destination.status, DestinationStatus::Streaming);
        assert_eq!(rb.destination.status, DestinationStatus::Streaming);
        let mut actions = vec![ra.channel_action, rb.channel_action];
        actions.sort_by_key(|action| format!("{action:?}"));
        assert_eq!(actions, vec![ChannelAction::JoinedStart, ChannelAction::Started]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_running_channel_short_circuits() {
        let h = harness(Duration::from_secs(12));
        h.plane.set_channel_state(YOUTUBE_CHANNEL, ChannelState::Running);
        let destination = seed(&h.registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;

        let outcome = h.orchestrator.start(&destination.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::AlreadyRunning);
        assert_eq!(h.plane.call_count("start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_leaves_shared_channel_for_siblings() {
        let h = harness(Duration::from_secs(12));
        let a = seed(&h.registry, "A", Platform::Youtube, DestinationStatus::Ready).await;
        let b = seed(&h.registry, "B", Platform::Youtube, DestinationStatus::Ready).await;
        h.orchestrator.start(&a.id).await.unwrap();
        h.orchestrator.start(&b.id).await.unwrap();

        let outcome = h.orchestrator.stop(&a.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::LeftRunning);
        assert_eq!(outcome.destination.status, DestinationStatus::Ready);
        assert_eq!(h.plane.call_count("stop"), 0);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Running);
        assert_eq!(h.registry.get(&b.id).await.unwrap().status, DestinationStatus::Streaming);

        let outcome = h.orchestrator.stop(&b.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::Stopped);
        assert_eq!(outcome.channel_state, Some(ChannelState::Idle));
        assert_eq!(h.plane.call_count("stop"), 1);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_error_recounts_siblings() {
        let h = harness(Duration::from_secs(5));
        let a = seed(&h.registry, "A", Platform::Youtube, DestinationStatus::Ready).await;
        let b = seed(&h.registry, "B", Platform::Youtube, DestinationStatus::Ready).await;
        h.orchestrator.start(&a.id).await.unwrap();
        h.orchestrator.start(&b.id).await.unwrap();

        h.registry.update_fields(&a.id, &DestinationPatch::failed("encoder lost")).await.unwrap();
        let outcome = h.orchestrator.stop(&a.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::LeftRunning);
        assert_eq!(outcome.destination.status, DestinationStatus::Ready);
        assert!(outcome.destination.last_error.is_none());
        assert_eq!(h.plane.call_count("stop"), 0);

        h.registry.update_fields(&b.id, &DestinationPatch::failed("encoder lost")).await.unwrap();
        let outcome = h.orchestrator.stop(&b.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::Stopped);
        assert_eq!(outcome.destination.status, DestinationStatus::Ready);
        assert_eq!(h.plane.call_count("stop"), 1);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sibling_stops_issue_one_channel_stop() {
        let h = harness(Duration::from_secs(12));
        let a = seed(&h.registry, "A", Platform::Youtube, DestinationStatus::Ready).await;
        let b = seed(&h.registry, "B", Platform::Youtube, DestinationStatus::Ready).await;
        h.orchestrator.start(&a.id).await.unwrap();
        h.orchestrator.start(&b.id).await.unwrap();

        let (ra, rb) = tokio::join!(h.orchestrator.stop(&a.id), h.orchestrator.stop(&b.id));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(h.plane.call_count("stop"), 1);
        assert_eq!(ra.destination.status, DestinationStatus::Ready);
        assert_eq!(rb.destination.status, DestinationStatus::Ready);
        let mut actions = vec![ra.channel_action, rb.channel_action];
        actions.sort_by_key(|action| format!("{action:?}"));
        assert_eq!(actions, vec![ChannelAction::LeftRunning, ChannelAction::Stopped]);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_still_settles() {
        let h = harness(Duration::from_secs(30));
        let destination = seed(&h.registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;

        let abandoned = tokio::time::timeout(Duration::from_secs(10), h.orchestrator.start(&destination.id)).await;
        assert!(abandoned.is_err());
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Starting);

        tokio::time::sleep(Duration::from_secs(300)).await;

        let stored = h.registry.get(&destination.id).await.unwrap();
        assert_eq!(stored.status, DestinationStatus::Streaming);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Running);
        assert_eq!(h.plane.call_count("start"), 1);

        h.orchestrator.stop(&destination.id).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_stop_still_settles() {
        let h = harness(Duration::from_secs(30));
        h.plane.set_channel_state(YOUTUBE_CHANNEL, ChannelState::Running);
        let destination = seed(&h.registry, "Live", Platform::Youtube, DestinationStatus::Streaming).await;

        let abandoned = tokio::time::timeout(Duration::from_secs(10), h.orchestrator.stop(&destination.id)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Ready);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_siblings_on_other_channels_do_not_block_stop() {
        let h = harness(Duration::from_secs(5));
        let yt = seed(&h.registry, "YT", Platform::Youtube, DestinationStatus::Ready).await;
        let tw = seed(&h.registry, "TW", Platform::Twitch, DestinationStatus::Ready).await;
        h.orchestrator.start(&yt.id).await.unwrap();
        h.orchestrator.start(&tw.id).await.unwrap();

        let outcome = h.orchestrator.stop(&yt.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::Stopped);
        assert_eq!(channel_state(&h.plane, TWITCH_CHANNEL).await, ChannelState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_marks_error() {
        let h = harness(Duration::from_secs(3600));
        let destination = seed(&h.registry, "Slow", Platform::Youtube, DestinationStatus::Ready).await;

        let err = h.orchestrator.start(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let stored = h.registry.get(&destination.id).await.unwrap();
        assert_eq!(stored.status, DestinationStatus::Error);
        assert!(stored.last_error.unwrap().contains("RUNNING"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout_marks_error() {
        let h = harness(Duration::from_secs(3600));
        h.plane.set_channel_state(YOUTUBE_CHANNEL, ChannelState::Running);
        let destination = seed(&h.registry, "Live", Platform::Youtube, DestinationStatus::Streaming).await;

        let err = h.orchestrator.stop(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failure_marks_error_and_retry_from_error_succeeds() {
        let h = harness(Duration::from_secs(5));
        let destination = seed(&h.registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;
        h.plane.inject_failure("start", ServiceError::new("ForbiddenException", "Access denied"), 1);

        let err = h.orchestrator.start(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Error);

        let outcome = h.orchestrator.start(&destination.id).await.unwrap();
        assert_eq!(outcome.destination.status, DestinationStatus::Streaming);
        assert!(outcome.destination.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failing_mid_start_is_upstream_failure() {
        let channels = Arc::new(ScriptedChannelControl::new([
            ChannelState::Idle,
            ChannelState::Starting,
            ChannelState::Error,
        ]));
        let registry = Arc::new(InMemoryRegistry::new());
        let orchestrator = Orchestrator::new(
            registry.clone(),
            channels.clone(),
            Arc::new(PlatformCatalog::load().unwrap()),
            OrchestratorConfig {
                channel_map: BTreeMap::from([(Platform::Youtube, YOUTUBE_CHANNEL.to_string())]),
                topology: Topology::Shared,
                poll_interval: Duration::from_secs(5),
                start_timeout: Duration::from_secs(60),
                stop_timeout: Duration::from_secs(60),
            },
        );
        let destination = seed(&registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;

        let err = orchestrator.start(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert_eq!(channels.count("start"), 1);
        assert_eq!(channels.count("describe"), 3);

        let stored = registry.get(&destination.id).await.unwrap();
        assert_eq!(stored.status, DestinationStatus::Error);
        assert!(stored.last_error.unwrap().contains("ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_stopping_channel_waits_for_idle() {
        let h = harness(Duration::from_secs(10));
        h.plane.set_channel_state(YOUTUBE_CHANNEL, ChannelState::Running);
        ChannelControl::stop(h.plane.as_ref(), YOUTUBE_CHANNEL).await.unwrap();
        let destination = seed(&h.registry, "Main", Platform::Youtube, DestinationStatus::Ready).await;

        let outcome = h.orchestrator.start(&destination.id).await.unwrap();
        assert_eq!(outcome.channel_action, ChannelAction::Started);
        assert_eq!(outcome.destination.status, DestinationStatus::Streaming);
        assert_eq!(h.plane.call_count("start"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hls_skips_channel_control() {
        let h = harness(Duration::from_secs(10));
        let destination = seed(&h.registry, "Player", Platform::Hls, DestinationStatus::Ready).await;

        let started = h.orchestrator.start(&destination.id).await.unwrap();
        assert_eq!(started.channel_action, ChannelAction::None);
        assert_eq!(started.destination.status, DestinationStatus::Streaming);

        let stopped = h.orchestrator.stop(&destination.id).await.unwrap();
        assert_eq!(stopped.destination.status, DestinationStatus::Ready);
        assert_eq!(h.plane.call_count("describe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmapped_platform_fails_with_not_found() {
        let h = harness(Duration::from_secs(10));
        let destination = seed(&h.registry, "LinkedIn", Platform::Linkedin, DestinationStatus::Ready).await;

        let err = h.orchestrator.start(&destination.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.registry.get(&destination.id).await.unwrap().status, DestinationStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_channel_refuses_while_siblings_stream() {
        let h = harness(Duration::from_secs(5));
        let a = seed(&h.registry, "A", Platform::Youtube, DestinationStatus::Ready).await;
        let b = seed(&h.registry, "B", Platform::Youtube, DestinationStatus::Ready).await;
        h.orchestrator.start(&a.id).await.unwrap();
        h.orchestrator.start(&b.id).await.unwrap();

        let err = h.orchestrator.stop_channel(&a.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Running);

        h.orchestrator.stop(&b.id).await.unwrap();
        h.orchestrator.start_channel(&a.id).await.unwrap();
        let outcome = h.orchestrator.stop_channel(&a.id).await.unwrap();
        assert_eq!(outcome.destination.status, DestinationStatus::Ready);
        assert_eq!(channel_state(&h.plane, YOUTUBE_CHANNEL).await, ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_channel_only_records_sync() {
        let h = harness(Duration::from_secs(5));
        let destination = seed(&h.registry, "Main", Platform::Twitch, DestinationStatus::Ready).await;

        let outcome = h.orchestrator.start_channel(&destination.id).await.unwrap();
        assert_eq!(outcome.channel_state, Some(ChannelState::Running));
        assert_eq!(outcome.destination.status, DestinationStatus::Ready);
        assert!(outcome.destination.last_sync.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_from_error_or_unsettled_transition() {
        let h = harness(Duration::from_secs(5));
        let failed = seed(&h.registry, "Failed", Platform::Youtube, DestinationStatus::Error).await;
        let starting = seed(&h.registry, "Starting", Platform::Youtube, DestinationStatus::Starting).await;
        let stopping = seed(&h.registry, "Stopping", Platform::Youtube, DestinationStatus::Stopping).await;
        let ready = seed(&h.registry, "Ready", Platform::Youtube, DestinationStatus::Ready).await;
        let streaming = seed(&h.registry, "Live", Platform::Youtube, DestinationStatus::Streaming).await;

        assert_eq!(h.orchestrator.reset(&failed.id).await.unwrap().status, DestinationStatus::Ready);
        assert_eq!(h.orchestrator.reset(&starting.id).await.unwrap().status, DestinationStatus::Ready);
        assert_eq!(h.orchestrator.reset(&stopping.id).await.unwrap().status, DestinationStatus::Ready);
        assert_eq!(h.orchestrator.reset(&ready.id).await.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(h.orchestrator.reset(&streaming.id).await.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(h.plane.call_count("describe"), 0);
    }
}
