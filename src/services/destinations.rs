// Destination Service
// Validated create/update/delete of destinations and the legacy-record migration

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::models::{Destination, DestinationPatch, DestinationStatus, Platform, Topology};
use crate::services::{
    stream_key_secret_name, CreateDestinationSpec, Orchestrator, OrchestratorError, OrchestratorResult,
    PlatformCatalog, PlatformConfig, PresetCatalog, ProvisioningManager, ResourceRegistry, SecretStore,
};

const MAX_NAME_LENGTH: usize = 100;

fn rtmp_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^rtmps?://[^\s/]+(/\S*)?$").expect("Invalid RTMP URL pattern"))
}

/// Body of `POST /api/destinations`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateDestinationRequest {
    pub name: Option<String>,
    pub platform: Option<String>,
    pub rtmp_url: Option<String>,
    pub stream_key: Option<String>,
    pub preset_id: Option<String>,
    pub enabled: Option<bool>,
}

/// Body of `PUT /api/destinations/{id}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateDestinationRequest {
    pub name: Option<String>,
    pub rtmp_url: Option<String>,
    pub stream_key: Option<String>,
    pub preset_id: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub scanned: usize,
    pub migrated: usize,
    pub secrets_moved: usize,
    pub skipped: usize,
}

/// Destination CRUD on top of the registry, secret store and orchestrator
pub struct DestinationService {
    registry: Arc<dyn ResourceRegistry>,
    secrets: Arc<dyn SecretStore>,
    orchestrator: Arc<Orchestrator>,
    provisioning: Arc<ProvisioningManager>,
    platforms: Arc<PlatformCatalog>,
    presets: Arc<PresetCatalog>,
    topology: Topology,
    secret_prefix: String,
}

impl DestinationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn ResourceRegistry>,
        secrets: Arc<dyn SecretStore>,
        orchestrator: Arc<Orchestrator>,
        provisioning: Arc<ProvisioningManager>,
        platforms: Arc<PlatformCatalog>,
        presets: Arc<PresetCatalog>,
        topology: Topology,
        secret_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            secrets,
            orchestrator,
            provisioning,
            platforms,
            presets,
            topology,
            secret_prefix: secret_prefix.into(),
        }
    }

    pub async fn list(&self) -> OrchestratorResult<Vec<Destination>> {
        self.registry.scan().await
    }

    pub async fn get(&self, id: &str) -> OrchestratorResult<Destination> {
        self.registry.get(id).await
    }

    // ========================================================================
    // Create
    // ========================================================================

    pub async fn create(&self, request: CreateDestinationRequest) -> OrchestratorResult<Destination> {
        let name = validate_name(request.name.as_deref().unwrap_or_default())?;
        let platform: Platform = request
            .platform
            .as_deref()
            .ok_or_else(|| OrchestratorError::ValidationFailure("platform is required".to_string()))?
            .parse()
            .map_err(OrchestratorError::ValidationFailure)?;
        let config = self.platform_config(platform)?;

        let rtmp_url = match request.rtmp_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => Some(validate_rtmp_url(url)?),
            None => config.default_server.clone(),
        };
        if rtmp_url.is_none() && config.requires_channel {
            return Err(OrchestratorError::ValidationFailure(format!(
                "rtmp_url is required for {} destinations",
                config.display_name
            )));
        }

        let stream_key = request.stream_key.filter(|key| !key.trim().is_empty());
        if stream_key.is_none() && config.requires_stream_key {
            return Err(OrchestratorError::ValidationFailure(format!(
                "stream_key is required for {} destinations",
                config.display_name
            )));
        }

        let preset_id = match request.preset_id.filter(|id| !id.trim().is_empty()) {
            Some(preset_id) => Some(self.require_preset(&preset_id)?),
            None => Some(config.default_preset_id.clone()).filter(|id| self.presets.get(id).is_some()),
        };
        let enabled = request.enabled.unwrap_or(true);

        if self.topology == Topology::Dedicated && config.requires_channel {
            let spec = CreateDestinationSpec {
                name,
                platform,
                rtmp_url: rtmp_url.unwrap_or_default(),
                stream_key,
                preset_id,
                enabled,
            };
            let (destination, _) = self.provisioning.create_destination(spec).await?;
            return Ok(destination);
        }

        let mut destination = Destination::new(name, platform);
        destination.rtmp_url = rtmp_url;
        destination.preset_id = preset_id;
        destination.enabled = enabled;

        if let Some(stream_key) = stream_key.as_deref() {
            let secret_name = stream_key_secret_name(&self.secret_prefix, &destination.id);
            self.secrets.put(&secret_name, stream_key).await?;
            destination.stream_key_param = Some(secret_name);
        }

        if let Err(e) = self.registry.put(&destination).await {
            log::error!("[Destinations:{}] Failed to persist record: {}", destination.id, e);
            if let Some(secret_name) = &destination.stream_key_param {
                self.secrets.delete_best_effort(secret_name).await;
            }
            return Err(e);
        }

        log::info!(
            "[Destinations:{}] Created {} destination '{}' -> {}",
            destination.id,
            platform,
            destination.name,
            destination
                .rtmp_url
                .as_deref()
                .map(|url| self.platforms.redact_url(platform, url))
                .unwrap_or_else(|| "-".to_string())
        );
        Ok(destination)
    }

    // ========================================================================
    // Update
    // ========================================================================

    pub async fn update(&self, id: &str, request: UpdateDestinationRequest) -> OrchestratorResult<Destination> {
        let destination = self.registry.get(id).await?;
        let mut patch = DestinationPatch::default();

        if let Some(name) = request.name.as_deref() {
            patch.name = Some(validate_name(name)?);
        }
        if let Some(url) = request.rtmp_url.as_deref() {
            patch.rtmp_url = Some(validate_rtmp_url(url.trim())?);
        }
        if let Some(preset_id) = request.preset_id.as_deref() {
            patch.preset_id = Some(self.require_preset(preset_id)?);
        }
        if let Some(enabled) = request.enabled {
            if !enabled && destination.status == DestinationStatus::Streaming {
                return Err(OrchestratorError::InvalidState(format!(
                    "Destination '{}' is streaming; stop it before disabling",
                    destination.id
                )));
            }
            patch.enabled = Some(enabled);
        }

        let stream_key = request.stream_key.filter(|key| !key.trim().is_empty());
        if destination.is_dedicated() && (patch.rtmp_url.is_some() || stream_key.is_some()) {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' owns a dedicated channel; recreate it to change its endpoint",
                destination.id
            )));
        }

        if let Some(stream_key) = stream_key.as_deref() {
            let secret_name = destination
                .stream_key_param
                .clone()
                .unwrap_or_else(|| stream_key_secret_name(&self.secret_prefix, &destination.id));
            self.secrets.put(&secret_name, stream_key).await?;
            patch.stream_key_param = Some(secret_name);
            log::info!("[Destinations:{}] Stream key replaced", destination.id);
        }

        if patch.is_empty() {
            return Ok(destination);
        }
        self.registry.update_fields(id, &patch).await
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove a destination, stopping it first when it is streaming
    pub async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let destination = self.registry.get(id).await?;

        if destination.status.is_transitioning() {
            return Err(OrchestratorError::InvalidState(format!(
                "Destination '{}' is {}; wait for it to settle or reset it before deleting",
                destination.id, destination.status
            )));
        }
        if destination.status == DestinationStatus::Streaming {
            log::info!("[Destinations:{}] Stopping before delete", destination.id);
            self.orchestrator.stop(id).await?;
        }

        if destination.is_dedicated() {
            return self.provisioning.remove_destination(id).await;
        }

        self.registry.delete(id).await?;
        if let Some(secret_name) = &destination.stream_key_param {
            self.secrets.delete_best_effort(secret_name).await;
        }
        log::info!("[Destinations:{}] Deleted", destination.id);
        Ok(())
    }

    // ========================================================================
    // Migration
    // ========================================================================

    /// Rewrite every stored record in the current schema.
    ///
    /// Legacy status spellings are normalized on read, missing timestamps
    /// are filled and plaintext `stream_key` fields move into the secret store.
    pub async fn migrate(&self) -> OrchestratorResult<MigrationReport> {
        let records = self.registry.scan_raw().await?;
        let mut report = MigrationReport {
            scanned: records.len(),
            ..MigrationReport::default()
        };

        for mut record in records {
            let Some(object) = record.as_object_mut() else {
                report.skipped += 1;
                continue;
            };
            let Some(id) = object.get("id").and_then(Value::as_str).map(str::to_string) else {
                log::warn!("[Migration] Skipping record without id");
                report.skipped += 1;
                continue;
            };

            let legacy_key = object
                .remove("stream_key")
                .and_then(|value| value.as_str().map(str::to_string))
                .filter(|key| !key.is_empty());

            let mut destination: Destination = match serde_json::from_value(record) {
                Ok(destination) => destination,
                Err(e) => {
                    log::warn!("[Migration] Skipping unreadable record {}: {}", id, e);
                    report.skipped += 1;
                    continue;
                }
            };

            if let Some(stream_key) = legacy_key {
                let secret_name = destination
                    .stream_key_param
                    .clone()
                    .unwrap_or_else(|| stream_key_secret_name(&self.secret_prefix, &destination.id));
                self.secrets.put(&secret_name, &stream_key).await?;
                destination.stream_key_param = Some(secret_name);
                report.secrets_moved += 1;
            }

            self.registry.put(&destination).await?;
            report.migrated += 1;
        }

        log::info!(
            "[Migration] {} of {} record(s) migrated, {} stream key(s) moved",
            report.migrated,
            report.scanned,
            report.secrets_moved
        );
        Ok(report)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn platform_config(&self, platform: Platform) -> OrchestratorResult<&PlatformConfig> {
        self.platforms.get(platform).ok_or_else(|| {
            OrchestratorError::ValidationFailure(format!("Platform '{platform}' is not supported"))
        })
    }

    fn require_preset(&self, preset_id: &str) -> OrchestratorResult<String> {
        self.presets
            .get(preset_id)
            .map(|preset| preset.id.clone())
            .ok_or_else(|| OrchestratorError::NotFound(format!("Preset '{preset_id}' not found")))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

fn validate_name(name: &str) -> OrchestratorResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OrchestratorError::ValidationFailure("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(OrchestratorError::ValidationFailure(format!(
            "name too long (max {MAX_NAME_LENGTH} characters)"
        )));
    }
    Ok(name.to_string())
}

fn validate_rtmp_url(url: &str) -> OrchestratorResult<String> {
    if !rtmp_url_pattern().is_match(url) {
        return Err(OrchestratorError::ValidationFailure(
            "rtmp_url must start with rtmp:// or rtmps://".to_string(),
        ));
    }
    Ok(url.to_string())
}
