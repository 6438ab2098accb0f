// Config Loader
// Defaults, then the JSON config file, then RELAYCAST_* environment variables

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::{AppConfig, BackendKind, Platform, Topology};

const ENV_PREFIX: &str = "RELAYCAST_";

/// Resolves the server configuration.
///
/// Environment variables win over the config file, which wins over the
/// built-in defaults. Keys missing from an existing config file are filled
/// in on disk so operators can see every available option.
pub struct ConfigLoader {
    data_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new(data_dir: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            config_path: config_path.into(),
        }
    }

    /// Locate the data directory and config file from the process environment
    pub fn from_env() -> Self {
        let data_dir = std::env::var("RELAYCAST_DATA_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs_next::data_dir().map(|dir| dir.join("relaycast")))
            .unwrap_or_else(|| PathBuf::from("data"));
        let config_path = std::env::var("RELAYCAST_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.json"));
        Self::new(data_dir, config_path)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn load(&self) -> Result<AppConfig, String> {
        self.load_with(|key| std::env::var(key).ok())
    }

    /// Load using `env` as the environment lookup
    pub fn load_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<AppConfig, String> {
        let mut config = self.load_file()?;
        apply_env_overrides(&mut config, &env)?;

        if config.data_dir.trim().is_empty() {
            config.data_dir = self.data_dir.to_string_lossy().to_string();
        }
        if config.log_dir.trim().is_empty() {
            config.log_dir = Path::new(&config.data_dir).join("logs").to_string_lossy().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn load_file(&self) -> Result<AppConfig, String> {
        if !self.config_path.exists() {
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| format!("Failed to read config file {}: {e}", self.config_path.display()))?;
        let mut value: Value = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", self.config_path.display()))?;

        let defaults = serde_json::to_value(AppConfig::default())
            .map_err(|e| format!("Failed to serialize default config: {e}"))?;
        if merge_missing_settings(&mut value, &defaults) {
            if let Err(e) = self.write_back(&value) {
                log::warn!("[Config] Failed to add new keys to {}: {}", self.config_path.display(), e);
            } else {
                log::info!("[Config] Added missing keys to {}", self.config_path.display());
            }
        }

        serde_json::from_value(value)
            .map_err(|e| format!("Invalid config file {}: {e}", self.config_path.display()))
    }

    fn write_back(&self, value: &Value) -> Result<(), String> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| format!("Failed to serialize config: {e}"))?;
        let tmp = self.config_path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| format!("Failed to write config: {e}"))?;
        std::fs::rename(&tmp, &self.config_path).map_err(|e| format!("Failed to save config: {e}"))
    }
}

fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_settings(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

fn env_string(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(&format!("{ENV_PREFIX}{name}"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, String> {
    match env_string(env, name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| format!("{ENV_PREFIX}{name} has an invalid value: '{value}'")),
        None => Ok(None),
    }
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    match value.to_lowercase().as_str() {
        "local" => Ok(BackendKind::Local),
        "aws" => Ok(BackendKind::Aws),
        other => Err(format!("Unknown backend '{other}' (expected local or aws)")),
    }
}

fn parse_topology(value: &str) -> Result<Topology, String> {
    match value.to_lowercase().as_str() {
        "shared" | "static" => Ok(Topology::Shared),
        "dedicated" | "dynamic" => Ok(Topology::Dedicated),
        other => Err(format!("Unknown topology '{other}' (expected shared or dedicated)")),
    }
}

fn apply_env_overrides(config: &mut AppConfig, env: &impl Fn(&str) -> Option<String>) -> Result<(), String> {
    if let Some(host) = env_string(env, "HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse(env, "PORT")? {
        config.port = port;
    }
    if let Some(token) = env_string(env, "API_TOKEN") {
        config.api_token = token;
    }
    if let Some(limit) = env_parse(env, "RATE_LIMIT_PER_MINUTE")? {
        config.rate_limit_per_minute = limit;
    }
    if let Some(origins) = env_string(env, "CORS_ORIGINS") {
        config.cors_origins = origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
    }
    if let Some(dir) = env_string(env, "DATA_DIR") {
        config.data_dir = dir;
    }
    if let Some(dir) = env_string(env, "LOG_DIR") {
        config.log_dir = dir;
    }

    if let Some(backend) = env_string(env, "BACKEND") {
        config.backend = parse_backend(&backend)?;
    }
    if let Some(topology) = env_string(env, "TOPOLOGY") {
        config.topology = parse_topology(&topology)?;
    }
    for platform in Platform::ALL {
        let name = format!("CHANNEL_{}", platform.as_str().to_uppercase());
        if let Some(channel_id) = env_string(env, &name) {
            config.channels.insert(platform, channel_id);
        }
    }
    if let Some(flow_arn) = env_string(env, "FLOW_ARN") {
        config.flow_arn = flow_arn;
    }
    if let Some(table) = env_string(env, "DESTINATIONS_TABLE") {
        config.destinations_table = table;
    }
    if let Some(table) = env_string(env, "PRESETS_TABLE") {
        config.presets_table = table;
    }
    if let Some(prefix) = env_string(env, "SECRET_PREFIX") {
        config.secret_prefix = prefix;
    }

    if let Some(secs) = env_parse(env, "POLL_INTERVAL_SECS")? {
        config.poll_interval_secs = secs;
    }
    if let Some(secs) = env_parse(env, "START_TIMEOUT_SECS")? {
        config.start_timeout_secs = secs;
    }
    if let Some(secs) = env_parse(env, "STOP_TIMEOUT_SECS")? {
        config.stop_timeout_secs = secs;
    }
    if let Some(attempts) = env_parse(env, "RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = attempts;
    }
    if let Some(delay) = env_parse(env, "RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = delay;
    }

    if let Some(region) = env_string(env, "AWS_REGION").or_else(|| env("AWS_REGION")) {
        config.aws_region = region;
    }
    if let Some(arn) = env_string(env, "CHANNEL_ROLE_ARN") {
        config.channel_role_arn = arn;
    }
    if let Some(channel_id) = env_string(env, "TEMPLATE_CHANNEL_ID") {
        config.template_channel_id = channel_id;
    }
    if let Some(latency) = env_parse(env, "SIMULATOR_LATENCY_MS")? {
        config.simulator_latency_ms = latency;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new(dir.path(), dir.path().join("config.json"));

        let config = loader.load_with(env_from(&[])).unwrap();
        assert_eq!(config.port, 8010);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.data_dir, dir.path().to_string_lossy());
        assert!(config.log_dir.ends_with("logs"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"port": 9000, "topology": "dedicated", "channels": {"youtube": "1001"}}"#,
        )
        .unwrap();
        let loader = ConfigLoader::new(dir.path(), &path);

        let config = loader
            .load_with(env_from(&[
                ("RELAYCAST_PORT", "9100"),
                ("RELAYCAST_CHANNEL_TWITCH", "2002"),
                ("RELAYCAST_FLOW_ARN", "arn:flow"),
            ]))
            .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.topology, Topology::Dedicated);
        assert_eq!(config.channels[&Platform::Youtube], "1001");
        assert_eq!(config.channels[&Platform::Twitch], "2002");
        assert_eq!(config.flow_arn, "arn:flow");
    }

    #[test]
    fn test_missing_keys_are_written_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9000}"#).unwrap();

        ConfigLoader::new(dir.path(), &path).load_with(env_from(&[])).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["port"], 9000);
        assert_eq!(saved["pollIntervalSecs"], 5);
        assert_eq!(saved["retry"]["maxAttempts"], 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::new(dir.path(), dir.path().join("config.json"));

        assert!(loader.load_with(env_from(&[("RELAYCAST_PORT", "http")])).is_err());
        assert!(loader.load_with(env_from(&[("RELAYCAST_BACKEND", "gcp")])).is_err());
        let err = loader
            .load_with(env_from(&[("RELAYCAST_START_TIMEOUT_SECS", "1"), ("RELAYCAST_POLL_INTERVAL_SECS", "5")]))
            .unwrap_err();
        assert!(err.contains("timeouts"));
    }
}
