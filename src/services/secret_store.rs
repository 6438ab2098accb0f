// Secret Store
// Named storage for stream keys, kept apart from destination records

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;

use crate::services::{MachineKeyCipher, OrchestratorError, OrchestratorResult};

/// Name of the secret holding a destination's stream key
pub fn stream_key_secret_name(prefix: &str, destination_id: &str) -> String {
    format!("{}/{}/stream-key", prefix.trim_end_matches('/'), destination_id)
}

/// Put/get/delete of sensitive strings by name
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, name: &str, value: &str) -> OrchestratorResult<()>;

    /// Fails with `NotFound` when the secret does not exist
    async fn get(&self, name: &str) -> OrchestratorResult<String>;

    async fn delete(&self, name: &str) -> OrchestratorResult<()>;

    /// Delete, logging instead of propagating failures
    async fn delete_best_effort(&self, name: &str) {
        match self.delete(name).await {
            Ok(()) => {}
            Err(OrchestratorError::NotFound(_)) => {
                log::debug!("[Secrets] {} already absent", name);
            }
            Err(e) => {
                log::warn!("[Secrets] Failed to delete {}: {}", name, e);
            }
        }
    }
}

fn validate_secret_name(name: &str) -> OrchestratorResult<()> {
    if name.trim().is_empty() {
        return Err(OrchestratorError::ValidationFailure("Secret name cannot be empty".to_string()));
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(OrchestratorError::ValidationFailure("Secret name cannot contain '..'".to_string()));
    }
    Ok(())
}

fn secret_not_found(name: &str) -> OrchestratorError {
    OrchestratorError::NotFound(format!("Secret '{name}' not found"))
}

/// Process-local secret store
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().map(|secrets| secrets.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.secrets
            .read()
            .map(|secrets| secrets.contains_key(name))
            .unwrap_or(false)
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn put(&self, name: &str, value: &str) -> OrchestratorResult<()> {
        validate_secret_name(name)?;
        self.secrets
            .write()
            .map_err(|_| OrchestratorError::Storage("Secret store lock poisoned".to_string()))?
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, name: &str) -> OrchestratorResult<String> {
        self.secrets
            .read()
            .map_err(|_| OrchestratorError::Storage("Secret store lock poisoned".to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| secret_not_found(name))
    }

    async fn delete(&self, name: &str) -> OrchestratorResult<()> {
        self.secrets
            .write()
            .map_err(|_| OrchestratorError::Storage("Secret store lock poisoned".to_string()))?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| secret_not_found(name))
    }
}

/// Secrets sealed with the machine key in a single JSON document
pub struct EncryptedFileSecretStore {
    path: PathBuf,
    cipher: MachineKeyCipher,
    lock: Mutex<()>,
}

impl EncryptedFileSecretStore {
    pub fn new(data_dir: &Path) -> OrchestratorResult<Self> {
        let cipher = MachineKeyCipher::open(data_dir).map_err(OrchestratorError::Storage)?;
        Ok(Self {
            path: data_dir.join("secrets.json"),
            cipher,
            lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> OrchestratorResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(OrchestratorError::Storage(format!("Failed to read secrets: {e}"))),
        }
    }

    async fn save(&self, secrets: &BTreeMap<String, String>) -> OrchestratorResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(secrets)?;
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to write secrets: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to commit secrets: {e}")))
    }
}

#[async_trait]
impl SecretStore for EncryptedFileSecretStore {
    async fn put(&self, name: &str, value: &str) -> OrchestratorResult<()> {
        validate_secret_name(name)?;
        let sealed = self.cipher.seal(value).map_err(OrchestratorError::Storage)?;

        let _guard = self.lock.lock().await;
        let mut secrets = self.load().await?;
        secrets.insert(name.to_string(), sealed);
        self.save(&secrets).await
    }

    async fn get(&self, name: &str) -> OrchestratorResult<String> {
        let sealed = {
            let _guard = self.lock.lock().await;
            self.load().await?.remove(name).ok_or_else(|| secret_not_found(name))?
        };
        self.cipher.unseal(&sealed).map_err(OrchestratorError::Storage)
    }

    async fn delete(&self, name: &str) -> OrchestratorResult<()> {
        let _guard = self.lock.lock().await;
        let mut secrets = self.load().await?;
        if secrets.remove(name).is_none() {
            return Err(secret_not_found(name));
        }
        self.save(&secrets).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_secret_name_layout() {
        assert_eq!(
            stream_key_secret_name("/relaycast/destinations/", "abc"),
            "/relaycast/destinations/abc/stream-key"
        );
    }

    #[tokio::test]
    async fn test_file_store_never_writes_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileSecretStore::new(dir.path()).unwrap();

        store.put("/relaycast/d1/stream-key", "live_abc123").await.unwrap();
        let on_disk = std::fs::read_to_string(dir.path().join("secrets.json")).unwrap();
        assert!(!on_disk.contains("live_abc123"));
        assert!(on_disk.contains("ENC::"));

        assert_eq!(store.get("/relaycast/d1/stream-key").await.unwrap(), "live_abc123");
    }

    #[tokio::test]
    async fn test_missing_secret_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = EncryptedFileSecretStore::new(dir.path()).unwrap();
        assert!(store.get("/relaycast/none").await.unwrap_err().is_not_found());
        assert!(store.delete("/relaycast/none").await.unwrap_err().is_not_found());

        // Best-effort delete swallows the failure
        store.delete_best_effort("/relaycast/none").await;
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemorySecretStore::new();
        store.put("/p/a/stream-key", "k1").await.unwrap();
        store.put("/p/a/stream-key", "k2").await.unwrap();
        assert_eq!(store.get("/p/a/stream-key").await.unwrap(), "k2");
        store.delete("/p/a/stream-key").await.unwrap();
        assert!(store.is_empty());
    }
}
