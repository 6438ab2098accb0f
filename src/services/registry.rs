// Resource Registry
// Durable destination records: in-memory and JSON-file backends

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;

use crate::models::{Destination, DestinationPatch};
use crate::services::{OrchestratorError, OrchestratorResult};

/// Persistence contract for destinations.
///
/// Writes are atomic per destination. Nothing is guaranteed across
/// destinations, so callers must tolerate read-after-write lag between them.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Fails with `NotFound` when no record exists
    async fn get(&self, id: &str) -> OrchestratorResult<Destination>;

    /// Create or replace a record
    async fn put(&self, destination: &Destination) -> OrchestratorResult<()>;

    /// Apply a typed partial update and return the updated record
    async fn update_fields(&self, id: &str, patch: &DestinationPatch) -> OrchestratorResult<Destination>;

    /// Fails with `NotFound` when no record exists
    async fn delete(&self, id: &str) -> OrchestratorResult<()>;

    async fn scan(&self) -> OrchestratorResult<Vec<Destination>>;

    /// Records as stored, including fields the current schema no longer knows
    async fn scan_raw(&self) -> OrchestratorResult<Vec<Value>> {
        let destinations = self.scan().await?;
        destinations
            .iter()
            .map(|destination| serde_json::to_value(destination).map_err(OrchestratorError::from))
            .collect()
    }

    fn backend_name(&self) -> &'static str;
}

/// Validate a record id before it becomes part of a storage key or path
pub fn validate_record_id(id: &str) -> OrchestratorResult<()> {
    if id.is_empty() {
        return Err(OrchestratorError::ValidationFailure("Destination id cannot be empty".to_string()));
    }
    if id.len() > 100 {
        return Err(OrchestratorError::ValidationFailure("Destination id too long (max 100 characters)".to_string()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(OrchestratorError::ValidationFailure(
            "Destination id can only contain letters, numbers, underscores, and hyphens".to_string(),
        ));
    }
    Ok(())
}

fn parse_record(value: Value) -> OrchestratorResult<Destination> {
    serde_json::from_value(value).map_err(OrchestratorError::from)
}

fn not_found(id: &str) -> OrchestratorError {
    OrchestratorError::NotFound(format!("Destination '{id}' not found"))
}

// ============================================================================
// In-memory registry
// ============================================================================

/// Process-local registry holding raw JSON documents
#[derive(Default)]
pub struct InMemoryRegistry {
    records: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as-is (used to seed legacy records)
    pub fn insert_raw(&self, id: &str, value: Value) -> OrchestratorResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| OrchestratorError::Storage("Registry lock poisoned".to_string()))?;
        records.insert(id.to_string(), value);
        Ok(())
    }

    fn read(&self) -> OrchestratorResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>>> {
        self.records
            .read()
            .map_err(|_| OrchestratorError::Storage("Registry lock poisoned".to_string()))
    }

    fn write(&self) -> OrchestratorResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>>> {
        self.records
            .write()
            .map_err(|_| OrchestratorError::Storage("Registry lock poisoned".to_string()))
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryRegistry {
    async fn get(&self, id: &str) -> OrchestratorResult<Destination> {
        let value = self.read()?.get(id).cloned().ok_or_else(|| not_found(id))?;
        parse_record(value)
    }

    async fn put(&self, destination: &Destination) -> OrchestratorResult<()> {
        let value = serde_json::to_value(destination)?;
        self.write()?.insert(destination.id.clone(), value);
        Ok(())
    }

    async fn update_fields(&self, id: &str, patch: &DestinationPatch) -> OrchestratorResult<Destination> {
        let mut records = self.write()?;
        let value = records.get(id).cloned().ok_or_else(|| not_found(id))?;
        let mut destination = parse_record(value)?;
        patch.apply(&mut destination);
        records.insert(id.to_string(), serde_json::to_value(&destination)?);
        Ok(destination)
    }

    async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        self.write()?.remove(id).map(|_| ()).ok_or_else(|| not_found(id))
    }

    async fn scan(&self) -> OrchestratorResult<Vec<Destination>> {
        let values: Vec<Value> = self.read()?.values().cloned().collect();
        values.into_iter().map(parse_record).collect()
    }

    async fn scan_raw(&self) -> OrchestratorResult<Vec<Value>> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// JSON file registry
// ============================================================================

/// One pretty-printed JSON document per destination under `<data_dir>/destinations`
pub struct JsonFileRegistry {
    records_dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(data_dir: &Path) -> OrchestratorResult<Self> {
        let records_dir = data_dir.join("destinations");
        std::fs::create_dir_all(&records_dir)
            .map_err(|e| OrchestratorError::Storage(format!("Failed to create registry directory: {e}")))?;
        Ok(Self {
            records_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, id: &str) -> OrchestratorResult<PathBuf> {
        validate_record_id(id)?;
        Ok(self.records_dir.join(format!("{id}.json")))
    }

    async fn read_value(&self, id: &str) -> OrchestratorResult<Value> {
        let path = self.record_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found(id)),
            Err(e) => return Err(OrchestratorError::Storage(format!("Failed to read destination: {e}"))),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_value(&self, id: &str, value: &Value) -> OrchestratorResult<()> {
        let path = self.record_path(id)?;
        let tmp = self.records_dir.join(format!("{id}.json.tmp"));
        let content = serde_json::to_string_pretty(value)?;

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to write destination: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to commit destination: {e}")))
    }

    async fn read_all(&self) -> OrchestratorResult<Vec<Value>> {
        let mut entries = tokio::fs::read_dir(&self.records_dir)
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to list destinations: {e}")))?;

        let mut values = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| OrchestratorError::Storage(format!("Failed to list destinations: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().map(|stem| stem.to_string_lossy().to_string()) else {
                continue;
            };
            match self.read_value(&id).await {
                Ok(value) => values.push(value),
                // Removed between listing and reading
                Err(OrchestratorError::NotFound(_)) => {}
                Err(e) => log::warn!("[Registry] Skipping unreadable record {}: {}", id, e),
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl ResourceRegistry for JsonFileRegistry {
    async fn get(&self, id: &str) -> OrchestratorResult<Destination> {
        parse_record(self.read_value(id).await?)
    }

    async fn put(&self, destination: &Destination) -> OrchestratorResult<()> {
        let value = serde_json::to_value(destination)?;
        let _guard = self.write_lock.lock().await;
        self.write_value(&destination.id, &value).await
    }

    async fn update_fields(&self, id: &str, patch: &DestinationPatch) -> OrchestratorResult<Destination> {
        let _guard = self.write_lock.lock().await;
        let mut destination = parse_record(self.read_value(id).await?)?;
        patch.apply(&mut destination);
        self.write_value(id, &serde_json::to_value(&destination)?).await?;
        Ok(destination)
    }

    async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let path = self.record_path(id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::info!("[Registry] Deleted destination record {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(id)),
            Err(e) => Err(OrchestratorError::Storage(format!("Failed to delete destination: {e}"))),
        }
    }

    async fn scan(&self) -> OrchestratorResult<Vec<Destination>> {
        let mut destinations = Vec::new();
        for value in self.read_all().await? {
            match parse_record(value) {
                Ok(destination) => destinations.push(destination),
                Err(e) => log::warn!("[Registry] Skipping malformed record: {}", e),
            }
        }
        destinations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(destinations)
    }

    async fn scan_raw(&self) -> OrchestratorResult<Vec<Value>> {
        self.read_all().await
    }

    fn backend_name(&self) -> &'static str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DestinationStatus, Platform};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_registry_persists_records() {
        let dir = TempDir::new().unwrap();
        let registry = JsonFileRegistry::new(dir.path()).unwrap();
        let destination = Destination::new("Main", Platform::Youtube);

        registry.put(&destination).await.unwrap();
        let loaded = registry.get(&destination.id).await.unwrap();
        assert_eq!(loaded.name, "Main");

        let reopened = JsonFileRegistry::new(dir.path()).unwrap();
        assert_eq!(reopened.scan().await.unwrap().len(), 1);

        reopened.delete(&destination.id).await.unwrap();
        assert!(reopened.get(&destination.id).await.unwrap_err().is_not_found());
        assert!(reopened.delete(&destination.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_file_registry_rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let registry = JsonFileRegistry::new(dir.path()).unwrap();
        let err = registry.get("../config").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationFailure(_)));
    }

    #[tokio::test]
    async fn test_concurrent_patches_to_different_fields_both_land() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(JsonFileRegistry::new(dir.path()).unwrap());
        let destination = Destination::new("Main", Platform::Twitch);
        registry.put(&destination).await.unwrap();

        let status_patch = DestinationPatch::status(DestinationStatus::Streaming);
        let name_patch = DestinationPatch {
            name: Some("Renamed".to_string()),
            ..DestinationPatch::default()
        };

        let (a, b) = tokio::join!(
            registry.update_fields(&destination.id, &status_patch),
            registry.update_fields(&destination.id, &name_patch),
        );
        a.unwrap();
        b.unwrap();

        let loaded = registry.get(&destination.id).await.unwrap();
        assert_eq!(loaded.status, DestinationStatus::Streaming);
        assert_eq!(loaded.name, "Renamed");
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let registry = InMemoryRegistry::new();
        let err = registry
            .update_fields("missing", &DestinationPatch::status(DestinationStatus::Ready))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
