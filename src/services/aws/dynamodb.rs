// DynamoDB Registry
// Destination records as items keyed by `id`, with typed patches as update expressions

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

use super::service_error;
use crate::models::{Destination, DestinationPatch};
use crate::services::{validate_record_id, OrchestratorError, OrchestratorResult, ResourceRegistry};

type Item = HashMap<String, AttributeValue>;

pub struct DynamoRegistry {
    client: Client,
    table: String,
}

impl DynamoRegistry {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn key(id: &str) -> (String, AttributeValue) {
        ("id".to_string(), AttributeValue::S(id.to_string()))
    }

    async fn scan_items(&self) -> OrchestratorResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(&self.table)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(service_error)?;
            items.extend(output.items().iter().cloned());
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok(items)
    }
}

fn not_found(id: &str) -> OrchestratorError {
    OrchestratorError::NotFound(format!("Destination '{id}' not found"))
}

/// Map a conditional-check failure onto `NotFound`
fn missing_or(id: &str, err: crate::services::ServiceError) -> OrchestratorError {
    if err.is_conflict() {
        not_found(id)
    } else {
        err.into()
    }
}

fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => {
            AttributeValue::M(map.iter().map(|(k, v)| (k.clone(), to_attribute(v))).collect())
        }
    }
}

fn from_attribute(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => n
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| n.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number))
            .unwrap_or(Value::Null),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::L(values) => Value::Array(values.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => from_item(map),
        _ => Value::Null,
    }
}

fn to_item(value: &Value) -> Item {
    match value {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), to_attribute(v)))
            .collect(),
        _ => Item::new(),
    }
}

fn from_item(item: &Item) -> Value {
    let map: Map<String, Value> = item.iter().map(|(k, v)| (k.clone(), from_attribute(v))).collect();
    Value::Object(map)
}

/// Split a patch into SET assignments and REMOVE targets
pub(crate) fn patch_assignments(patch: &DestinationPatch) -> OrchestratorResult<(Vec<(&'static str, Value)>, Vec<&'static str>)> {
    fn string(value: &str) -> Value {
        Value::String(value.to_string())
    }

    let mut set: Vec<(&'static str, Value)> = Vec::new();
    let mut remove: Vec<&'static str> = Vec::new();

    if let Some(v) = &patch.name {
        set.push(("name", string(v)));
    }
    if let Some(v) = &patch.rtmp_url {
        set.push(("rtmp_url", string(v)));
    }
    if let Some(v) = &patch.stream_key_param {
        set.push(("stream_key_param", string(v)));
    }
    if let Some(v) = &patch.preset_id {
        set.push(("preset_id", string(v)));
    }
    if let Some(v) = patch.enabled {
        set.push(("enabled", Value::Bool(v)));
    }
    if let Some(v) = patch.status {
        set.push(("status", string(v.as_str())));
    }
    if let Some(v) = &patch.channel_id {
        set.push(("channel_id", string(v)));
    }
    if let Some(v) = &patch.channel_arn {
        set.push(("channel_arn", string(v)));
    }
    if let Some(v) = &patch.input_id {
        set.push(("input_id", string(v)));
    }
    if let Some(v) = &patch.flow_output_arn {
        set.push(("flow_output_arn", string(v)));
    }
    match &patch.last_error {
        Some(Some(message)) => set.push(("last_error", string(message))),
        Some(None) => remove.push("last_error"),
        None => {}
    }
    if let Some(v) = patch.last_sync {
        set.push(("last_sync", serde_json::to_value(v)?));
    }
    set.push(("updated_at", serde_json::to_value(chrono::Utc::now())?));

    Ok((set, remove))
}

#[async_trait]
impl ResourceRegistry for DynamoRegistry {
    async fn get(&self, id: &str) -> OrchestratorResult<Destination> {
        let (key, value) = Self::key(id);
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(key, value)
            .consistent_read(true)
            .send()
            .await
            .map_err(service_error)?;
        let item = output.item().ok_or_else(|| not_found(id))?;
        Ok(serde_json::from_value(from_item(item))?)
    }

    async fn put(&self, destination: &Destination) -> OrchestratorResult<()> {
        validate_record_id(&destination.id)?;
        let value = serde_json::to_value(destination)?;
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(&value)))
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn update_fields(&self, id: &str, patch: &DestinationPatch) -> OrchestratorResult<Destination> {
        let (set, remove) = patch_assignments(patch)?;

        let mut names = HashMap::from([("#id".to_string(), "id".to_string())]);
        let mut values = HashMap::new();
        let mut assignments = Vec::new();
        for (index, (field, value)) in set.iter().enumerate() {
            names.insert(format!("#f{index}"), field.to_string());
            values.insert(format!(":v{index}"), to_attribute(value));
            assignments.push(format!("#f{index} = :v{index}"));
        }
        let mut expression = format!("SET {}", assignments.join(", "));
        if !remove.is_empty() {
            let targets: Vec<String> = remove
                .iter()
                .enumerate()
                .map(|(index, field)| {
                    names.insert(format!("#r{index}"), field.to_string());
                    format!("#r{index}")
                })
                .collect();
            expression.push_str(&format!(" REMOVE {}", targets.join(", ")));
        }

        let (key, key_value) = Self::key(id);
        let output = self
            .client
            .update_item()
            .table_name(&self.table)
            .key(key, key_value)
            .update_expression(expression)
            .condition_expression("attribute_exists(#id)")
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| missing_or(id, service_error(e)))?;

        let attributes = output
            .attributes()
            .ok_or_else(|| OrchestratorError::Storage(format!("Update of '{id}' returned no attributes")))?;
        Ok(serde_json::from_value(from_item(attributes))?)
    }

    async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let (key, value) = Self::key(id);
        self.client
            .delete_item()
            .table_name(&self.table)
            .key(key, value)
            .condition_expression("attribute_exists(id)")
            .send()
            .await
            .map_err(|e| missing_or(id, service_error(e)))?;
        log::info!("[Registry] Deleted destination record {}", id);
        Ok(())
    }

    async fn scan(&self) -> OrchestratorResult<Vec<Destination>> {
        let mut destinations = Vec::new();
        for item in self.scan_items().await? {
            match serde_json::from_value::<Destination>(from_item(&item)) {
                Ok(destination) => destinations.push(destination),
                Err(e) => log::warn!("[Registry] Skipping malformed item: {}", e),
            }
        }
        destinations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(destinations)
    }

    async fn scan_raw(&self) -> OrchestratorResult<Vec<Value>> {
        Ok(self.scan_items().await?.iter().map(from_item).collect())
    }

    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DestinationStatus;

    #[test]
    fn test_cleared_error_becomes_remove() {
        let (set, remove) = patch_assignments(&DestinationPatch::synced(DestinationStatus::Ready)).unwrap();
        let fields: Vec<&str> = set.iter().map(|(field, _)| *field).collect();
        assert_eq!(fields, vec!["status", "last_sync", "updated_at"]);
        assert_eq!(remove, vec!["last_error"]);
    }

    #[test]
    fn test_item_conversion_drops_nulls() {
        let value = serde_json::json!({"id": "a", "enabled": true, "last_error": null, "n": 3});
        let item = to_item(&value);
        assert!(!item.contains_key("last_error"));
        assert_eq!(from_item(&item), serde_json::json!({"id": "a", "enabled": true, "n": 3}));
    }
}
