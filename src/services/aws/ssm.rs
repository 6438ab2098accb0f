// SSM Secret Store
// Stream keys as SecureString parameters

use async_trait::async_trait;
use aws_sdk_ssm::types::ParameterType;
use aws_sdk_ssm::Client;

use super::service_error;
use crate::services::{OrchestratorError, OrchestratorResult, SecretStore};

pub struct SsmSecretStore {
    client: Client,
}

impl SsmSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn put(&self, name: &str, value: &str) -> OrchestratorResult<()> {
        self.client
            .put_parameter()
            .name(name)
            .value(value)
            .r#type(ParameterType::SecureString)
            .overwrite(true)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[Secrets] Stored parameter {}", name);
        Ok(())
    }

    async fn get(&self, name: &str) -> OrchestratorResult<String> {
        let output = self
            .client
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(service_error)?;
        output
            .parameter()
            .and_then(|parameter| parameter.value())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::NotFound(format!("Secret '{name}' has no value")))
    }

    async fn delete(&self, name: &str) -> OrchestratorResult<()> {
        self.client
            .delete_parameter()
            .name(name)
            .send()
            .await
            .map_err(service_error)?;
        log::info!("[Secrets] Deleted parameter {}", name);
        Ok(())
    }
}
