//! Hierarchical parameter store access.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ssm::Client;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::types::{ParameterStringFilter, ParameterType};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::aws::SdkText;
use crate::error::{DeployError, Result, SecretError};

use super::entry::{SecretEntry, SecretType, StoredSecret};

/// Largest batch the store accepts in one delete call.
pub const MAX_DELETE_BATCH: usize = 10;

/// Operations the synchronizer needs from the parameter store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Reads one decrypted parameter, or `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<StoredSecret>>;

    /// Lists every parameter under `prefix`, recursively, decrypted and with
    /// descriptions.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredSecret>>;

    /// Writes a parameter, overwriting any existing value.
    async fn put(&self, entry: &SecretEntry) -> Result<()>;

    /// Deletes up to [`MAX_DELETE_BATCH`] parameters and returns the paths
    /// the store reported as invalid.
    async fn delete(&self, paths: &[String]) -> Result<Vec<String>>;
}

/// AWS Systems Manager Parameter Store.
#[derive(Debug, Clone)]
pub struct SsmSecretStore {
    client: Client,
}

impl SsmSecretStore {
    /// Creates a store with an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a store from shared SDK configuration.
    #[must_use]
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(Client::new(config))
    }

    async fn descriptions(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let filter = ParameterStringFilter::builder()
            .key("Path")
            .option("Recursive")
            .values(prefix)
            .build()
            .map_err(|e| SecretError::store(e.to_string()))?;

        let mut descriptions = BTreeMap::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_parameters()
                .parameter_filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| store_error("DescribeParameters", e))?;

            for metadata in output.parameters() {
                if let (Some(name), Some(description)) = (metadata.name(), metadata.description()) {
                    descriptions.insert(name.to_string(), description.to_string());
                }
            }

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(descriptions)
    }
}

fn store_error(operation: &str, err: impl std::error::Error) -> DeployError {
    SecretError::store(format!("{operation} failed: {}", DisplayErrorContext(err))).into()
}

fn secret_type(kind: Option<&ParameterType>) -> SecretType {
    SecretType::parse(&kind.text()).unwrap_or_default()
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn get(&self, path: &str) -> Result<Option<StoredSecret>> {
        let output = match self
            .client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_parameter_not_found()) {
                    debug!("Parameter {path} not found");
                    return Ok(None);
                }
                return Err(store_error("GetParameter", err));
            }
        };

        Ok(output.parameter().map(|p| StoredSecret {
            path: p.name().text(),
            value: p.value().text(),
            kind: secret_type(p.r#type()),
            description: None,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredSecret>> {
        let mut secrets = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .get_parameters_by_path()
                .path(prefix)
                .recursive(true)
                .with_decryption(true)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| store_error("GetParametersByPath", e))?;

            secrets.extend(output.parameters().iter().map(|p| StoredSecret {
                path: p.name().text(),
                value: p.value().text(),
                kind: secret_type(p.r#type()),
                description: None,
            }));

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        if !secrets.is_empty() {
            let descriptions = self.descriptions(prefix).await?;
            for secret in &mut secrets {
                secret.description = descriptions.get(&secret.path).cloned();
            }
        }

        debug!("Found {} parameters under {prefix}", secrets.len());
        Ok(secrets)
    }

    async fn put(&self, entry: &SecretEntry) -> Result<()> {
        self.client
            .put_parameter()
            .name(&entry.path)
            .value(&entry.value)
            .r#type(ParameterType::from(entry.kind.as_str()))
            .set_description(entry.description.clone())
            .overwrite(true)
            .send()
            .await
            .map_err(|e| store_error("PutParameter", e))?;
        Ok(())
    }

    async fn delete(&self, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        if paths.len() > MAX_DELETE_BATCH {
            return Err(DeployError::internal(format!(
                "cannot delete more than {MAX_DELETE_BATCH} parameters at once"
            )));
        }

        info!("Deleting {} parameters", paths.len());
        let output = self
            .client
            .delete_parameters()
            .set_names(Some(paths.to_vec()))
            .send()
            .await
            .map_err(|e| store_error("DeleteParameters", e))?;

        Ok(output.invalid_parameters().to_vec())
    }
}
