//! Configured volatile parameter sources.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aws::SdkNumber;
use crate::config::VolatileParameterConfig;
use crate::engine::OrchestrationEngine;
use crate::error::{ParameterError, Result};
use crate::parameters::{ParameterMap, VolatileParameters};

/// Reads the live desired capacity of an auto scaling group.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapacityReader: Send + Sync {
    /// Returns the desired capacity, or `None` if the group does not exist.
    async fn desired_capacity(&self, group_name: &str) -> Result<Option<i32>>;
}

/// Reads capacities from the Auto Scaling API.
#[derive(Debug, Clone)]
pub struct AutoScalingCapacity {
    client: aws_sdk_autoscaling::Client,
}

impl AutoScalingCapacity {
    /// Creates the reader from shared SDK configuration.
    #[must_use]
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

#[async_trait]
impl CapacityReader for AutoScalingCapacity {
    async fn desired_capacity(&self, group_name: &str) -> Result<Option<i32>> {
        let output = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group_name)
            .send()
            .await
            .map_err(|e| ParameterError::VolatileResolution {
                key: group_name.to_string(),
                reason: DisplayErrorContext(e).to_string(),
            })?;

        Ok(output
            .auto_scaling_groups()
            .first()
            .and_then(|group| group.desired_capacity().number()))
    }
}

/// Resolves the volatile parameters a stack declares in configuration.
pub struct ConfiguredVolatileParameters {
    entries: Vec<VolatileParameterConfig>,
    stack_names: BTreeMap<String, String>,
    engine: Arc<dyn OrchestrationEngine>,
    capacity: Arc<dyn CapacityReader>,
}

impl std::fmt::Debug for ConfiguredVolatileParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredVolatileParameters")
            .field("entries", &self.entries)
            .field("stack_names", &self.stack_names)
            .finish_non_exhaustive()
    }
}

impl ConfiguredVolatileParameters {
    /// Creates a resolver. `stack_names` maps stack ids in the deployment to
    /// their deployed names, for output lookups.
    #[must_use]
    pub fn new(
        entries: Vec<VolatileParameterConfig>,
        stack_names: BTreeMap<String, String>,
        engine: Arc<dyn OrchestrationEngine>,
        capacity: Arc<dyn CapacityReader>,
    ) -> Self {
        Self {
            entries,
            stack_names,
            engine,
            capacity,
        }
    }

    async fn desired_capacity(&self, stack_name: &str, parameter: &str, logical_id: &str) -> Result<Option<String>> {
        let resources = self.engine.stack_resources(stack_name).await?;
        let Some(group) = resources
            .iter()
            .find(|r| r.logical_resource_id == logical_id)
            .and_then(|r| r.physical_resource_id.as_deref())
        else {
            warn!("{stack_name} has no resource {logical_id}; leaving {parameter} unchanged");
            return Ok(None);
        };

        let capacity = self.capacity.desired_capacity(group).await?;
        if capacity.is_none() {
            warn!("Auto scaling group {group} not found; leaving {parameter} unchanged");
        }
        Ok(capacity.map(|c| c.to_string()))
    }

    async fn stack_output(&self, parameter: &str, stack_id: &str, output: &str) -> Result<String> {
        let unresolved = |reason: String| ParameterError::VolatileResolution {
            key: parameter.to_string(),
            reason,
        };

        let stack_name = self
            .stack_names
            .get(stack_id)
            .ok_or_else(|| unresolved(format!("unknown stack '{stack_id}'")))?;

        let description = self
            .engine
            .describe_stack(stack_name)
            .await?
            .ok_or_else(|| unresolved(format!("stack {stack_name} does not exist")))?;

        description
            .outputs
            .get(output)
            .cloned()
            .ok_or_else(|| unresolved(format!("stack {stack_name} has no output {output}")).into())
    }
}

#[async_trait]
impl VolatileParameters for ConfiguredVolatileParameters {
    async fn resolve(&self, stack_name: &str, region: &str) -> Result<ParameterMap> {
        let mut values = ParameterMap::new();

        for entry in &self.entries {
            let value = match entry {
                VolatileParameterConfig::DesiredCapacity {
                    parameter,
                    logical_resource_id,
                } => {
                    self.desired_capacity(stack_name, parameter, logical_resource_id)
                        .await?
                }
                VolatileParameterConfig::StackOutput {
                    parameter,
                    stack,
                    output,
                } => Some(self.stack_output(parameter, stack, output).await?),
            };

            if let Some(value) = value {
                debug!("Volatile {} = {value} ({region})", entry.parameter());
                values.insert(entry.parameter().to_string(), Some(value));
            }
        }

        Ok(values)
    }
}
