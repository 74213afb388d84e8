//! CloudFormation implementation of the engine interface.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudformation::types::{
    Capability as CfnCapability, Change, ChangeSetType, Parameter, Tag as CfnTag,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::aws::{SdkText, SdkTime};
use crate::error::{DeployError, EngineError, Result};
use crate::parameters::{ParameterSet, ParameterValue};
use crate::tags::Tag;

use super::client::OrchestrationEngine;
use super::status::USER_INITIATED;
use super::types::{
    Capability, ChangeCause, ChangeSetDescription, ChangeSetRequest, ChangeSetStatus,
    CreateStackRequest, ResourceChange, StackDescription, StackEvent, StackResource, StackStatus,
    TemplateLocation,
};

/// Orchestration engine backed by AWS CloudFormation.
#[derive(Debug, Clone)]
pub struct CloudFormationEngine {
    /// CloudFormation client.
    client: Client,
}

impl CloudFormationEngine {
    /// Creates an engine with an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates an engine from shared SDK configuration.
    #[must_use]
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self::new(Client::new(config))
    }
}

fn api_error(operation: &str, err: impl std::error::Error) -> DeployError {
    EngineError::api(operation, DisplayErrorContext(err).to_string()).into()
}

fn is_missing_stack(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.contains("does not exist"))
}

fn to_cfn_parameters(parameters: &ParameterSet) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|(key, value)| {
            let builder = Parameter::builder().parameter_key(key);
            match value {
                ParameterValue::Literal(v) => builder.parameter_value(v).build(),
                ParameterValue::UsePrevious => builder.use_previous_value(true).build(),
            }
        })
        .collect()
}

fn from_cfn_parameters(parameters: &[Parameter]) -> ParameterSet {
    parameters
        .iter()
        .filter_map(|p| {
            let key = p.parameter_key()?.to_string();
            let value = if p.use_previous_value() == Some(true) {
                ParameterValue::UsePrevious
            } else {
                ParameterValue::Literal(p.parameter_value().unwrap_or_default().to_string())
            };
            Some((key, value))
        })
        .collect()
}

fn to_cfn_tags(tags: &[Tag]) -> Vec<CfnTag> {
    tags.iter()
        .map(|tag| CfnTag::builder().key(tag.key()).value(tag.value()).build())
        .collect()
}

fn to_cfn_capabilities(capabilities: &[Capability]) -> Vec<CfnCapability> {
    capabilities
        .iter()
        .map(|c| CfnCapability::from(c.as_str()))
        .collect()
}

fn convert_change(change: &Change) -> Option<ResourceChange> {
    let rc = change.resource_change()?;
    Some(ResourceChange {
        action: rc.action().text(),
        logical_resource_id: rc.logical_resource_id().unwrap_or_default().to_string(),
        resource_type: rc.resource_type().unwrap_or_default().to_string(),
        replacement: rc.replacement().map(|r| r.as_str().to_string()),
        scope: rc.scope().iter().map(|s| s.as_str().to_string()).collect(),
        causes: rc
            .details()
            .iter()
            .map(|d| ChangeCause {
                change_source: d.change_source().map(|s| s.as_str().to_string()),
                causing_entity: d.causing_entity().map(str::to_string),
            })
            .collect(),
    })
}

#[async_trait]
impl OrchestrationEngine for CloudFormationEngine {
    async fn stack_status(&self, stack_name: &str) -> Result<StackStatus> {
        Ok(self
            .describe_stack(stack_name)
            .await?
            .and_then(|d| d.status)
            .unwrap_or(StackStatus::DoesNotExist))
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        let output = match self.client.describe_stacks().stack_name(stack_name).send().await {
            Ok(output) => output,
            Err(err) => {
                if is_missing_stack(err.as_service_error().and_then(|e| e.message())) {
                    debug!("Stack {stack_name} does not exist");
                    return Ok(None);
                }
                return Err(api_error("DescribeStacks", err));
            }
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(None);
        };

        let parameters: BTreeMap<String, String> = stack
            .parameters()
            .iter()
            .filter_map(|p| {
                Some((
                    p.parameter_key()?.to_string(),
                    p.parameter_value().unwrap_or_default().to_string(),
                ))
            })
            .collect();
        let outputs: BTreeMap<String, String> = stack
            .outputs()
            .iter()
            .filter_map(|o| {
                Some((
                    o.output_key()?.to_string(),
                    o.output_value().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        let status = stack.stack_status().text();
        Ok(Some(StackDescription {
            stack_name: stack.stack_name().text(),
            stack_id: stack.stack_id().map(str::to_string),
            status: (!status.is_empty()).then(|| StackStatus::parse(&status)),
            parameters,
            outputs,
            termination_protection: stack.enable_termination_protection().unwrap_or(false),
        }))
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()> {
        info!("Creating stack {}", request.stack_name);

        let call = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(to_cfn_parameters(&request.parameters)))
            .set_capabilities(Some(to_cfn_capabilities(&request.capabilities)))
            .set_tags(Some(to_cfn_tags(&request.tags)))
            .enable_termination_protection(request.enable_termination_protection);
        let call = match &request.template {
            TemplateLocation::Url(url) => call.template_url(url),
            TemplateLocation::Body(body) => call.template_body(body),
        };

        call.send().await.map_err(|e| api_error("CreateStack", e))?;
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        info!("Deleting stack {stack_name}");
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| api_error("DeleteStack", e))?;
        Ok(())
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String> {
        debug!(
            "Creating change set {} for stack {}",
            request.change_set_name, request.stack_name
        );

        let call = self
            .client
            .create_change_set()
            .stack_name(&request.stack_name)
            .change_set_name(&request.change_set_name)
            .change_set_type(ChangeSetType::Update)
            .set_parameters(Some(to_cfn_parameters(&request.parameters)))
            .set_capabilities(Some(to_cfn_capabilities(&request.capabilities)))
            .set_tags(Some(to_cfn_tags(&request.tags)));
        let call = match &request.template {
            TemplateLocation::Url(url) => call.template_url(url),
            TemplateLocation::Body(body) => call.template_body(body),
        };

        let output = call.send().await.map_err(|e| api_error("CreateChangeSet", e))?;
        output.id().map(str::to_string).ok_or_else(|| {
            EngineError::api("CreateChangeSet", "response did not include a change set id").into()
        })
    }

    async fn describe_change_set(&self, change_set_id: &str) -> Result<ChangeSetDescription> {
        let mut description: Option<ChangeSetDescription> = None;
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_change_set()
                .change_set_name(change_set_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("DescribeChangeSet", e))?;

            let changes: Vec<ResourceChange> =
                output.changes().iter().filter_map(convert_change).collect();

            match description.as_mut() {
                Some(existing) => existing.changes.extend(changes),
                None => {
                    description = Some(ChangeSetDescription {
                        id: change_set_id.to_string(),
                        status: ChangeSetStatus::parse(&output.status().text()),
                        status_reason: output.status_reason().map(str::to_string),
                        changes,
                        parameters: from_cfn_parameters(output.parameters()),
                    });
                }
            }

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        description.ok_or_else(|| EngineError::api("DescribeChangeSet", "empty response").into())
    }

    async fn execute_change_set(&self, change_set_id: &str) -> Result<()> {
        self.client
            .execute_change_set()
            .change_set_name(change_set_id)
            .send()
            .await
            .map_err(|e| api_error("ExecuteChangeSet", e))?;
        Ok(())
    }

    async fn delete_change_set(&self, change_set_id: &str) -> Result<()> {
        self.client
            .delete_change_set()
            .change_set_name(change_set_id)
            .send()
            .await
            .map_err(|e| api_error("DeleteChangeSet", e))?;
        Ok(())
    }

    async fn stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_stack_events()
                .stack_name(stack_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("DescribeStackEvents", e))?;

            events.extend(output.stack_events().iter().map(|e| StackEvent {
                logical_resource_id: e.logical_resource_id().map(str::to_string),
                resource_type: e.resource_type().map(str::to_string),
                resource_status: e.resource_status().map(|s| s.as_str().to_string()),
                resource_status_reason: e.resource_status_reason().map(str::to_string),
                timestamp: e.timestamp().utc(),
            }));

            // Older pages predate the last user operation once it has been seen.
            let seen_user_event = events.iter().any(|e| {
                e.resource_status_reason
                    .as_deref()
                    .is_some_and(|r| r.contains(USER_INITIATED))
            });

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() || seen_user_event {
                break;
            }
        }

        Ok(events)
    }

    async fn stack_resources(&self, stack_name: &str) -> Result<Vec<StackResource>> {
        let mut resources = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_stack_resources()
                .stack_name(stack_name)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("ListStackResources", e))?;

            resources.extend(output.stack_resource_summaries().iter().map(|r| StackResource {
                logical_resource_id: r.logical_resource_id().text(),
                physical_resource_id: r.physical_resource_id().map(str::to_string),
                resource_type: r.resource_type().text(),
            }));

            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }

    async fn template_body(&self, stack_name: &str) -> Result<String> {
        let output = self
            .client
            .get_template()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| api_error("GetTemplate", e))?;

        output
            .template_body()
            .map(str::to_string)
            .ok_or_else(|| EngineError::StackNotFound {
                stack_name: stack_name.to_string(),
            }
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_cfn_tags() {
        let tags = vec![
            Tag::new("Env", "qa").expect("tag"),
            Tag::new("Project", "tutor").expect("tag"),
        ];

        let converted = to_cfn_tags(&tags);

        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0].key().text(), "Env");
        assert_eq!(converted[1].value().text(), "tutor");
    }
}
