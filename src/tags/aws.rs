//! AWS implementations of taggable resources.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use tracing::debug;

use crate::aws::{SdkText, is_throttling};
use crate::engine::StackResource;
use crate::error::{DeployError, Result, TagError};

use super::reconciler::{ResourceTagging, TaggableResource};
use super::tag::Tag;

/// Builds taggable handles for CloudWatch alarms, EventBridge rules and
/// auto scaling groups.
#[derive(Debug, Clone)]
pub struct AwsResourceTagging {
    cloudwatch: aws_sdk_cloudwatch::Client,
    events: aws_sdk_eventbridge::Client,
    autoscaling: aws_sdk_autoscaling::Client,
}

impl AwsResourceTagging {
    /// Creates the service clients from shared SDK configuration.
    #[must_use]
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            cloudwatch: aws_sdk_cloudwatch::Client::new(config),
            events: aws_sdk_eventbridge::Client::new(config),
            autoscaling: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

impl ResourceTagging for AwsResourceTagging {
    fn resource(&self, resource: &StackResource) -> Option<Box<dyn TaggableResource>> {
        let physical_id = resource.physical_resource_id.clone()?;

        match resource.resource_type.as_str() {
            "AWS::CloudWatch::Alarm" => Some(Box::new(Alarm {
                client: self.cloudwatch.clone(),
                name: physical_id,
            })),
            "AWS::Events::Rule" => Some(Box::new(EventRule {
                client: self.events.clone(),
                physical_id,
            })),
            "AWS::AutoScaling::AutoScalingGroup" => Some(Box::new(AutoScalingGroup {
                client: self.autoscaling.clone(),
                name: physical_id,
            })),
            _ => None,
        }
    }
}

fn tag_error<E>(resource: &str, err: &aws_sdk_cloudformation::error::SdkError<E>) -> DeployError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let throttled = is_throttling(err.as_service_error().and_then(|e| e.code()));
    if throttled {
        return TagError::Throttled {
            resource: resource.to_string(),
        }
        .into();
    }
    TagError::ApiRequestFailed {
        resource: resource.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
    .into()
}

fn build_error(resource: &str, err: impl std::fmt::Display) -> DeployError {
    TagError::ApiRequestFailed {
        resource: resource.to_string(),
        message: err.to_string(),
    }
    .into()
}

fn collect_tags<'a>(pairs: impl Iterator<Item = (String, String)> + 'a) -> Vec<Tag> {
    pairs
        .filter_map(|(key, value)| match Tag::new(key, value) {
            Ok(tag) => Some(tag),
            Err(e) => {
                debug!("Ignoring existing tag: {e}");
                None
            }
        })
        .collect()
}

struct Alarm {
    client: aws_sdk_cloudwatch::Client,
    name: String,
}

impl Alarm {
    async fn arn(&self) -> Result<String> {
        let id = self.identifier();
        let output = self
            .client
            .describe_alarms()
            .alarm_names(&self.name)
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;

        output
            .metric_alarms()
            .iter()
            .find_map(|a| a.alarm_arn().map(str::to_string))
            .or_else(|| {
                output
                    .composite_alarms()
                    .iter()
                    .find_map(|a| a.alarm_arn().map(str::to_string))
            })
            .ok_or_else(|| build_error(&id, "alarm not found"))
    }
}

#[async_trait]
impl TaggableResource for Alarm {
    fn identifier(&self) -> String {
        format!("alarm {}", self.name)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let id = self.identifier();
        let arn = self.arn().await?;
        let output = self
            .client
            .list_tags_for_resource()
            .resource_arn(arn)
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;

        Ok(collect_tags(
            output.tags().iter().map(|t| (t.key().text(), t.value().text())),
        ))
    }

    async fn apply_tags(&self, tags: &[Tag]) -> Result<()> {
        let id = self.identifier();
        let arn = self.arn().await?;
        let tags = tags
            .iter()
            .map(|t| {
                aws_sdk_cloudwatch::types::Tag::builder()
                    .key(t.key())
                    .value(t.value())
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;
        Ok(())
    }
}

struct EventRule {
    client: aws_sdk_eventbridge::Client,
    physical_id: String,
}

impl EventRule {
    /// Rules on a custom bus have the physical id `bus|rule`.
    fn bus_and_name(&self) -> (Option<&str>, &str) {
        match self.physical_id.split_once('|') {
            Some((bus, name)) => (Some(bus), name),
            None => (None, self.physical_id.as_str()),
        }
    }

    async fn arn(&self) -> Result<String> {
        let id = self.identifier();
        let (bus, name) = self.bus_and_name();
        let output = self
            .client
            .describe_rule()
            .name(name)
            .set_event_bus_name(bus.map(str::to_string))
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;

        output
            .arn()
            .map(str::to_string)
            .ok_or_else(|| build_error(&id, "rule has no ARN"))
    }
}

#[async_trait]
impl TaggableResource for EventRule {
    fn identifier(&self) -> String {
        format!("rule {}", self.physical_id)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let id = self.identifier();
        let arn = self.arn().await?;
        let output = self
            .client
            .list_tags_for_resource()
            .resource_arn(arn)
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;

        Ok(collect_tags(
            output.tags().iter().map(|t| (t.key().text(), t.value().text())),
        ))
    }

    async fn apply_tags(&self, tags: &[Tag]) -> Result<()> {
        let id = self.identifier();
        let arn = self.arn().await?;
        let tags = tags
            .iter()
            .map(|t| {
                aws_sdk_eventbridge::types::Tag::builder()
                    .key(t.key())
                    .value(t.value())
                    .build()
                    .map_err(|e| build_error(&id, e))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;
        Ok(())
    }
}

struct AutoScalingGroup {
    client: aws_sdk_autoscaling::Client,
    name: String,
}

#[async_trait]
impl TaggableResource for AutoScalingGroup {
    fn identifier(&self) -> String {
        format!("auto scaling group {}", self.name)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let id = self.identifier();
        let output = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(&self.name)
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;

        let group = output
            .auto_scaling_groups()
            .first()
            .ok_or_else(|| build_error(&id, "group not found"))?;

        Ok(collect_tags(
            group.tags().iter().map(|t| (t.key().text(), t.value().text())),
        ))
    }

    async fn apply_tags(&self, tags: &[Tag]) -> Result<()> {
        let id = self.identifier();
        let tags = tags
            .iter()
            .map(|t| {
                aws_sdk_autoscaling::types::Tag::builder()
                    .resource_id(&self.name)
                    .resource_type("auto-scaling-group")
                    .key(t.key())
                    .value(t.value())
                    .propagate_at_launch(true)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .create_or_update_tags()
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| tag_error(&id, &e))?;
        Ok(())
    }
}
