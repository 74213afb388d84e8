//! Propagates stack tags to resources the engine does not tag itself.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::StackResource;
use crate::error::Result;
use crate::wait::Sleeper;

use super::tag::{Tag, missing_tags};

/// Resource types whose tags are reconciled.
pub const SUPPORTED_TYPES: &[&str] = &[
    "AWS::CloudWatch::Alarm",
    "AWS::Events::Rule",
    "AWS::AutoScaling::AutoScalingGroup",
];

/// A single resource whose tags can be read and written.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaggableResource: Send + Sync {
    /// Returns a human readable identifier for logs.
    fn identifier(&self) -> String;

    /// Returns the tags the resource currently carries.
    async fn tags(&self) -> Result<Vec<Tag>>;

    /// Adds or overwrites the given tags.
    async fn apply_tags(&self, tags: &[Tag]) -> Result<()>;
}

/// Resolves stack resources to taggable handles.
#[cfg_attr(test, mockall::automock)]
pub trait ResourceTagging: Send + Sync {
    /// Returns a handle for the resource, or `None` if its type is not
    /// supported or it has no physical id yet.
    fn resource(&self, resource: &StackResource) -> Option<Box<dyn TaggableResource>>;
}

/// What happened to the resources of one stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagReconcileReport {
    /// Resources that received new tags.
    pub tagged: Vec<String>,
    /// Resources that already carried every tag.
    pub unchanged: Vec<String>,
    /// Resources that could not be tagged, with the reason.
    pub failed: Vec<(String, String)>,
}

impl TagReconcileReport {
    /// Returns true if no resource failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies the desired tags to every supported resource of a stack.
///
/// Throttled calls are retried after `attempt²` seconds for as long as the
/// total sleep stays within the retry budget. Failures are logged and
/// reported, never raised.
pub struct TagReconciler {
    tagging: Arc<dyn ResourceTagging>,
    sleeper: Arc<dyn Sleeper>,
    retry_budget: Duration,
}

impl std::fmt::Debug for TagReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagReconciler")
            .field("retry_budget", &self.retry_budget)
            .finish_non_exhaustive()
    }
}

impl TagReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(tagging: Arc<dyn ResourceTagging>, sleeper: Arc<dyn Sleeper>, retry_budget: Duration) -> Self {
        Self {
            tagging,
            sleeper,
            retry_budget,
        }
    }

    /// Reconciles tags on the given stack resources.
    pub async fn reconcile(&self, resources: &[StackResource], desired: &[Tag]) -> TagReconcileReport {
        let mut report = TagReconcileReport::default();

        if desired.is_empty() {
            return report;
        }

        for resource in resources {
            if !SUPPORTED_TYPES.contains(&resource.resource_type.as_str()) {
                continue;
            }
            let Some(handle) = self.tagging.resource(resource) else {
                debug!(
                    "Skipping {} ({}): no physical id",
                    resource.logical_resource_id, resource.resource_type
                );
                continue;
            };

            let identifier = handle.identifier();
            match self.reconcile_one(handle.as_ref(), desired).await {
                Ok(true) => {
                    info!("Tagged {identifier}");
                    report.tagged.push(identifier);
                }
                Ok(false) => {
                    debug!("Tags already up to date on {identifier}");
                    report.unchanged.push(identifier);
                }
                Err(e) => {
                    warn!("Failed to tag {identifier}: {e}");
                    report.failed.push((identifier, e.to_string()));
                }
            }
        }

        report
    }

    async fn reconcile_one(&self, resource: &dyn TaggableResource, desired: &[Tag]) -> Result<bool> {
        let present = self.with_retry(|| resource.tags()).await?;
        let missing = missing_tags(desired, &present);

        if missing.is_empty() {
            return Ok(false);
        }

        self.with_retry(|| resource.apply_tags(&missing)).await?;
        Ok(true)
    }

    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u64 = 0;
        let mut slept = Duration::ZERO;

        loop {
            match call().await {
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let delay = Duration::from_secs(attempt.saturating_mul(attempt));
                    if slept + delay > self.retry_budget {
                        return Err(e);
                    }
                    debug!("Throttled, retrying in {}s", delay.as_secs());
                    self.sleeper.sleep(delay).await;
                    slept += delay;
                }
                other => return other,
            }
        }
    }
}
