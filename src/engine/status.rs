//! Stack status classification and reporting.

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Result;

use super::client::OrchestrationEngine;
use super::types::{StackEvent, StackPhase, StackStatus};

/// Reason text the engine gives the event that starts a user operation.
pub(crate) const USER_INITIATED: &str = "User Initiated";

/// Returns the failed events since the most recent user-initiated event.
///
/// `events` must be ordered newest first. Only events whose status contains
/// `FAILED` and that carry a reason are kept.
#[must_use]
pub fn failed_events_since_last_user_event(events: &[StackEvent]) -> Vec<StackEvent> {
    let mut failed = Vec::new();

    for event in events {
        let reason = event.resource_status_reason.as_deref();
        if reason.is_some_and(|r| r.contains(USER_INITIATED)) {
            break;
        }
        let is_failure = event
            .resource_status
            .as_deref()
            .is_some_and(|s| s.contains("FAILED"));
        if is_failure && reason.is_some_and(|r| !r.is_empty()) {
            failed.push(event.clone());
        }
    }

    failed
}

/// Formats a failed event as `LogicalId: reason`.
#[must_use]
pub fn describe_event(event: &StackEvent) -> String {
    format!(
        "{}: {}",
        event.logical_resource_id.as_deref().unwrap_or("unknown"),
        event.resource_status_reason.as_deref().unwrap_or_default()
    )
}

/// Snapshot of a stack's status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Stack name.
    pub stack_name: String,
    /// Raw status.
    pub status: StackStatus,
    /// Coarse phase, if the status is known.
    pub phase: Option<StackPhase>,
    /// Failed events since the last user-initiated event.
    pub failed_events: Vec<StackEvent>,
}

impl StatusReport {
    /// Returns true if the stack exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.status.exists()
    }

    /// Returns true if the stack is in a failure status.
    #[must_use]
    pub const fn failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Returns true if the stack is being created.
    #[must_use]
    pub fn creating(&self) -> bool {
        self.phase == Some(StackPhase::Creating)
    }

    /// Returns true if the stack is being updated.
    #[must_use]
    pub fn updating(&self) -> bool {
        self.phase == Some(StackPhase::Updating)
    }

    /// Returns true if the stack is being deleted.
    #[must_use]
    pub fn deleting(&self) -> bool {
        self.phase == Some(StackPhase::Deleting)
    }

    /// Renders the report as JSON. Failed events are included only for a
    /// failed stack.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = serde_json::json!({
            "stack_name": self.stack_name,
            "status": self.status.as_str(),
        });
        if self.failed()
            && let Some(object) = json.as_object_mut()
        {
            object.insert(
                String::from("failed_events"),
                self.failed_events.iter().map(describe_event).collect(),
            );
        }
        json
    }
}

/// Reads a stack's status, caching the answer briefly so repeated reads
/// within one operation do not hit the engine.
pub struct StatusReader {
    engine: Arc<dyn OrchestrationEngine>,
    stack_name: String,
    ttl: Duration,
    cached: Mutex<Option<(Instant, StackStatus)>>,
}

impl std::fmt::Debug for StatusReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReader")
            .field("stack_name", &self.stack_name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl StatusReader {
    /// Creates a status reader.
    #[must_use]
    pub fn new(engine: Arc<dyn OrchestrationEngine>, stack_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            engine,
            stack_name: stack_name.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Returns the stack name.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Returns the status, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn status(&self) -> Result<StackStatus> {
        if let Some(status) = self.cached_status() {
            return Ok(status);
        }
        self.refresh().await
    }

    /// Fetches the status from the engine and caches it.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn refresh(&self) -> Result<StackStatus> {
        let status = self.engine.stack_status(&self.stack_name).await?;
        debug!("Stack {} status: {status}", self.stack_name);
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some((Instant::now(), status.clone()));
        }
        Ok(status)
    }

    /// Drops any cached status.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn cached_status(&self) -> Option<StackStatus> {
        let cached = self.cached.lock().ok()?;
        cached
            .as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, status)| status.clone())
    }

    /// Returns the failed events since the last user-initiated event.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn failed_events(&self) -> Result<Vec<StackEvent>> {
        let events = self.engine.stack_events(&self.stack_name).await?;
        Ok(failed_events_since_last_user_event(&events))
    }

    /// Builds a full status report. Events are only fetched for stacks that
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an engine call fails.
    pub async fn report(&self) -> Result<StatusReport> {
        let status = self.status().await?;
        let failed_events = if status.exists() {
            self.failed_events().await?
        } else {
            Vec::new()
        };

        Ok(StatusReport {
            stack_name: self.stack_name.clone(),
            phase: status.phase(),
            status,
            failed_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::client::MockOrchestrationEngine;

    fn event(status: &str, reason: Option<&str>) -> StackEvent {
        StackEvent {
            logical_resource_id: Some(String::from("Resource")),
            resource_type: Some(String::from("AWS::S3::Bucket")),
            resource_status: Some(status.to_string()),
            resource_status_reason: reason.map(str::to_string),
            timestamp: None,
        }
    }

    #[test]
    fn test_failed_events_stop_at_user_event() {
        let events = vec![
            event("UPDATE_ROLLBACK_IN_PROGRESS", Some("The following resource(s) failed")),
            event("UPDATE_FAILED", Some("Bucket exists")),
            event("UPDATE_FAILED", None),
            event("UPDATE_IN_PROGRESS", Some("User Initiated")),
            event("CREATE_FAILED", Some("old failure")),
        ];

        let failed = failed_events_since_last_user_event(&events);
        assert_eq!(failed.len(), 1);
        assert_eq!(describe_event(&failed[0]), "Resource: Bucket exists");
    }

    #[tokio::test]
    async fn test_status_is_cached_until_invalidated() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_stack_status()
            .times(2)
            .returning(|_| Ok(StackStatus::UpdateComplete));

        let reader = StatusReader::new(Arc::new(engine), "qa-app-web", Duration::from_secs(60));
        assert_eq!(reader.status().await.expect("status"), StackStatus::UpdateComplete);
        assert_eq!(reader.status().await.expect("status"), StackStatus::UpdateComplete);
        reader.invalidate();
        assert_eq!(reader.status().await.expect("status"), StackStatus::UpdateComplete);
    }

    #[tokio::test]
    async fn test_report_for_missing_stack_skips_events() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_stack_status()
            .returning(|_| Ok(StackStatus::DoesNotExist));
        engine.expect_stack_events().never();

        let reader = StatusReader::new(Arc::new(engine), "qa-app-web", Duration::ZERO);
        let report = reader.report().await.expect("report");
        assert!(!report.exists());
        assert_eq!(report.phase, Some(StackPhase::Absent));
        assert_eq!(report.to_json()["status"], "DOES_NOT_EXIST");
    }

    #[test]
    fn test_json_lists_events_only_when_failed() {
        let rolled_back = StatusReport {
            stack_name: String::from("qa-app-web"),
            status: StackStatus::UpdateRollbackComplete,
            phase: StackStatus::UpdateRollbackComplete.phase(),
            failed_events: vec![event("UPDATE_FAILED", Some("Bucket exists"))],
        };
        assert!(!rolled_back.failed());
        assert!(rolled_back.to_json().get("failed_events").is_none());

        let failed = StatusReport {
            status: StackStatus::RollbackComplete,
            phase: StackStatus::RollbackComplete.phase(),
            ..rolled_back
        };
        assert!(failed.failed());
        assert_eq!(failed.to_json()["failed_events"][0], "Resource: Bucket exists");
    }
}
