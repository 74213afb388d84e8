//! Staging, committing and discarding change sets.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::engine::{ChangeSetDescription, ChangeSetRequest, ChangeSetStatus, OrchestrationEngine};
use crate::error::{EngineError, Result};
use crate::wait::{Poll, Poller};

/// Reasons the engine gives for a change set that has nothing to do.
const NO_CHANGES_REASONS: &[&str] = &[
    "didn't contain changes",
    "No updates are to be performed",
];

/// A staged change set ready to be committed or discarded.
#[derive(Debug, Clone)]
pub struct ChangeHandle {
    /// Stack the change set belongs to.
    pub stack_name: String,
    /// Change set name.
    pub name: String,
    /// Change set id.
    pub id: String,
    /// The staged changes.
    pub description: ChangeSetDescription,
}

impl ChangeHandle {
    /// Logs the change summary at info level.
    pub fn log_summary(&self) {
        if self.description.is_empty() {
            info!("Change set {} has no resource changes", self.name);
            return;
        }
        info!("Change set {} would make these changes:", self.name);
        for line in self.description.summary() {
            info!("  {line}");
        }
    }
}

/// Result of staging a change set.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The change set is ready.
    Ready(ChangeHandle),
    /// The update would not change anything; the change set was discarded.
    NoChanges,
}

/// Builds a change set name for a stack at the given time.
#[must_use]
pub fn change_set_name(stack_name: &str, at: DateTime<Utc>) -> String {
    format!("{stack_name}-{}", at.format("%Y%m%d-%H%M%S"))
}

fn is_no_changes(reason: Option<&str>) -> bool {
    reason.is_some_and(|r| NO_CHANGES_REASONS.iter().any(|marker| r.contains(marker)))
}

/// Stages updates as change sets and commits or discards them.
#[derive(Clone, Copy)]
pub struct ChangePreviewer<'a> {
    engine: &'a dyn OrchestrationEngine,
    poller: &'a Poller,
}

impl<'a> ChangePreviewer<'a> {
    /// Creates a previewer.
    #[must_use]
    pub const fn new(engine: &'a dyn OrchestrationEngine, poller: &'a Poller) -> Self {
        Self { engine, poller }
    }

    /// Submits a change set and waits until the engine has computed it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChangeSetFailed`] if the engine could not
    /// compute the change set for any reason other than an empty diff.
    pub async fn stage(&self, request: &ChangeSetRequest) -> Result<StageOutcome> {
        info!(
            "Creating change set {} for stack {}",
            request.change_set_name, request.stack_name
        );
        let id = self.engine.create_change_set(request).await?;

        let mut message = self
            .poller
            .message(format!("Waiting for change set {} to be ready", request.change_set_name));
        let engine = self.engine;
        let change_set_id = id.as_str();
        let description = self
            .poller
            .poll(&request.change_set_name, &mut message, move || async move {
                let description = engine.describe_change_set(change_set_id).await?;
                Ok(if description.status == ChangeSetStatus::Pending {
                    Poll::Pending
                } else {
                    Poll::Ready(description)
                })
            })
            .await?;

        match description.status {
            ChangeSetStatus::Complete => Ok(StageOutcome::Ready(ChangeHandle {
                stack_name: request.stack_name.clone(),
                name: request.change_set_name.clone(),
                id,
                description,
            })),
            ChangeSetStatus::Failed if is_no_changes(description.status_reason.as_deref()) => {
                info!("No changes detected, deleting change set");
                self.engine.delete_change_set(&id).await?;
                Ok(StageOutcome::NoChanges)
            }
            status => Err(EngineError::ChangeSetFailed {
                change_set: request.change_set_name.clone(),
                reason: description
                    .status_reason
                    .unwrap_or_else(|| format!("change set ended in status {status:?}")),
            }
            .into()),
        }
    }

    /// Executes a staged change set.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the execution.
    pub async fn commit(&self, handle: &ChangeHandle) -> Result<()> {
        info!("Executing change set {} on stack {}", handle.name, handle.stack_name);
        self.engine.execute_change_set(&handle.id).await
    }

    /// Deletes a staged change set without executing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn discard(&self, handle: &ChangeHandle) -> Result<()> {
        debug!("Deleting change set {}", handle.name);
        self.engine.delete_change_set(&handle.id).await
    }
}
