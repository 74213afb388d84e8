//! Waiting for stack operations to settle.

use serde::Serialize;
use tracing::{debug, info};

use crate::engine::{StackPhase, StackStatus, StatusReader, describe_event};
use crate::error::{Result, WaitError};

use super::poller::{Poll, Poller};

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum WaitOutcome {
    /// The stack reached the expected terminal status.
    Completed(StackStatus),
    /// The stack was not in the expected transitional phase, so no polling
    /// took place.
    NotInProgress(StackStatus),
}

/// Waits on one stack, classifying its status on every poll.
#[derive(Debug)]
pub struct StackWaiter<'a> {
    reader: &'a StatusReader,
    poller: &'a Poller,
}

impl<'a> StackWaiter<'a> {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(reader: &'a StatusReader, poller: &'a Poller) -> Self {
        Self { reader, poller }
    }

    /// Waits for a create to finish.
    ///
    /// # Errors
    ///
    /// See [`StackWaiter::wait_for`].
    pub async fn wait_for_creation(&self) -> Result<WaitOutcome> {
        self.wait_for(StackPhase::Creating, |s| *s == StackStatus::CreateComplete)
            .await
    }

    /// Waits for an update to finish.
    ///
    /// # Errors
    ///
    /// See [`StackWaiter::wait_for`].
    pub async fn wait_for_update(&self) -> Result<WaitOutcome> {
        self.wait_for(StackPhase::Updating, |s| *s == StackStatus::UpdateComplete)
            .await
    }

    /// Waits for a delete to finish. A stack that no longer exists counts as
    /// deleted.
    ///
    /// # Errors
    ///
    /// See [`StackWaiter::wait_for`].
    pub async fn wait_for_deletion(&self) -> Result<WaitOutcome> {
        self.wait_for(StackPhase::Deleting, |s| {
            matches!(s, StackStatus::DeleteComplete | StackStatus::DoesNotExist)
        })
        .await
    }

    /// Waits while the stack is in `expected`, until `success` holds.
    ///
    /// Returns immediately, without sleeping, when the stack is not in the
    /// expected phase to begin with.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Failed`] on a terminal failure status or a
    /// rolled back update,
    /// [`WaitError::UnexpectedState`] on a status outside the expected,
    /// success and failure sets, and [`WaitError::MaxAttemptsExceeded`] when
    /// the poller gives up.
    pub async fn wait_for(
        &self,
        expected: StackPhase,
        success: fn(&StackStatus) -> bool,
    ) -> Result<WaitOutcome> {
        let stack_name = self.reader.stack_name().to_string();
        let current = self.reader.status().await?;

        if current.phase() != Some(expected) {
            debug!("Stack {stack_name} is {current}, not {expected}; not waiting");
            return Ok(WaitOutcome::NotInProgress(current));
        }

        info!("Waiting for stack {stack_name} to finish {expected}");
        let mut message = self.poller.message(format!("Waiting for stack {stack_name} ({expected})"));

        let this = self;
        let name = stack_name.as_str();
        let status = self
            .poller
            .poll(name, &mut message, move || async move {
                let status = this.reader.refresh().await?;
                if success(&status) {
                    return Ok(Poll::Ready(status));
                }
                match status.phase() {
                    Some(phase) if phase == expected => Ok(Poll::Pending),
                    Some(StackPhase::Failed | StackPhase::RolledBack) => Err(this.failure(&status).await),
                    _ => Err(WaitError::UnexpectedState {
                        stack_name: name.to_string(),
                        status: status.to_string(),
                        expected: expected.to_string(),
                    }
                    .into()),
                }
            })
            .await?;

        info!("Stack {stack_name} reached {status}");
        Ok(WaitOutcome::Completed(status))
    }

    async fn failure(&self, status: &StackStatus) -> crate::error::DeployError {
        let failed_events = match self.reader.failed_events().await {
            Ok(events) => events.iter().map(describe_event).collect(),
            Err(e) => return e,
        };
        WaitError::Failed {
            stack_name: self.reader.stack_name().to_string(),
            status: status.to_string(),
            failed_events,
        }
        .into()
    }
}
