//! Orchestration engine interface.

use async_trait::async_trait;

use crate::error::Result;

use super::types::{
    ChangeSetDescription, ChangeSetRequest, CreateStackRequest, StackDescription, StackEvent,
    StackResource, StackStatus,
};

/// Operations the deployment tooling needs from the orchestration engine.
///
/// Implementations map "stack does not exist" responses to
/// [`StackStatus::DoesNotExist`] or `None` rather than errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrchestrationEngine: Send + Sync {
    /// Fetches the current status of a stack.
    async fn stack_status(&self, stack_name: &str) -> Result<StackStatus>;

    /// Describes a stack, or returns `None` if it does not exist.
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>>;

    /// Starts creating a stack.
    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()>;

    /// Starts deleting a stack.
    async fn delete_stack(&self, stack_name: &str) -> Result<()>;

    /// Submits a change set and returns its id.
    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String>;

    /// Describes a change set.
    async fn describe_change_set(&self, change_set_id: &str) -> Result<ChangeSetDescription>;

    /// Executes a change set.
    async fn execute_change_set(&self, change_set_id: &str) -> Result<()>;

    /// Deletes a change set without executing it.
    async fn delete_change_set(&self, change_set_id: &str) -> Result<()>;

    /// Lists stack events, newest first.
    async fn stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>>;

    /// Lists the resources a stack owns.
    async fn stack_resources(&self, stack_name: &str) -> Result<Vec<StackResource>>;

    /// Fetches the template body of a deployed stack.
    async fn template_body(&self, stack_name: &str) -> Result<String>;
}

