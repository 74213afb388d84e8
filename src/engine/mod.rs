//! Orchestration engine access.
//!
//! This module contains:
//! - The engine interface and its CloudFormation implementation
//! - Stack status classification and failure reporting
//! - Types exchanged with the engine

mod client;
mod cloudformation;
mod status;
mod types;

#[cfg(test)]
pub use client::MockOrchestrationEngine;
pub use client::OrchestrationEngine;
pub use cloudformation::CloudFormationEngine;
pub use status::{StatusReader, StatusReport, describe_event, failed_events_since_last_user_event};
pub use types::{
    Capability, ChangeCause, ChangeSetDescription, ChangeSetRequest, ChangeSetStatus,
    CreateStackRequest, ResourceChange, StackDescription, StackEvent, StackPhase, StackResource,
    StackStatus, TemplateLocation,
};
