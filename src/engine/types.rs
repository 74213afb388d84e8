//! Types exchanged with the orchestration engine.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, Result};
use crate::parameters::ParameterSet;
use crate::tags::Tag;

/// Lifecycle status of a stack as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StackStatus {
    /// `CREATE_IN_PROGRESS`
    CreateInProgress,
    /// `CREATE_FAILED`
    CreateFailed,
    /// `CREATE_COMPLETE`
    CreateComplete,
    /// `ROLLBACK_IN_PROGRESS`
    RollbackInProgress,
    /// `ROLLBACK_FAILED`
    RollbackFailed,
    /// `ROLLBACK_COMPLETE`
    RollbackComplete,
    /// `DELETE_IN_PROGRESS`
    DeleteInProgress,
    /// `DELETE_FAILED`
    DeleteFailed,
    /// `DELETE_COMPLETE`
    DeleteComplete,
    /// `UPDATE_IN_PROGRESS`
    UpdateInProgress,
    /// `UPDATE_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateCompleteCleanupInProgress,
    /// `UPDATE_COMPLETE`
    UpdateComplete,
    /// `UPDATE_FAILED`
    UpdateFailed,
    /// `UPDATE_ROLLBACK_IN_PROGRESS`
    UpdateRollbackInProgress,
    /// `UPDATE_ROLLBACK_FAILED`
    UpdateRollbackFailed,
    /// `UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS`
    UpdateRollbackCompleteCleanupInProgress,
    /// `UPDATE_ROLLBACK_COMPLETE`
    UpdateRollbackComplete,
    /// `REVIEW_IN_PROGRESS`
    ReviewInProgress,
    /// `IMPORT_IN_PROGRESS`
    ImportInProgress,
    /// `IMPORT_COMPLETE`
    ImportComplete,
    /// `IMPORT_ROLLBACK_IN_PROGRESS`
    ImportRollbackInProgress,
    /// `IMPORT_ROLLBACK_FAILED`
    ImportRollbackFailed,
    /// `IMPORT_ROLLBACK_COMPLETE`
    ImportRollbackComplete,
    /// The stack does not exist.
    DoesNotExist,
    /// A status this tool does not know about.
    Unknown(String),
}

const KNOWN_STATUSES: &[(&str, StackStatus)] = &[
    ("CREATE_IN_PROGRESS", StackStatus::CreateInProgress),
    ("CREATE_FAILED", StackStatus::CreateFailed),
    ("CREATE_COMPLETE", StackStatus::CreateComplete),
    ("ROLLBACK_IN_PROGRESS", StackStatus::RollbackInProgress),
    ("ROLLBACK_FAILED", StackStatus::RollbackFailed),
    ("ROLLBACK_COMPLETE", StackStatus::RollbackComplete),
    ("DELETE_IN_PROGRESS", StackStatus::DeleteInProgress),
    ("DELETE_FAILED", StackStatus::DeleteFailed),
    ("DELETE_COMPLETE", StackStatus::DeleteComplete),
    ("UPDATE_IN_PROGRESS", StackStatus::UpdateInProgress),
    ("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS", StackStatus::UpdateCompleteCleanupInProgress),
    ("UPDATE_COMPLETE", StackStatus::UpdateComplete),
    ("UPDATE_FAILED", StackStatus::UpdateFailed),
    ("UPDATE_ROLLBACK_IN_PROGRESS", StackStatus::UpdateRollbackInProgress),
    ("UPDATE_ROLLBACK_FAILED", StackStatus::UpdateRollbackFailed),
    (
        "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
        StackStatus::UpdateRollbackCompleteCleanupInProgress,
    ),
    ("UPDATE_ROLLBACK_COMPLETE", StackStatus::UpdateRollbackComplete),
    ("REVIEW_IN_PROGRESS", StackStatus::ReviewInProgress),
    ("IMPORT_IN_PROGRESS", StackStatus::ImportInProgress),
    ("IMPORT_COMPLETE", StackStatus::ImportComplete),
    ("IMPORT_ROLLBACK_IN_PROGRESS", StackStatus::ImportRollbackInProgress),
    ("IMPORT_ROLLBACK_FAILED", StackStatus::ImportRollbackFailed),
    ("IMPORT_ROLLBACK_COMPLETE", StackStatus::ImportRollbackComplete),
    ("DOES_NOT_EXIST", StackStatus::DoesNotExist),
];

/// Coarse lifecycle phase of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackPhase {
    /// Being created, or rolling back a failed create.
    Creating,
    /// Being updated, or rolling back a failed update.
    Updating,
    /// Being deleted.
    Deleting,
    /// Terminal failure.
    Failed,
    /// An update or import did not apply; the stack is usable at its
    /// previous state.
    RolledBack,
    /// Terminal success.
    Succeeded,
    /// The stack does not exist.
    Absent,
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Creating => "creating",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
            Self::RolledBack => "rolled back",
            Self::Succeeded => "succeeded",
            Self::Absent => "absent",
        };
        f.write_str(text)
    }
}

impl StackStatus {
    /// Parses an engine status string.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        KNOWN_STATUSES
            .iter()
            .find(|(name, _)| *name == text)
            .map_or_else(|| Self::Unknown(text.to_string()), |(_, status)| status.clone())
    }

    /// Returns the engine status string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        if let Self::Unknown(text) = self {
            return text;
        }
        KNOWN_STATUSES
            .iter()
            .find(|(_, status)| status == self)
            .map_or("UNKNOWN", |(name, _)| name)
    }

    /// Classifies the status into a lifecycle phase. Unknown statuses have
    /// no phase.
    #[must_use]
    pub const fn phase(&self) -> Option<StackPhase> {
        let phase = match self {
            Self::CreateInProgress
            | Self::RollbackInProgress
            | Self::ReviewInProgress
            | Self::ImportInProgress => StackPhase::Creating,
            Self::UpdateInProgress
            | Self::UpdateCompleteCleanupInProgress
            | Self::UpdateRollbackInProgress
            | Self::UpdateRollbackCompleteCleanupInProgress
            | Self::ImportRollbackInProgress => StackPhase::Updating,
            Self::DeleteInProgress => StackPhase::Deleting,
            Self::CreateFailed
            | Self::RollbackFailed
            | Self::RollbackComplete
            | Self::DeleteFailed
            | Self::UpdateRollbackFailed
            | Self::ImportRollbackFailed => StackPhase::Failed,
            Self::UpdateFailed | Self::UpdateRollbackComplete | Self::ImportRollbackComplete => {
                StackPhase::RolledBack
            }
            Self::CreateComplete
            | Self::UpdateComplete
            | Self::DeleteComplete
            | Self::ImportComplete => StackPhase::Succeeded,
            Self::DoesNotExist => StackPhase::Absent,
            Self::Unknown(_) => return None,
        };
        Some(phase)
    }

    /// Returns true if the stack exists in a state that holds resources.
    #[must_use]
    pub const fn exists(&self) -> bool {
        !matches!(self, Self::DoesNotExist | Self::DeleteComplete)
    }

    /// Returns true if the stack is in an active state, i.e. neither failed
    /// at create nor deleted.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::DoesNotExist | Self::DeleteComplete | Self::CreateFailed)
    }

    /// Returns true for failure statuses, including a create rollback in
    /// progress. A stack whose update rolled back is not failed: it can be
    /// updated again.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::RollbackInProgress
                | Self::RollbackComplete
                | Self::RollbackFailed
                | Self::CreateFailed
                | Self::DeleteFailed
                | Self::UpdateRollbackFailed
                | Self::ImportRollbackFailed
        )
    }

    /// Returns true if the last update or import did not apply.
    #[must_use]
    pub const fn is_rolled_back(&self) -> bool {
        matches!(self.phase(), Some(StackPhase::RolledBack))
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StackStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Capabilities a template may need to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Capability {
    /// `CAPABILITY_IAM`
    Iam,
    /// `CAPABILITY_NAMED_IAM`
    NamedIam,
    /// `CAPABILITY_AUTO_EXPAND`
    AutoExpand,
}

impl Capability {
    /// Parses a capability from its short (`named_iam`) or engine
    /// (`CAPABILITY_NAMED_IAM`) form.
    ///
    /// # Errors
    ///
    /// Returns an error for any other value.
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim() {
            "iam" | "CAPABILITY_IAM" => Ok(Self::Iam),
            "named_iam" | "CAPABILITY_NAMED_IAM" => Ok(Self::NamedIam),
            "auto_expand" | "CAPABILITY_AUTO_EXPAND" => Ok(Self::AutoExpand),
            other => Err(ConfigError::InvalidCapability {
                capability: other.to_string(),
            }
            .into()),
        }
    }

    /// Returns the engine name of the capability.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iam => "CAPABILITY_IAM",
            Self::NamedIam => "CAPABILITY_NAMED_IAM",
            Self::AutoExpand => "CAPABILITY_AUTO_EXPAND",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the engine reads the template from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateLocation {
    /// A URL in the template bucket.
    Url(String),
    /// The template body, passed inline.
    Body(String),
}

/// A deployed stack as described by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    /// Stack name.
    pub stack_name: String,
    /// Stack id, if the engine reported one.
    pub stack_id: Option<String>,
    /// Current status.
    pub status: Option<StackStatus>,
    /// Deployed parameter values.
    pub parameters: BTreeMap<String, String>,
    /// Stack outputs.
    pub outputs: BTreeMap<String, String>,
    /// Whether termination protection is enabled.
    pub termination_protection: bool,
}

/// One stack event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackEvent {
    /// Logical id of the resource the event is about.
    pub logical_resource_id: Option<String>,
    /// Resource type.
    pub resource_type: Option<String>,
    /// Resource status text.
    pub resource_status: Option<String>,
    /// Reason text, if any.
    pub resource_status_reason: Option<String>,
    /// When the event happened.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A resource owned by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackResource {
    /// Logical id in the template.
    pub logical_resource_id: String,
    /// Physical id assigned by the provider.
    pub physical_resource_id: Option<String>,
    /// Resource type, e.g. `AWS::Events::Rule`.
    pub resource_type: String,
}

/// Request to create a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStackRequest {
    /// Stack name.
    pub stack_name: String,
    /// Template location.
    pub template: TemplateLocation,
    /// Parameters.
    pub parameters: ParameterSet,
    /// Acknowledged capabilities.
    pub capabilities: Vec<Capability>,
    /// Stack tags.
    pub tags: Vec<Tag>,
    /// Whether to enable termination protection.
    pub enable_termination_protection: bool,
}

/// Request to stage an update as a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    /// Stack name.
    pub stack_name: String,
    /// Change set name.
    pub change_set_name: String,
    /// Template location.
    pub template: TemplateLocation,
    /// Parameters.
    pub parameters: ParameterSet,
    /// Acknowledged capabilities.
    pub capabilities: Vec<Capability>,
    /// Stack tags.
    pub tags: Vec<Tag>,
}

/// Status of a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSetStatus {
    /// Still being computed.
    Pending,
    /// Ready to execute.
    Complete,
    /// Could not be computed.
    Failed,
    /// Being deleted or already gone.
    Deleted,
    /// Any other status text.
    Unknown(String),
}

impl ChangeSetStatus {
    /// Parses an engine change set status string.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "CREATE_PENDING" | "CREATE_IN_PROGRESS" => Self::Pending,
            "CREATE_COMPLETE" => Self::Complete,
            "FAILED" => Self::Failed,
            "DELETE_PENDING" | "DELETE_IN_PROGRESS" | "DELETE_COMPLETE" | "DELETE_FAILED" => {
                Self::Deleted
            }
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What caused part of a resource change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeCause {
    /// Source of the change, e.g. `ParameterReference`.
    pub change_source: Option<String>,
    /// Entity that caused the change, e.g. a parameter name.
    pub causing_entity: Option<String>,
}

/// One resource affected by a change set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceChange {
    /// `Add`, `Modify`, `Remove`, `Import` or `Dynamic`.
    pub action: String,
    /// Logical id in the template.
    pub logical_resource_id: String,
    /// Resource type.
    pub resource_type: String,
    /// `True`, `False` or `Conditional` for modifications.
    pub replacement: Option<String>,
    /// Attributes being changed, e.g. `Properties`.
    pub scope: Vec<String>,
    /// What caused the change.
    pub causes: Vec<ChangeCause>,
}

/// A change set as described by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetDescription {
    /// Change set id.
    pub id: String,
    /// Status.
    pub status: ChangeSetStatus,
    /// Reason text for the status.
    pub status_reason: Option<String>,
    /// Affected resources.
    pub changes: Vec<ResourceChange>,
    /// Parameters the change set would apply.
    pub parameters: ParameterSet,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_unknown() {
        for (name, status) in KNOWN_STATUSES {
            assert_eq!(StackStatus::parse(name), *status);
            assert_eq!(status.as_str(), *name);
        }
        let odd = StackStatus::parse("SOMETHING_NEW");
        assert_eq!(odd.as_str(), "SOMETHING_NEW");
        assert_eq!(odd.phase(), None);
    }

    #[test]
    fn test_phases() {
        assert_eq!(StackStatus::RollbackInProgress.phase(), Some(StackPhase::Creating));
        assert_eq!(
            StackStatus::UpdateRollbackInProgress.phase(),
            Some(StackPhase::Updating)
        );
        assert_eq!(StackStatus::DeleteInProgress.phase(), Some(StackPhase::Deleting));
        assert_eq!(StackStatus::UpdateRollbackComplete.phase(), Some(StackPhase::RolledBack));
        assert_eq!(StackStatus::UpdateRollbackFailed.phase(), Some(StackPhase::Failed));
        assert_eq!(StackStatus::DeleteComplete.phase(), Some(StackPhase::Succeeded));
        assert_eq!(StackStatus::DoesNotExist.phase(), Some(StackPhase::Absent));
    }

    #[test]
    fn test_failed_and_active() {
        assert!(StackStatus::RollbackInProgress.is_failed());
        assert!(StackStatus::CreateFailed.is_failed());
        assert!(!StackStatus::UpdateComplete.is_failed());
        assert!(StackStatus::UpdateRollbackFailed.is_failed());
        assert!(StackStatus::DeleteFailed.is_failed());
        for rolled_back in [
            StackStatus::UpdateRollbackComplete,
            StackStatus::ImportRollbackComplete,
            StackStatus::UpdateFailed,
        ] {
            assert!(!rolled_back.is_failed(), "{rolled_back}");
            assert!(rolled_back.is_rolled_back(), "{rolled_back}");
        }
        assert!(!StackStatus::CreateFailed.is_active());
        assert!(StackStatus::RollbackComplete.is_active());
        assert!(!StackStatus::DoesNotExist.exists());
    }

    #[test]
    fn test_capability_parse() {
        assert_eq!(Capability::parse("named_iam").expect("valid"), Capability::NamedIam);
        assert_eq!(
            Capability::parse("CAPABILITY_AUTO_EXPAND").expect("valid"),
            Capability::AutoExpand
        );
        assert!(Capability::parse("admin").is_err());
    }
}
