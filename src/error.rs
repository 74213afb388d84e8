//! Error types for the stack deployment system.
//!
//! This module provides the error hierarchy for every stage of a stack
//! lifecycle: configuration, parameter resolution, secrets, the orchestration
//! engine, waiting, tagging and image builds.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the stack deployment system.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Parameter resolution errors.
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Secret building and synchronization errors.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Orchestration engine errors.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Errors raised while waiting on a stack.
    #[error("Wait error: {0}")]
    Wait(#[from] WaitError),

    /// Tagging errors.
    #[error("Tag error: {0}")]
    Tag(#[from] TagError),

    /// Image build errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (stack, secret block, etc.).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// The environment name is reserved.
    #[error("The environment name '{name}' is reserved")]
    ReservedEnvName {
        /// The reserved name that was used.
        name: String,
    },

    /// Unknown capability.
    #[error("Invalid capability: {capability}")]
    InvalidCapability {
        /// The capability string that was rejected.
        capability: String,
    },

    /// Tag key or value outside the allowed charset or length.
    #[error("Invalid tag: {message}")]
    InvalidTag {
        /// Description of the tag problem.
        message: String,
    },

    /// Template could not be read or parsed.
    #[error("Invalid template {source_name}: {message}")]
    InvalidTemplate {
        /// File path or stack name the template came from.
        source_name: String,
        /// Description of the problem.
        message: String,
    },
}

/// Parameter resolution errors.
#[derive(Debug, Error)]
pub enum ParameterError {
    /// A parameter key is empty or whitespace.
    #[error("Parameter keys cannot be blank")]
    BlankKey,

    /// A parameter is not declared by the target template.
    #[error("Parameter '{key}' is not declared by the template")]
    UnknownParameter {
        /// The undeclared key.
        key: String,
    },

    /// A volatile parameter source could not be resolved.
    #[error("Could not resolve volatile parameter '{key}': {reason}")]
    VolatileResolution {
        /// The parameter key.
        key: String,
        /// Reason for the failure.
        reason: String,
    },
}

/// Secret building and synchronization errors.
#[derive(Debug, Error)]
pub enum SecretError {
    /// An interpolation token had no substitution.
    #[error("no substitution provided for {name}")]
    UnresolvedSubstitution {
        /// Token name.
        name: String,
    },

    /// A generator directive is malformed.
    #[error("Malformed secret directive '{directive}': {reason}")]
    MalformedDirective {
        /// The raw directive text.
        directive: String,
        /// Reason it was rejected.
        reason: String,
    },

    /// A cross-referenced parameter does not exist.
    #[error("Referenced parameter not found: {path}")]
    ReferenceNotFound {
        /// Path that was looked up.
        path: String,
    },

    /// The namespace has a blank segment or is empty.
    #[error("Invalid secrets namespace: {message}")]
    InvalidNamespace {
        /// Description of the problem.
        message: String,
    },

    /// The specification document could not be loaded.
    #[error("Failed to load secrets specification from {source_name}: {message}")]
    Specification {
        /// Where the specification came from.
        source_name: String,
        /// Description of the problem.
        message: String,
    },

    /// Parameter store error.
    #[error("Parameter store error: {message}")]
    Store {
        /// Description of the store error.
        message: String,
    },
}

/// Orchestration engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// API request failed.
    #[error("{operation} failed: {message}")]
    ApiRequestFailed {
        /// The engine operation being invoked.
        operation: String,
        /// Error message from the engine.
        message: String,
    },

    /// Change set failed for a reason other than having no changes.
    #[error("Change set {change_set} failed: {reason}")]
    ChangeSetFailed {
        /// Change set name or id.
        change_set: String,
        /// Reason reported by the engine.
        reason: String,
    },

    /// Stack does not exist.
    #[error("Stack not found: {stack_name}")]
    StackNotFound {
        /// Name of the missing stack.
        stack_name: String,
    },

    /// Requested output is not exported by the stack.
    #[error("Stack {stack_name} has no output named {key}")]
    OutputNotFound {
        /// Name of the stack.
        stack_name: String,
        /// Output key that was looked up.
        key: String,
    },

    /// Template upload failed.
    #[error("Template upload failed: {message}")]
    TemplateUpload {
        /// Description of the failure.
        message: String,
    },
}

/// Errors raised while waiting on a stack.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The stack reached a terminal failure status.
    #[error("Stack {stack_name} failed with status {status}{}", format_events(.failed_events))]
    Failed {
        /// Name of the stack.
        stack_name: String,
        /// Terminal status reported by the engine.
        status: String,
        /// Failure reasons since the last user-initiated event.
        failed_events: Vec<String>,
    },

    /// Maximum number of polling attempts exceeded.
    #[error("Gave up waiting for {subject} after {attempts} attempts")]
    MaxAttemptsExceeded {
        /// What was being waited on.
        subject: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A status that is neither expected, successful, nor failed.
    #[error("Stack {stack_name} entered unexpected status {status} while {expected}")]
    UnexpectedState {
        /// Name of the stack.
        stack_name: String,
        /// Status observed.
        status: String,
        /// The phase that was expected.
        expected: String,
    },
}

/// Tagging errors.
#[derive(Debug, Error)]
pub enum TagError {
    /// The tagging API throttled the request.
    #[error("Tagging throttled for {resource}")]
    Throttled {
        /// Resource being tagged.
        resource: String,
    },

    /// Tagging API request failed.
    #[error("Failed to tag {resource}: {message}")]
    ApiRequestFailed {
        /// Resource being tagged.
        resource: String,
        /// Error message from the API.
        message: String,
    },
}

/// Image build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A subprocess could not be started.
    #[error("Failed to run '{command}': {message}")]
    SpawnFailed {
        /// Command line.
        command: String,
        /// Description of the failure.
        message: String,
    },

    /// A subprocess exited unsuccessfully.
    #[error("'{command}' exited with status {code}")]
    NonZeroExit {
        /// Command line.
        command: String,
        /// Exit code, or -1 when killed by a signal.
        code: i32,
    },

    /// The build finished but did not report an image id.
    #[error("No image id found in build output")]
    MissingArtifact,

    /// A branch name could not be resolved to a commit.
    #[error("Could not resolve branch {branch} in {repository}")]
    UnknownBranch {
        /// Repository URL.
        repository: String,
        /// Branch name.
        branch: String,
    },
}

fn format_events(events: &[String]) -> String {
    if events.is_empty() {
        String::new()
    } else {
        format!(": {}", events.join("; "))
    }
}

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Tag(TagError::Throttled { .. }))
    }

    /// Returns true if this error was raised by local validation, before any
    /// remote call.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Parameter(_)
                | Self::Secret(
                    SecretError::UnresolvedSubstitution { .. }
                        | SecretError::MalformedDirective { .. }
                        | SecretError::InvalidNamespace { .. }
                )
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl EngineError {
    /// Creates an API request error for the given engine operation.
    #[must_use]
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl SecretError {
    /// Creates a parameter store error with the given message.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
