//! Configuration validation for deployment files.
//!
//! This module validates a parsed [`DeployConfig`] before anything talks to
//! the cloud, collecting every problem instead of stopping at the first.

use crate::engine::Capability;
use crate::error::{ConfigError, DeployError, Result};
use crate::tags::Tag;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::spec::{DeployConfig, SecretsConfig, StackConfig, VolatileParameterConfig};

/// Environment name reserved for parameters owned outside any deployment.
pub const RESERVED_ENV_NAME: &str = "external";

/// Longest single wait delay accepted, in seconds.
pub const MAX_WAIT_DELAY_SECS: u64 = 3600;

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if there are no errors.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(DeployError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Runs every check and returns all findings without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_deployment(config, &mut result);
        Self::validate_settings(config, &mut result);
        validate_tags("tags", &config.tags, &mut result);
        Self::validate_stacks(&config.stacks, &mut result);
        Self::validate_images(config, &mut result);

        result
    }

    fn validate_deployment(config: &DeployConfig, result: &mut ValidationResult) {
        let deployment = &config.deployment;

        if deployment.name.trim().is_empty() {
            result.error("deployment.name", "Deployment name cannot be empty");
        } else if !deployment
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            result.error(
                "deployment.name",
                format!(
                    "Deployment name '{}' is invalid. Must be alphanumeric with hyphens.",
                    deployment.name
                ),
            );
        }

        if deployment.env_name() == Some(RESERVED_ENV_NAME) {
            result.error(
                "deployment.env_name",
                format!("The environment name '{RESERVED_ENV_NAME}' is reserved"),
            );
        }

        if deployment.region.trim().is_empty() {
            result.error("deployment.region", "Region cannot be empty");
        }
    }

    fn validate_settings(config: &DeployConfig, result: &mut ValidationResult) {
        let waiter = &config.settings.waiter;

        if waiter.delay_secs == 0 {
            result.error("settings.waiter.delay_secs", "Delay must be greater than zero");
        }
        for (field, secs) in [
            ("settings.waiter.delay_secs", waiter.delay_secs),
            ("settings.waiter.max_delay_secs", waiter.max_delay_secs),
        ] {
            if secs > MAX_WAIT_DELAY_SECS {
                result.error(field, format!("Delay cannot exceed {MAX_WAIT_DELAY_SECS} seconds"));
            }
        }
        if waiter.max_attempts == 0 {
            result.error(
                "settings.waiter.max_attempts",
                "Max attempts must be greater than zero",
            );
        }
        if !waiter.backoff_factor.is_finite() || waiter.backoff_factor < 1.0 {
            result.error(
                "settings.waiter.backoff_factor",
                "Backoff factor must be a number of at least 1.0",
            );
        }

        if config.settings.template_bucket.is_none() {
            result
                .warnings
                .push(String::from("No template bucket set; templates will be sent inline"));
        }
    }

    fn validate_stacks(stacks: &[StackConfig], result: &mut ValidationResult) {
        let mut seen_ids = HashSet::new();

        for (i, stack) in stacks.iter().enumerate() {
            let prefix = format!("stacks[{i}]");

            if !is_valid_id(&stack.id) {
                result.error(
                    format!("{prefix}.id"),
                    format!(
                        "Stack id '{}' is invalid. Must start with a letter and contain only letters, digits and underscores.",
                        stack.id
                    ),
                );
            }
            if !seen_ids.insert(stack.id.as_str()) {
                result.error(format!("{prefix}.id"), format!("Duplicate stack id: {}", stack.id));
            }

            for capability in stack.capabilities.iter().flatten() {
                if let Err(e) = Capability::parse(capability) {
                    result.error(format!("{prefix}.capabilities"), e.to_string());
                }
            }

            if stack.parameter_defaults.keys().any(|k| k.trim().is_empty()) {
                result.error(
                    format!("{prefix}.parameter_defaults"),
                    "Parameter keys cannot be blank",
                );
            }

            Self::validate_volatile(&prefix, stack, stacks, result);
            validate_tags(&format!("{prefix}.tags"), &stack.tags, result);

            let mut block_ids = HashSet::new();
            for (j, secrets) in stack.secrets.iter().enumerate() {
                let block = format!("{prefix}.secrets[{j}]");
                if !block_ids.insert(secrets.id.as_deref()) {
                    result.error(
                        format!("{block}.id"),
                        format!(
                            "Duplicate secrets block id: {}",
                            secrets.id.as_deref().unwrap_or("(none)")
                        ),
                    );
                }
                Self::validate_secrets(&block, secrets, result);
            }

            if let Some(param) = &stack.cycle_if_different_parameter {
                if param.trim().is_empty() {
                    result.error(
                        format!("{prefix}.cycle_if_different_parameter"),
                        "Parameter name cannot be blank",
                    );
                } else if stack.secrets.is_empty() {
                    result.warnings.push(format!(
                        "{prefix}: cycle_if_different_parameter has no effect without secrets"
                    ));
                }
            }
        }
    }

    fn validate_volatile(
        prefix: &str,
        stack: &StackConfig,
        stacks: &[StackConfig],
        result: &mut ValidationResult,
    ) {
        let mut parameters = HashSet::new();

        for (k, volatile) in stack.volatile_parameters.iter().enumerate() {
            let field = format!("{prefix}.volatile_parameters[{k}]");

            if volatile.parameter().trim().is_empty() {
                result.error(&field, "Parameter name cannot be blank");
            } else if !parameters.insert(volatile.parameter()) {
                result.error(
                    &field,
                    format!("Duplicate volatile parameter: {}", volatile.parameter()),
                );
            }

            if let VolatileParameterConfig::StackOutput { stack: other, .. } = volatile {
                if other == &stack.id {
                    result.error(&field, "A stack cannot read its own outputs");
                } else if !stacks.iter().any(|s| &s.id == other) {
                    result.error(&field, format!("Unknown stack id: {other}"));
                }
            }
        }
    }

    fn validate_secrets(prefix: &str, secrets: &SecretsConfig, result: &mut ValidationResult) {
        if let Some(id) = &secrets.id
            && id.trim().is_empty()
        {
            result.error(format!("{prefix}.id"), "Secrets block id cannot be blank");
        }

        if secrets.specifications.is_empty() {
            result.error(
                format!("{prefix}.specifications"),
                "At least one specification is required",
            );
        }

        for pattern in &secrets.force_update {
            if let Err(e) = regex::Regex::new(pattern) {
                result.error(
                    format!("{prefix}.force_update"),
                    format!("Invalid pattern '{pattern}': {e}"),
                );
            }
        }
    }

    fn validate_images(config: &DeployConfig, result: &mut ValidationResult) {
        let mut seen_ids = HashSet::new();

        for (i, image) in config.images.iter().enumerate() {
            if !is_valid_id(&image.id) {
                result.error(
                    format!("images[{i}].id"),
                    format!("Image id '{}' is invalid", image.id),
                );
            }
            if !seen_ids.insert(image.id.as_str()) {
                result.error(format!("images[{i}].id"), format!("Duplicate image id: {}", image.id));
            }
        }
    }
}

fn validate_tags(field: &str, tags: &BTreeMap<String, Option<String>>, result: &mut ValidationResult) {
    for (key, value) in tags {
        if let Err(e) = Tag::from_optional(key.clone(), value.clone()) {
            result.error(field, e.to_string());
        }
    }
}

/// Checks that an id starts with a letter and contains only letters, digits
/// and underscores.
fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
