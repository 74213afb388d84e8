//! Configuration specification types for the deployment system.
//!
//! This module defines all the structs that map to the `stackdeploy.yaml` file.
//! These types describe a deployment once; dynamic context (environment
//! overrides, CLI flags) is layered on top by the parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration structure for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Deployment identity.
    pub deployment: DeploymentConfig,
    /// Tool settings.
    #[serde(default)]
    pub settings: Settings,
    /// Tags applied to every stack.
    #[serde(default)]
    pub tags: BTreeMap<String, Option<String>>,
    /// Substitutions available to every secret block.
    #[serde(default)]
    pub shared_substitutions: BTreeMap<String, String>,
    /// Stacks, in creation order.
    #[serde(default)]
    pub stacks: Vec<StackConfig>,
    /// Machine images built by this deployment.
    #[serde(default)]
    pub images: Vec<ImageConfig>,
}

/// Deployment identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    /// Deployment name, e.g. `tutor`.
    pub name: String,
    /// Environment name, e.g. `production`. Blank means none.
    #[serde(default)]
    pub env_name: Option<String>,
    /// AWS region.
    pub region: String,
}

impl DeploymentConfig {
    /// Returns the environment name, treating blank as absent.
    #[must_use]
    pub fn env_name(&self) -> Option<&str> {
        self.env_name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Bucket templates are uploaded to. Without one, templates are passed
    /// inline.
    #[serde(default)]
    pub template_bucket: Option<String>,
    /// Region of the template bucket, if different.
    #[serde(default)]
    pub template_bucket_region: Option<String>,
    /// Folder inside the template bucket.
    #[serde(default)]
    pub template_folder: Option<String>,
    /// Directory holding `<stack id>.yml` templates, relative to the
    /// configuration file.
    #[serde(default = "default_template_directory")]
    pub template_directory: PathBuf,
    /// Whether to infer capabilities from templates.
    #[serde(default = "default_true")]
    pub infer_capabilities: bool,
    /// Whether to infer well-known parameter defaults.
    #[serde(default = "default_true")]
    pub infer_parameter_defaults: bool,
    /// Environment name that counts as production.
    #[serde(default = "default_production_env_name")]
    pub production_env_name: String,
    /// Key pair used for `KeyName` / `KeyPairName` parameters.
    #[serde(default)]
    pub key_pair_name: Option<String>,
    /// Waiter tuning.
    #[serde(default)]
    pub waiter: WaiterSettings,
    /// Total seconds tag throttling retries may sleep for per resource.
    #[serde(default = "default_tag_retry_budget_secs")]
    pub tag_retry_budget_secs: u64,
    /// Milliseconds to pause between secret writes on create.
    #[serde(default = "default_secret_put_delay_ms")]
    pub secret_put_delay_ms: u64,
    /// Environment variable holding the source control token.
    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template_bucket: None,
            template_bucket_region: None,
            template_folder: None,
            template_directory: default_template_directory(),
            infer_capabilities: true,
            infer_parameter_defaults: true,
            production_env_name: default_production_env_name(),
            key_pair_name: None,
            waiter: WaiterSettings::default(),
            tag_retry_budget_secs: default_tag_retry_budget_secs(),
            secret_put_delay_ms: default_secret_put_delay_ms(),
            github_token_env: default_github_token_env(),
        }
    }
}

/// Waiter tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WaiterSettings {
    /// Seconds between polls.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Polls before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Multiplier applied to the delay after each poll.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound on the delay.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Minimum seconds between progress messages.
    #[serde(default = "default_message_interval_secs")]
    pub message_interval_secs: u64,
    /// Seconds a fetched stack status may be reused.
    #[serde(default = "default_status_cache_secs")]
    pub status_cache_secs: u64,
}

impl Default for WaiterSettings {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            max_delay_secs: default_max_delay_secs(),
            message_interval_secs: default_message_interval_secs(),
            status_cache_secs: default_status_cache_secs(),
        }
    }
}

/// Configuration for a single stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Identifier within the deployment; letters, digits and underscores.
    pub id: String,
    /// Explicit stack name. Defaults to `<env>-<deployment>-<id>`.
    #[serde(default)]
    pub name: Option<String>,
    /// Template path. Defaults to `<template_directory>/<id>.yml`.
    #[serde(default)]
    pub template: Option<PathBuf>,
    /// Capabilities (`iam`, `named_iam`, `auto_expand`). Inferred when
    /// absent.
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    /// Termination protection. Defaults to on in production.
    #[serde(default)]
    pub enable_termination_protection: Option<bool>,
    /// Parameter defaults; a null value means "no default".
    #[serde(default)]
    pub parameter_defaults: BTreeMap<String, Option<String>>,
    /// Parameters read from live state on every update.
    #[serde(default)]
    pub volatile_parameters: Vec<VolatileParameterConfig>,
    /// Secret blocks owned by this stack.
    #[serde(default)]
    pub secrets: Vec<SecretsConfig>,
    /// Parameter set to a fresh random value whenever secrets change.
    #[serde(default)]
    pub cycle_if_different_parameter: Option<String>,
    /// Stack-specific tags, merged over deployment tags.
    #[serde(default)]
    pub tags: BTreeMap<String, Option<String>>,
}

/// A parameter whose value is read from live state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum VolatileParameterConfig {
    /// Current desired capacity of an auto scaling group in this stack.
    DesiredCapacity {
        /// Parameter to set.
        parameter: String,
        /// Logical id of the auto scaling group.
        logical_resource_id: String,
    },
    /// An output of another deployed stack.
    StackOutput {
        /// Parameter to set.
        parameter: String,
        /// Id of the other stack in this deployment.
        stack: String,
        /// Output key.
        output: String,
    },
}

impl VolatileParameterConfig {
    /// Returns the parameter this entry sets.
    #[must_use]
    pub fn parameter(&self) -> &str {
        match self {
            Self::DesiredCapacity { parameter, .. } | Self::StackOutput { parameter, .. } => {
                parameter
            }
        }
    }
}

/// A block of generated secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    /// Namespace segment for this block.
    #[serde(default)]
    pub id: Option<String>,
    /// Specifications, later ones overriding earlier ones.
    pub specifications: Vec<SpecificationConfig>,
    /// Substitutions for `{{ name }}` and `ssm(name)`.
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
    /// Path patterns that are always rewritten.
    #[serde(default)]
    pub force_update: Vec<String>,
}

/// Where a secrets specification document comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum SpecificationConfig {
    /// A YAML or JSON file, relative to the configuration file.
    File {
        /// File path.
        path: PathBuf,
        /// Only use the subtree under this key.
        #[serde(default)]
        top_key: Option<String>,
    },
    /// A file in a source control repository.
    Git {
        /// `org/repo`.
        org_slash_repo: String,
        /// Commit sha or ref.
        sha: String,
        /// Path inside the repository.
        path: String,
        /// Only use the subtree under this key.
        #[serde(default)]
        top_key: Option<String>,
    },
    /// A document written directly in the configuration.
    Inline {
        /// The document.
        content: serde_yaml::Value,
        /// Only use the subtree under this key.
        #[serde(default)]
        top_key: Option<String>,
    },
}

/// A machine image built with Packer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    /// Identifier within the deployment.
    pub id: String,
    /// Packer template path, relative to the configuration file.
    pub template: PathBuf,
    /// Restrict the build to these builders.
    #[serde(default)]
    pub only: Option<String>,
    /// Packer variables.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Base of the image name; `@<sha7> <timestamp>` is appended.
    #[serde(default)]
    pub ami_name_base: Option<String>,
    /// Repository URL used to resolve branch names to commits.
    #[serde(default)]
    pub repository: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_template_directory() -> PathBuf {
    PathBuf::from("templates")
}

fn default_production_env_name() -> String {
    String::from("production")
}

const fn default_tag_retry_budget_secs() -> u64 {
    300
}

const fn default_secret_put_delay_ms() -> u64 {
    100
}

fn default_github_token_env() -> String {
    String::from("GITHUB_TOKEN")
}

const fn default_delay_secs() -> u64 {
    10
}

const fn default_max_attempts() -> u32 {
    360
}

const fn default_backoff_factor() -> f64 {
    1.0
}

const fn default_max_delay_secs() -> u64 {
    60
}

const fn default_message_interval_secs() -> u64 {
    30
}

const fn default_status_cache_secs() -> u64 {
    2
}
