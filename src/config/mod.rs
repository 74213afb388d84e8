//! Configuration module for the deployment tool.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackdeploy.yaml`
//! - Environment variable overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_NAME_VAR, REGION_VAR, TEMPLATE_BUCKET_VAR,
    apply_env_overrides_with, find_config_file,
};
pub use spec::{
    DeployConfig, DeploymentConfig, ImageConfig, SecretsConfig, Settings, SpecificationConfig,
    StackConfig, VolatileParameterConfig, WaiterSettings,
};
pub use validator::{ConfigValidator, RESERVED_ENV_NAME, ValidationError, ValidationResult};
