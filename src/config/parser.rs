//! Configuration parser for loading deployment configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, DeployError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::DeployConfig;

/// Environment variable overriding `deployment.env_name`.
pub const ENV_NAME_VAR: &str = "STACKDEPLOY_ENV_NAME";

/// Environment variable overriding `deployment.region`.
pub const REGION_VAR: &str = "STACKDEPLOY_REGION";

/// Environment variable overriding `settings.template_bucket`.
pub const TEMPLATE_BUCKET_VAR: &str = "STACKDEPLOY_TEMPLATE_BUCKET";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Returns the base path, defaulting to the current directory.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        self.base_path.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// Resolves a path from the configuration against the base path.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path().join(path)
        }
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(DeployError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");

        let config: DeployConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            DeployError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed configuration for deployment: {}",
            config.deployment.name
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        apply_env_overrides_with(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.base_path().join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DeployError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads a required environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is not set.
    pub fn required_env(name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| {
            DeployError::Config(ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
        })
    }
}

/// Applies environment overrides using the given variable lookup.
///
/// Empty values are ignored.
pub fn apply_env_overrides_with<F>(config: &mut DeployConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(env_name) = lookup(ENV_NAME_VAR) {
        debug!("Overriding deployment.env_name from environment");
        config.deployment.env_name = Some(env_name);
    }

    if let Some(region) = lookup(REGION_VAR) {
        debug!("Overriding deployment.region from environment");
        config.deployment.region = region;
    }

    if let Some(bucket) = lookup(TEMPLATE_BUCKET_VAR) {
        debug!("Overriding settings.template_bucket from environment");
        config.settings.template_bucket = Some(bucket);
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["stackdeploy.yaml", "stackdeploy.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeployError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SpecificationConfig, VolatileParameterConfig};
    use std::collections::HashMap;

    const MINIMAL: &str = r"
deployment:
  name: tutor
  region: us-east-1
";

    #[test]
    fn test_parse_minimal_config() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(MINIMAL, None).expect("should parse");

        assert_eq!(config.deployment.name, "tutor");
        assert_eq!(config.deployment.env_name(), None);
        assert!(config.stacks.is_empty());
        assert_eq!(config.settings.waiter.delay_secs, 10);
        assert!(config.settings.infer_capabilities);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
deployment:
  name: tutor
  env_name: qa
  region: us-west-2
settings:
  template_bucket: deploy-templates
  waiter:
    delay_secs: 5
tags:
  Team: platform
stacks:
  - id: network
  - id: app
    capabilities: [named_iam]
    parameter_defaults:
      ImageId: ami-123
      Optional: ~
    volatile_parameters:
      - source: desired_capacity
        parameter: DesiredCapacity
        logical_resource_id: AsgGroup
      - source: stack_output
        parameter: VpcId
        stack: network
        output: VpcId
    cycle_if_different_parameter: CycleToken
    secrets:
      - id: app
        specifications:
          - from: file
            path: secrets/app.yml
            top_key: production
          - from: inline
            content:
              db:
                password: random(hex,32)
        substitutions:
          domain: example.com
        force_update: ["^.*/api_key$"]
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("should parse");

        assert_eq!(config.deployment.env_name(), Some("qa"));
        assert_eq!(config.settings.waiter.delay_secs, 5);
        assert_eq!(config.settings.waiter.max_attempts, 360);
        assert_eq!(config.stacks.len(), 2);

        let app = &config.stacks[1];
        assert_eq!(app.parameter_defaults.get("Optional"), Some(&None));
        assert!(matches!(
            app.volatile_parameters[0],
            VolatileParameterConfig::DesiredCapacity { .. }
        ));
        assert_eq!(app.volatile_parameters[1].parameter(), "VpcId");
        assert!(matches!(
            app.secrets[0].specifications[1],
            SpecificationConfig::Inline { .. }
        ));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = r"
deployment:
  name: tutor
  region: us-east-1
stackz: []
";
        let err = ConfigParser::new().parse_yaml(yaml, None).expect_err("should fail");
        assert!(err.is_validation());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).expect("should parse");
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_NAME_VAR, "staging"),
            (REGION_VAR, "eu-west-1"),
            (TEMPLATE_BUCKET_VAR, "  "),
        ]);

        apply_env_overrides_with(&mut config, |name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(config.deployment.env_name(), Some("staging"));
        assert_eq!(config.deployment.region, "eu-west-1");
        assert_eq!(config.settings.template_bucket, None);
    }

    #[test]
    fn test_load_file_and_find() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("templates");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("stackdeploy.yaml"), MINIMAL).expect("write");

        let found = find_config_file(&nested).expect("should find");
        assert_eq!(found, dir.path().join("stackdeploy.yaml"));

        let config = ConfigParser::new().load_file(&found).expect("should load");
        assert_eq!(config.deployment.region, "us-east-1");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ConfigParser::new()
            .load_file(dir.path().join("nope.yaml"))
            .expect_err("should fail");
        assert!(matches!(
            err,
            DeployError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_relative_paths() {
        let parser = ConfigParser::new().with_base_path("/srv/deploy");
        assert_eq!(
            parser.resolve(Path::new("templates/app.yml")),
            PathBuf::from("/srv/deploy/templates/app.yml")
        );
        assert_eq!(parser.resolve(Path::new("/abs.yml")), PathBuf::from("/abs.yml"));
    }
}
