//! Deployments: named sets of stacks built from configuration.
//!
//! Conventions applied when building stacks:
//! - stack name `<env>-<deployment>-<id>` unless given
//! - template `<template_directory>/<id>.yml|.yaml|.json` unless given
//! - termination protection on in the production environment
//! - well-known parameter defaults (`EnvName`, `KeyName`, `<X>StackName`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DeployConfig, SecretsConfig, Settings, SpecificationConfig, StackConfig};
use crate::engine::{Capability, StatusReport};
use crate::error::{ConfigError, Result};
use crate::parameters::ParameterMap;
use crate::secrets::{
    ArtifactSource, ForcePatterns, SecretNamespace, SecretStore, Secrets, SecretsSet, SecretsSpecification,
};
use crate::stack::{CreateReport, Stack, StackDefinition, StackServices, UpdateReport};
use crate::tags::tags_from_map;
use crate::template::{Template, find_template};
use crate::volatile::{CapacityReader, ConfiguredVolatileParameters};
use crate::wait::WaitOutcome;

/// Collaborators needed to build a deployment.
#[derive(Clone)]
pub struct DeploymentServices {
    /// Shared by every stack.
    pub stack: StackServices,
    /// Parameter store for secrets.
    pub secret_store: Arc<dyn SecretStore>,
    /// Source control access for `git` specifications.
    pub artifacts: Arc<dyn ArtifactSource>,
    /// Live capacity reads for volatile parameters.
    pub capacity: Arc<dyn CapacityReader>,
}

impl std::fmt::Debug for DeploymentServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentServices")
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

/// Returns `<env>-<deployment>-<id>`, without the environment when there is
/// none. Underscores in the id become hyphens.
#[must_use]
pub fn stack_name(env_name: Option<&str>, deployment: &str, id: &str) -> String {
    let id = id.replace('_', "-");
    match env_name {
        Some(env) => format!("{env}-{deployment}-{id}"),
        None => format!("{deployment}-{id}"),
    }
}

/// Converts `CamelCase` to `snake_case`.
#[must_use]
pub fn snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let chars: Vec<char> = text.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

/// Fills defaults for well-known parameter names the template declares and
/// the configuration leaves unset or null.
#[must_use]
pub fn infer_parameter_defaults(
    template: &Template,
    configured: &ParameterMap,
    env_name: Option<&str>,
    key_pair_name: Option<&str>,
    stack_names: &BTreeMap<String, String>,
) -> ParameterMap {
    let mut defaults = configured.clone();

    for name in template.parameter_names() {
        if matches!(defaults.get(&name), Some(Some(_))) {
            continue;
        }
        let value = match name.as_str() {
            "EnvName" => env_name.map(str::to_string),
            "KeyName" | "KeyPairName" => key_pair_name.map(str::to_string),
            other => other
                .strip_suffix("StackName")
                .filter(|prefix| !prefix.is_empty())
                .and_then(|prefix| stack_names.get(&snake_case(prefix)).cloned()),
        };
        if let Some(value) = value {
            debug!("Inferred default {name} = {value}");
            defaults.insert(name, Some(value));
        }
    }

    defaults
}

/// Returns the template file for a stack: the configured path, or the first
/// `<id>.yml|.yaml|.json` in the template directory.
///
/// # Errors
///
/// Returns an error if no template is configured and none is found.
pub fn template_path(stack: &StackConfig, base_path: &Path, settings: &Settings) -> Result<PathBuf> {
    match &stack.template {
        Some(path) => Ok(base_path.join(path)),
        None => {
            let directory = base_path.join(&settings.template_directory);
            find_template(&directory, &stack.id).ok_or_else(|| {
                ConfigError::InvalidTemplate {
                    source_name: directory.display().to_string(),
                    message: format!("no template found for stack '{}'", stack.id),
                }
                .into()
            })
        }
    }
}

/// A named set of stacks.
#[derive(Debug)]
pub struct Deployment {
    name: String,
    env_name: Option<String>,
    region: String,
    production: bool,
    stacks: Vec<(String, Stack)>,
}

impl Deployment {
    /// Builds every configured stack.
    ///
    /// # Errors
    ///
    /// Returns an error if a template, capability, tag or secret
    /// specification cannot be loaded.
    pub async fn from_config(
        config: &DeployConfig,
        base_path: &Path,
        services: DeploymentServices,
        dry_run: bool,
    ) -> Result<Self> {
        let deployment = &config.deployment;
        let settings = &services.stack.settings;
        let env_name = deployment.env_name();
        let production = env_name == Some(settings.production_env_name.as_str());

        let stack_names: BTreeMap<String, String> = config
            .stacks
            .iter()
            .map(|s| {
                let name = s
                    .name
                    .clone()
                    .unwrap_or_else(|| stack_name(env_name, &deployment.name, &s.id));
                (s.id.clone(), name)
            })
            .collect();

        let mut stacks = Vec::with_capacity(config.stacks.len());
        for stack_config in &config.stacks {
            let name = stack_names.get(&stack_config.id).cloned().unwrap_or_default();
            let builder = StackBuilder {
                config,
                stack: stack_config,
                base_path,
                services: &services,
                stack_names: &stack_names,
                production,
                dry_run,
            };
            let stack = builder.build(name).await?;
            stacks.push((stack_config.id.clone(), stack));
        }

        info!(
            "Loaded deployment {} ({} stacks{})",
            deployment.name,
            stacks.len(),
            if dry_run { ", dry run" } else { "" }
        );

        Ok(Self {
            name: deployment.name.clone(),
            env_name: env_name.map(str::to_string),
            region: deployment.region.clone(),
            production,
            stacks,
        })
    }

    /// Returns the deployment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the environment name.
    #[must_use]
    pub fn env_name(&self) -> Option<&str> {
        self.env_name.as_deref()
    }

    /// Returns the region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns true in the production environment.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        self.production
    }

    /// Returns the stacks with their ids, in declared order.
    pub fn stacks(&self) -> impl Iterator<Item = (&str, &Stack)> {
        self.stacks.iter().map(|(id, stack)| (id.as_str(), stack))
    }

    /// Returns the stack with the given id.
    #[must_use]
    pub fn stack(&self, id: &str) -> Option<&Stack> {
        self.stacks.iter().find(|(sid, _)| sid == id).map(|(_, stack)| stack)
    }

    /// Returns the selected stacks in declared order, or all of them when
    /// `ids` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids.
    pub fn select(&self, ids: &[String]) -> Result<Vec<(&str, &Stack)>> {
        if let Some(unknown) = ids.iter().find(|id| self.stack(id).is_none()) {
            return Err(ConfigError::validation(format!("Unknown stack '{unknown}'"), "stack").into());
        }
        Ok(self
            .stacks()
            .filter(|(id, _)| ids.is_empty() || ids.iter().any(|i| i == id))
            .collect())
    }

    fn overrides_for<'a>(selected: &[(&str, &Stack)], overrides: &'a ParameterMap) -> Result<&'a ParameterMap> {
        if !overrides.is_empty() && selected.len() != 1 {
            return Err(ConfigError::validation(
                "Parameter overrides need exactly one stack selected",
                "param",
            )
            .into());
        }
        Ok(overrides)
    }

    /// Creates the selected stacks in declared order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the first stack's error.
    pub async fn create(
        &self,
        ids: &[String],
        overrides: &ParameterMap,
        wait: bool,
    ) -> Result<Vec<(String, CreateReport)>> {
        let selected = self.select(ids)?;
        let overrides = Self::overrides_for(&selected, overrides)?;

        let mut reports = Vec::with_capacity(selected.len());
        for (id, stack) in selected {
            reports.push((id.to_string(), stack.create(overrides, wait).await?));
        }
        Ok(reports)
    }

    /// Updates the selected stacks in declared order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the first stack's error.
    pub async fn update(
        &self,
        ids: &[String],
        overrides: &ParameterMap,
        force: &ForcePatterns,
        wait: bool,
    ) -> Result<Vec<(String, UpdateReport)>> {
        let selected = self.select(ids)?;
        let overrides = Self::overrides_for(&selected, overrides)?;

        let mut reports = Vec::with_capacity(selected.len());
        for (id, stack) in selected {
            reports.push((id.to_string(), stack.update(overrides, force, wait).await?));
        }
        Ok(reports)
    }

    /// Deletes the selected stacks in reverse order, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the first stack's error.
    pub async fn delete(&self, ids: &[String], wait: bool) -> Result<Vec<(String, Option<WaitOutcome>)>> {
        let selected = self.select(ids)?;

        let mut outcomes = Vec::with_capacity(selected.len());
        for (id, stack) in selected.into_iter().rev() {
            outcomes.push((id.to_string(), stack.delete(wait).await?));
        }
        Ok(outcomes)
    }

    /// Reports the status of the selected stacks.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be reached.
    pub async fn status(&self, ids: &[String]) -> Result<Vec<StatusReport>> {
        let selected = self.select(ids)?;

        let mut reports = Vec::with_capacity(selected.len());
        for (_, stack) in selected {
            reports.push(stack.status().await?);
        }
        Ok(reports)
    }
}

/// Builds one stack from its configuration.
struct StackBuilder<'a> {
    config: &'a DeployConfig,
    stack: &'a StackConfig,
    base_path: &'a Path,
    services: &'a DeploymentServices,
    stack_names: &'a BTreeMap<String, String>,
    production: bool,
    dry_run: bool,
}

impl StackBuilder<'_> {
    async fn build(&self, name: String) -> Result<Stack> {
        let settings = &self.services.stack.settings;
        let env_name = self.config.deployment.env_name();
        let template = self.template()?;

        let capabilities = self
            .stack
            .capabilities
            .as_ref()
            .map(|caps| caps.iter().map(|c| Capability::parse(c)).collect::<Result<Vec<_>>>())
            .transpose()?;

        let mut tags = self.config.tags.clone();
        tags.extend(self.stack.tags.clone());

        let parameter_defaults = if settings.infer_parameter_defaults {
            infer_parameter_defaults(
                &template,
                &self.stack.parameter_defaults,
                env_name,
                settings.key_pair_name.as_deref(),
                self.stack_names,
            )
        } else {
            self.stack.parameter_defaults.clone()
        };

        let definition = StackDefinition {
            region: self.config.deployment.region.clone(),
            template,
            capabilities,
            parameter_defaults,
            tags: tags_from_map(&tags)?,
            enable_termination_protection: self.stack.enable_termination_protection.unwrap_or(self.production),
            cycle_if_different_parameter: self.stack.cycle_if_different_parameter.clone(),
            name,
        };

        let mut blocks = Vec::with_capacity(self.stack.secrets.len());
        for block in &self.stack.secrets {
            blocks.push(self.secrets(&definition.name, block).await?);
        }

        let mut stack = Stack::new(definition, self.services.stack.clone())?
            .with_secrets(SecretsSet::new(blocks))
            .dry_run(self.dry_run);

        if !self.stack.volatile_parameters.is_empty() {
            stack = stack.with_volatile(Arc::new(ConfiguredVolatileParameters::new(
                self.stack.volatile_parameters.clone(),
                self.stack_names.clone(),
                Arc::clone(&self.services.stack.engine),
                Arc::clone(&self.services.capacity),
            )));
        }

        Ok(stack)
    }

    fn template(&self) -> Result<Template> {
        let path = template_path(self.stack, self.base_path, &self.services.stack.settings)?;
        Template::from_file(&path)
    }

    async fn secrets(&self, stack_name: &str, block: &SecretsConfig) -> Result<Secrets> {
        let settings = &self.services.stack.settings;
        let namespace = SecretNamespace::for_block(
            self.config.deployment.env_name(),
            stack_name,
            block.id.as_deref(),
        )?;

        let mut specifications = Vec::with_capacity(block.specifications.len());
        for spec in &block.specifications {
            specifications.push(self.specification(spec).await?);
        }

        let mut substitutions = self.config.shared_substitutions.clone();
        substitutions.extend(block.substitutions.clone());

        Ok(Secrets::new(namespace, specifications, Arc::clone(&self.services.secret_store))
            .with_substitutions(substitutions)
            .with_force_update(ForcePatterns::new(block.force_update.as_slice())?)
            .with_put_delay(
                Arc::clone(&self.services.stack.sleeper),
                Duration::from_millis(settings.secret_put_delay_ms),
            )
            .dry_run(self.dry_run))
    }

    async fn specification(&self, spec: &SpecificationConfig) -> Result<SecretsSpecification> {
        match spec {
            SpecificationConfig::File { path, top_key } => {
                SecretsSpecification::from_file(&self.base_path.join(path), top_key.as_deref())
            }
            SpecificationConfig::Git {
                org_slash_repo,
                sha,
                path,
                top_key,
            } => {
                SecretsSpecification::from_git(
                    self.services.artifacts.as_ref(),
                    org_slash_repo,
                    sha,
                    path,
                    top_key.as_deref(),
                )
                .await
            }
            SpecificationConfig::Inline { content, top_key } => {
                SecretsSpecification::from_value("inline", content.clone(), top_key.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::engine::MockOrchestrationEngine;
    use crate::secrets::{MockArtifactSource, MockSecretStore};
    use crate::template::InlineTemplateStore;
    use crate::volatile::MockCapacityReader;
    use crate::wait::sleeper::testing::RecordingSleeper;

    const WEB_TEMPLATE: &str = r"
Parameters:
  EnvName:
    Type: String
  KeyName:
    Type: String
  NetworkStackName:
    Type: String
  ImageId:
    Type: String
Resources:
  Role:
    Type: AWS::IAM::Role
";

    const CONFIG: &str = r"
deployment:
  name: tutor
  env_name: production
  region: us-east-1
settings:
  key_pair_name: deployer
tags:
  Project: tutor
stacks:
  - id: network
  - id: web_app
    parameter_defaults:
      ImageId: ami-1
    tags:
      Role: web
    secrets:
      - id: app
        specifications:
          - from: inline
            content:
              token: random(hex,8)
          - from: git
            org_slash_repo: openstax/secrets
            sha: abc123
            path: web.yml
        substitutions:
          domain: example.com
";

    fn services(artifacts: MockArtifactSource) -> DeploymentServices {
        DeploymentServices {
            stack: StackServices {
                engine: Arc::new(MockOrchestrationEngine::new()),
                templates: Arc::new(InlineTemplateStore),
                tagging: None,
                sleeper: Arc::new(RecordingSleeper::default()),
                settings: crate::config::Settings {
                    key_pair_name: Some(String::from("deployer")),
                    ..crate::config::Settings::default()
                },
            },
            secret_store: Arc::new(MockSecretStore::new()),
            artifacts: Arc::new(artifacts),
            capacity: Arc::new(MockCapacityReader::new()),
        }
    }

    #[test]
    fn test_stack_name() {
        assert_eq!(stack_name(Some("qa"), "tutor", "web_app"), "qa-tutor-web-app");
        assert_eq!(stack_name(None, "tutor", "web"), "tutor-web");
    }

    #[test]
    fn test_infer_parameter_defaults() {
        let body = "Parameters:
  EnvName:
    Type: String
  KeyName:
    Type: String
  NetworkStackName:
    Type: String
  ImageId:
    Type: String
Resources: {}
";
        let template = Template::from_body("web", body).expect("template");
        let configured = ParameterMap::from([
            (String::from("EnvName"), Some(String::from("custom"))),
            (String::from("KeyName"), None),
            (String::from("ImageId"), None),
        ]);
        let stack_names = BTreeMap::from([(String::from("network"), String::from("qa-tutor-network"))]);

        let defaults =
            infer_parameter_defaults(&template, &configured, Some("qa"), Some("deployer"), &stack_names);

        assert_eq!(defaults["EnvName"].as_deref(), Some("custom"));
        assert_eq!(defaults["KeyName"].as_deref(), Some("deployer"));
        assert_eq!(defaults["NetworkStackName"].as_deref(), Some("qa-tutor-network"));
        assert_eq!(defaults["ImageId"], None);
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("Network"), "network");
        assert_eq!(snake_case("WebApp"), "web_app");
        assert_eq!(snake_case("RDSPrimary"), "rds_primary");
    }

    #[tokio::test]
    async fn test_builds_stacks_with_conventions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let templates = dir.path().join("templates");
        std::fs::create_dir(&templates).expect("mkdir");
        std::fs::write(templates.join("network.yml"), "Resources: {}\n").expect("write");
        std::fs::write(templates.join("web_app.json"), WEB_TEMPLATE).expect("write");

        let config = ConfigParser::new().parse_yaml(CONFIG, None).expect("config");

        let mut artifacts = MockArtifactSource::new();
        artifacts
            .expect_fetch()
            .withf(|repo, sha, path| repo == "openstax/secrets" && sha == "abc123" && path == "web.yml")
            .returning(|_, _, _| Ok(String::from("url: https://{{ domain }}")));

        let deployment = Deployment::from_config(&config, dir.path(), services(artifacts), true)
            .await
            .expect("deployment");

        assert!(deployment.is_production());
        let ids: Vec<&str> = deployment.stacks().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["network", "web_app"]);

        let web = deployment.stack("web_app").expect("web stack");
        assert_eq!(web.name(), "production-tutor-web-app");
        assert!(web.is_dry_run());

        let definition = web.definition();
        assert!(definition.enable_termination_protection);
        assert_eq!(definition.capabilities, None);
        assert_eq!(definition.tags.len(), 2);

        let defaults = &definition.parameter_defaults;
        assert_eq!(defaults.get("EnvName"), Some(&Some(String::from("production"))));
        assert_eq!(defaults.get("KeyName"), Some(&Some(String::from("deployer"))));
        assert_eq!(
            defaults.get("NetworkStackName"),
            Some(&Some(String::from("production-tutor-network")))
        );
        assert_eq!(defaults.get("ImageId"), Some(&Some(String::from("ami-1"))));

        let blocks = web.secrets().blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].key_prefix(), "/production/production-tutor-web-app/app");
    }

    #[tokio::test]
    async fn test_select_and_override_rules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let templates = dir.path().join("templates");
        std::fs::create_dir(&templates).expect("mkdir");
        std::fs::write(templates.join("a.yml"), "Resources: {}\n").expect("write");
        std::fs::write(templates.join("b.yml"), "Resources: {}\n").expect("write");

        let config = ConfigParser::new()
            .parse_yaml(
                "deployment: {name: tutor, region: us-east-1}\nstacks: [{id: a}, {id: b}]\n",
                None,
            )
            .expect("config");
        let deployment = Deployment::from_config(&config, dir.path(), services(MockArtifactSource::new()), true)
            .await
            .expect("deployment");

        assert_eq!(deployment.select(&[]).expect("all").len(), 2);
        assert!(deployment.select(&[String::from("c")]).is_err());

        let overrides = BTreeMap::from([(String::from("X"), Some(String::from("1")))]);
        let err = deployment
            .create(&[], &overrides, false)
            .await
            .expect_err("should fail");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_missing_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ConfigParser::new()
            .parse_yaml("deployment: {name: tutor, region: us-east-1}\nstacks: [{id: web}]\n", None)
            .expect("config");

        let err = Deployment::from_config(&config, dir.path(), services(MockArtifactSource::new()), false)
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("no template found for stack 'web'"));
    }
}
