//! Stack lifecycle: create, update by change set, delete.
//!
//! A [`Stack`] composes parameter resolution, secret synchronization, change
//! previews, waiting and tag reconciliation. Every mutation runs in a fixed
//! order: secrets, then the engine call, then the wait, then the tag sweep.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::changeset::{ChangePreviewer, StageOutcome, change_set_name};
use crate::config::Settings;
use crate::engine::{
    Capability, ChangeSetDescription, ChangeSetRequest, CreateStackRequest, OrchestrationEngine,
    StackStatus, StatusReader, StatusReport, describe_event,
};
use crate::error::{ConfigError, EngineError, Result, WaitError};
use crate::parameters::{
    ParameterMap, ParameterSet, ParameterValue, UpdateInputs, VolatileContext, VolatileParameters,
    check_declared, resolve_for_create, resolve_for_update, resolve_volatile,
};
use crate::secrets::{Directive, ForcePatterns, SecretsSet};
use crate::tags::{ResourceTagging, Tag, TagReconcileReport, TagReconciler};
use crate::template::{Template, TemplateStore};
use crate::wait::{Poller, Sleeper, StackWaiter, WaitOutcome};

/// Value returned for outputs in dry-run.
pub const DRY_RUN_OUTPUT: &str = "undefined-in-dry-run";

/// Length of the random value given to the cycle parameter.
const CYCLE_VALUE_LEN: usize = 16;

/// Collaborators shared by every stack in a deployment.
#[derive(Clone)]
pub struct StackServices {
    /// The orchestration engine.
    pub engine: Arc<dyn OrchestrationEngine>,
    /// Where templates are handed to the engine.
    pub templates: Arc<dyn TemplateStore>,
    /// Tag sweep for resources the engine does not tag, if enabled.
    pub tagging: Option<Arc<dyn ResourceTagging>>,
    /// Sleeper for polling and retries.
    pub sleeper: Arc<dyn Sleeper>,
    /// Tool settings.
    pub settings: Settings,
}

impl std::fmt::Debug for StackServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackServices")
            .field("tagging", &self.tagging.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Static description of a stack.
#[derive(Debug, Clone)]
pub struct StackDefinition {
    /// Stack name.
    pub name: String,
    /// Region the stack lives in.
    pub region: String,
    /// Template.
    pub template: Template,
    /// Declared capabilities; inferred from the template when `None`.
    pub capabilities: Option<Vec<Capability>>,
    /// Parameter defaults.
    pub parameter_defaults: ParameterMap,
    /// Stack tags.
    pub tags: Vec<Tag>,
    /// Whether to enable termination protection on create.
    pub enable_termination_protection: bool,
    /// Parameter set to a fresh random value whenever secrets change.
    pub cycle_if_different_parameter: Option<String>,
}

/// Result of [`Stack::create`].
#[derive(Debug, Clone)]
pub struct CreateReport {
    /// Parameters the stack was (or would be) created with.
    pub parameters: ParameterSet,
    /// How the wait ended, if the caller waited.
    pub wait: Option<WaitOutcome>,
    /// Tag sweep results, if a sweep ran.
    pub tags: Option<TagReconcileReport>,
}

/// Result of [`Stack::update`].
#[derive(Debug, Clone)]
pub enum UpdateReport {
    /// The engine found nothing to change.
    NoChanges,
    /// Dry-run: the change set was inspected and discarded.
    Previewed(ChangeSetDescription),
    /// The change set was executed.
    Applied {
        /// The executed changes.
        changes: ChangeSetDescription,
        /// How the wait ended, if the caller waited.
        wait: Option<WaitOutcome>,
        /// Tag sweep results, if a sweep ran.
        tags: Option<TagReconcileReport>,
    },
}

/// A deployment unit.
pub struct Stack {
    definition: StackDefinition,
    services: StackServices,
    secrets: SecretsSet,
    volatile: Option<Arc<dyn VolatileParameters>>,
    dry_run: bool,
    poller: Poller,
    reader: StatusReader,
    tagger: Option<TagReconciler>,
    deployed_parameters: Mutex<Option<BTreeSet<String>>>,
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("name", &self.definition.name)
            .field("region", &self.definition.region)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Stack {
    /// Creates a stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank.
    pub fn new(definition: StackDefinition, services: StackServices) -> Result<Self> {
        if definition.name.trim().is_empty() {
            return Err(ConfigError::validation("Stack name cannot be empty", "name").into());
        }

        let settings = &services.settings;
        let poller = Poller::new(settings.waiter.clone(), Arc::clone(&services.sleeper));
        let reader = StatusReader::new(
            Arc::clone(&services.engine),
            definition.name.clone(),
            Duration::from_secs(settings.waiter.status_cache_secs),
        );
        let tagger = services.tagging.as_ref().map(|tagging| {
            TagReconciler::new(
                Arc::clone(tagging),
                Arc::clone(&services.sleeper),
                Duration::from_secs(settings.tag_retry_budget_secs),
            )
        });

        Ok(Self {
            definition,
            services,
            secrets: SecretsSet::default(),
            volatile: None,
            dry_run: false,
            poller,
            reader,
            tagger,
            deployed_parameters: Mutex::new(None),
        })
    }

    /// Attaches secret blocks.
    #[must_use]
    pub fn with_secrets(mut self, secrets: SecretsSet) -> Self {
        self.secrets = secrets;
        self
    }

    /// Attaches a volatile parameter resolver.
    #[must_use]
    pub fn with_volatile(mut self, volatile: Arc<dyn VolatileParameters>) -> Self {
        self.volatile = Some(volatile);
        self
    }

    /// Logs mutations instead of performing them.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Returns the static definition.
    #[must_use]
    pub const fn definition(&self) -> &StackDefinition {
        &self.definition
    }

    /// Returns the secret blocks.
    #[must_use]
    pub const fn secrets(&self) -> &SecretsSet {
        &self.secrets
    }

    /// Returns true in dry-run.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn capabilities(&self) -> Vec<Capability> {
        match &self.definition.capabilities {
            Some(declared) => declared.clone(),
            None if self.services.settings.infer_capabilities => self.definition.template.required_capabilities(),
            None => Vec::new(),
        }
    }

    /// Creates the stack: secrets first, then the stack itself. With `wait`,
    /// waits for completion and sweeps tags.
    ///
    /// # Errors
    ///
    /// Returns an error if parameters or secrets are invalid, the engine
    /// rejects the request, or the stack fails to create.
    pub async fn create(&self, overrides: &ParameterMap, wait: bool) -> Result<CreateReport> {
        if self.dry_run {
            info!("**** DRY RUN ****");
        }
        let parameters = resolve_for_create(&self.definition.parameter_defaults, overrides)?;
        info!("Creating stack {}", self.name());

        self.secrets.create().await?;

        if self.dry_run {
            for (key, value) in parameters.iter() {
                info!("  {key} = {value}");
            }
            info!("Would create stack {}", self.name());
            return Ok(CreateReport {
                parameters,
                wait: None,
                tags: None,
            });
        }

        let request = CreateStackRequest {
            stack_name: self.definition.name.clone(),
            template: self.services.templates.locate(&self.definition.template).await?,
            parameters: parameters.clone(),
            capabilities: self.capabilities(),
            tags: self.definition.tags.clone(),
            enable_termination_protection: self.definition.enable_termination_protection,
        };
        self.services.engine.create_stack(&request).await?;
        self.reader.invalidate();
        info!("Stack {} creation started", self.name());

        if !wait {
            return Ok(CreateReport {
                parameters,
                wait: None,
                tags: None,
            });
        }

        let outcome = self.waiter().wait_for_creation().await?;
        self.settle(&outcome).await?;
        let tags = self.sweep_tags(&outcome).await;

        Ok(CreateReport {
            parameters,
            wait: Some(outcome),
            tags,
        })
    }

    /// Updates the stack through a change set. Secrets are synchronized
    /// first; if any changed and the template declares the cycle parameter,
    /// that parameter gets a fresh random value. In dry-run the change set
    /// is logged and discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not exist, an override names an
    /// undeclared parameter, secrets fail, the change set fails for a reason
    /// other than having no changes, or the update fails.
    pub async fn update(&self, overrides: &ParameterMap, force: &ForcePatterns, wait: bool) -> Result<UpdateReport> {
        if self.dry_run {
            info!("**** DRY RUN ****");
        }
        let template_keys = self.definition.template.parameter_names();
        check_declared(overrides, &template_keys)?;

        info!("Updating stack {}", self.name());
        let deployed_keys = self.deployed_parameters().await?;
        let volatile = resolve_volatile(
            self.volatile.as_deref(),
            VolatileContext {
                stack_name: self.name(),
                region: &self.definition.region,
            },
        )
        .await?;

        let mut parameters = resolve_for_update(UpdateInputs {
            template_keys: &template_keys,
            deployed_keys: &deployed_keys,
            defaults: &self.definition.parameter_defaults,
            volatile: &volatile,
            overrides,
        })?;

        let secrets_changed = self.secrets.update(force).await?;
        if secrets_changed
            && let Some(cycle) = &self.definition.cycle_if_different_parameter
            && template_keys.contains(cycle)
        {
            info!("Secrets changed, cycling {cycle}");
            parameters.insert(
                cycle.clone(),
                ParameterValue::Literal(Directive::RandomHex(CYCLE_VALUE_LEN).generate()?),
            );
        }

        let previewer = ChangePreviewer::new(self.services.engine.as_ref(), &self.poller);
        let request = ChangeSetRequest {
            stack_name: self.definition.name.clone(),
            change_set_name: change_set_name(self.name(), Utc::now()),
            template: self.services.templates.locate(&self.definition.template).await?,
            parameters,
            capabilities: self.capabilities(),
            tags: self.definition.tags.clone(),
        };

        let handle = match previewer.stage(&request).await? {
            StageOutcome::NoChanges => {
                info!("Stack {} is up to date", self.name());
                return Ok(UpdateReport::NoChanges);
            }
            StageOutcome::Ready(handle) => handle,
        };
        handle.log_summary();

        if self.dry_run {
            previewer.discard(&handle).await?;
            return Ok(UpdateReport::Previewed(handle.description));
        }

        previewer.commit(&handle).await?;
        self.invalidate();

        if !wait {
            return Ok(UpdateReport::Applied {
                changes: handle.description,
                wait: None,
                tags: None,
            });
        }

        let outcome = self.waiter().wait_for_update().await?;
        self.settle(&outcome).await?;
        let tags = self.sweep_tags(&outcome).await;

        Ok(UpdateReport::Applied {
            changes: handle.description,
            wait: Some(outcome),
            tags,
        })
    }

    /// Deletes the stack, then its secrets. Deleting a stack that does not
    /// exist only clears leftover secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the delete or it fails.
    pub async fn delete(&self, wait: bool) -> Result<Option<WaitOutcome>> {
        if self.dry_run {
            info!("**** DRY RUN ****");
        }

        let status = self.reader.refresh().await?;
        let mut outcome = None;

        if !status.exists() {
            info!("Stack {} does not exist", self.name());
        } else if self.dry_run {
            info!("Would delete stack {} ({status})", self.name());
        } else {
            info!("Deleting stack {} ({status})", self.name());
            self.services.engine.delete_stack(self.name()).await?;
            self.invalidate();

            if wait {
                let waited = self.waiter().wait_for_deletion().await?;
                self.settle(&waited).await?;
                outcome = Some(waited);
            }
        }

        self.secrets.delete().await?;
        Ok(outcome)
    }

    /// Reports the current status and recent failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be reached.
    pub async fn status(&self) -> Result<StatusReport> {
        self.reader.invalidate();
        self.reader.report().await
    }

    /// Returns the value of a stack output.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack or the output does not exist.
    pub async fn output_value(&self, key: &str) -> Result<String> {
        if self.dry_run {
            return Ok(DRY_RUN_OUTPUT.to_string());
        }

        let description = self
            .services
            .engine
            .describe_stack(self.name())
            .await?
            .ok_or_else(|| EngineError::StackNotFound {
                stack_name: self.name().to_string(),
            })?;

        description.outputs.get(key).cloned().ok_or_else(|| {
            EngineError::OutputNotFound {
                stack_name: self.name().to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Fetches the template the deployed stack was last updated with.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not exist or the body is not a
    /// template document.
    pub async fn deployed_template(&self) -> Result<Template> {
        let body = self.services.engine.template_body(self.name()).await?;
        Template::from_body(self.name(), body)
    }

    /// Returns a waiter on this stack.
    #[must_use]
    pub const fn waiter(&self) -> StackWaiter<'_> {
        StackWaiter::new(&self.reader, &self.poller)
    }

    /// Returns the names of the parameters the deployed stack has. Cached
    /// until the next mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not exist.
    pub async fn deployed_parameters(&self) -> Result<BTreeSet<String>> {
        if let Some(cached) = self.deployed_parameters.lock().ok().and_then(|c| c.clone()) {
            return Ok(cached);
        }

        let description = self
            .services
            .engine
            .describe_stack(self.name())
            .await?
            .ok_or_else(|| EngineError::StackNotFound {
                stack_name: self.name().to_string(),
            })?;
        let keys: BTreeSet<String> = description.parameters.into_keys().collect();

        if let Ok(mut cache) = self.deployed_parameters.lock() {
            *cache = Some(keys.clone());
        }
        Ok(keys)
    }

    fn invalidate(&self) {
        self.reader.invalidate();
        if let Ok(mut cache) = self.deployed_parameters.lock() {
            *cache = None;
        }
    }

    async fn settle(&self, outcome: &WaitOutcome) -> Result<()> {
        let status = outcome_status(outcome);
        if !status.is_failed() && !status.is_rolled_back() {
            return Ok(());
        }

        let failed_events = self
            .reader
            .failed_events()
            .await?
            .iter()
            .map(describe_event)
            .collect();
        Err(WaitError::Failed {
            stack_name: self.name().to_string(),
            status: status.to_string(),
            failed_events,
        }
        .into())
    }

    async fn sweep_tags(&self, outcome: &WaitOutcome) -> Option<TagReconcileReport> {
        let tagger = self.tagger.as_ref()?;
        if self.definition.tags.is_empty() || !outcome_status(outcome).exists() {
            return None;
        }

        let report = match self.services.engine.stack_resources(self.name()).await {
            Ok(resources) => tagger.reconcile(&resources, &self.definition.tags).await,
            Err(e) => {
                warn!("Could not list resources of {} for tagging: {e}", self.name());
                TagReconcileReport {
                    failed: vec![(self.name().to_string(), e.to_string())],
                    ..TagReconcileReport::default()
                }
            }
        };
        if !report.is_clean() {
            warn!("Could not tag {} resource(s) of {}", report.failed.len(), self.name());
        }
        debug!("Tag sweep on {}: {report:?}", self.name());
        Some(report)
    }
}

const fn outcome_status(outcome: &WaitOutcome) -> &StackStatus {
    match outcome {
        WaitOutcome::Completed(status) | WaitOutcome::NotInProgress(status) => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        ChangeSetStatus, MockOrchestrationEngine, ResourceChange, StackDescription, StackResource,
        TemplateLocation,
    };
    use crate::secrets::{MockSecretStore, SecretNamespace, Secrets, SecretsSpecification};
    use crate::tags::{MockResourceTagging, MockTaggableResource};
    use crate::template::InlineTemplateStore;
    use crate::wait::sleeper::testing::RecordingSleeper;
    use std::collections::BTreeMap;

    const TEMPLATE: &str = r"
Parameters:
  EnvName:
    Type: String
  ImageId:
    Type: String
  CycleToken:
    Type: String
Resources:
  Alarm:
    Type: AWS::CloudWatch::Alarm
";

    fn definition() -> StackDefinition {
        StackDefinition {
            name: String::from("qa-tutor-web"),
            region: String::from("us-east-1"),
            template: Template::from_body("web", TEMPLATE).expect("template"),
            capabilities: None,
            parameter_defaults: BTreeMap::from([
                (String::from("EnvName"), Some(String::from("qa"))),
                (String::from("ImageId"), None),
            ]),
            tags: vec![Tag::new("Env", "qa").expect("tag")],
            enable_termination_protection: false,
            cycle_if_different_parameter: Some(String::from("CycleToken")),
        }
    }

    fn services(engine: MockOrchestrationEngine, tagging: Option<MockResourceTagging>) -> StackServices {
        let mut settings = Settings::default();
        settings.waiter.delay_secs = 1;
        settings.waiter.max_attempts = 5;
        settings.waiter.status_cache_secs = 0;

        StackServices {
            engine: Arc::new(engine),
            templates: Arc::new(InlineTemplateStore),
            tagging: tagging.map(|t| Arc::new(t) as Arc<dyn ResourceTagging>),
            sleeper: Arc::new(RecordingSleeper::default()),
            settings,
        }
    }

    fn deployed(parameters: &[&str]) -> StackDescription {
        StackDescription {
            stack_name: String::from("qa-tutor-web"),
            status: Some(StackStatus::UpdateComplete),
            parameters: parameters.iter().map(|p| ((*p).to_string(), String::from("x"))).collect(),
            outputs: BTreeMap::from([(String::from("Url"), String::from("https://qa.example.com"))]),
            ..StackDescription::default()
        }
    }

    fn change_set(status: ChangeSetStatus, reason: Option<&str>) -> ChangeSetDescription {
        ChangeSetDescription {
            id: String::from("cs-1"),
            status,
            status_reason: reason.map(str::to_string),
            changes: vec![ResourceChange {
                action: String::from("Modify"),
                logical_resource_id: String::from("Alarm"),
                resource_type: String::from("AWS::CloudWatch::Alarm"),
                replacement: Some(String::from("False")),
                scope: vec![String::from("Properties")],
                causes: Vec::new(),
            }],
            parameters: ParameterSet::new(),
        }
    }

    #[tokio::test]
    async fn test_create_waits_and_sweeps_tags() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_create_stack()
            .withf(|request: &CreateStackRequest| {
                request.parameters.get("EnvName") == Some(&ParameterValue::Literal(String::from("qa")))
                    && request.parameters.get("ImageId") == Some(&ParameterValue::Literal(String::from("ami-1")))
                    && matches!(request.template, TemplateLocation::Body(_))
                    && request.capabilities.is_empty()
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut statuses = vec![StackStatus::CreateComplete, StackStatus::CreateInProgress];
        engine
            .expect_stack_status()
            .returning(move |_| Ok(statuses.pop().unwrap_or(StackStatus::CreateComplete)));
        engine.expect_stack_resources().returning(|_| {
            Ok(vec![StackResource {
                logical_resource_id: String::from("Alarm"),
                physical_resource_id: Some(String::from("qa-alarm")),
                resource_type: String::from("AWS::CloudWatch::Alarm"),
            }])
        });

        let mut tagging = MockResourceTagging::new();
        tagging.expect_resource().returning(|_| {
            let mut alarm = MockTaggableResource::new();
            alarm.expect_identifier().return_const(String::from("alarm qa-alarm"));
            alarm.expect_tags().returning(|| Ok(Vec::new()));
            alarm.expect_apply_tags().times(1).returning(|_| Ok(()));
            Some(Box::new(alarm))
        });

        let stack = Stack::new(definition(), services(engine, Some(tagging))).expect("stack");
        let overrides = BTreeMap::from([(String::from("ImageId"), Some(String::from("ami-1")))]);
        let report = stack.create(&overrides, true).await.expect("create");

        assert_eq!(report.wait, Some(WaitOutcome::Completed(StackStatus::CreateComplete)));
        assert_eq!(report.tags.expect("tag report").tagged, vec![String::from("alarm qa-alarm")]);
    }

    #[tokio::test]
    async fn test_create_survives_resource_listing_failure() {
        let mut engine = MockOrchestrationEngine::new();
        engine.expect_create_stack().times(1).returning(|_| Ok(()));
        let mut statuses = vec![StackStatus::CreateComplete, StackStatus::CreateInProgress];
        engine
            .expect_stack_status()
            .returning(move |_| Ok(statuses.pop().unwrap_or(StackStatus::CreateComplete)));
        engine
            .expect_stack_resources()
            .returning(|_| Err(EngineError::api("ListStackResources", "Rate exceeded").into()));

        let mut tagging = MockResourceTagging::new();
        tagging.expect_resource().never();

        let stack = Stack::new(definition(), services(engine, Some(tagging))).expect("stack");
        let overrides = BTreeMap::from([(String::from("ImageId"), Some(String::from("ami-1")))]);
        let report = stack.create(&overrides, true).await.expect("create succeeds");

        assert_eq!(report.wait, Some(WaitOutcome::Completed(StackStatus::CreateComplete)));
        let tags = report.tags.expect("tag report");
        assert!(!tags.is_clean());
        assert_eq!(tags.failed[0].0, "qa-tutor-web");
        assert!(tags.failed[0].1.contains("Rate exceeded"));
    }

    #[tokio::test]
    async fn test_create_failure_reports_events() {
        let mut engine = MockOrchestrationEngine::new();
        engine.expect_create_stack().returning(|_| Ok(()));
        engine
            .expect_stack_status()
            .returning(|_| Ok(StackStatus::RollbackComplete));
        engine.expect_stack_events().returning(|_| {
            Ok(vec![crate::engine::StackEvent {
                logical_resource_id: Some(String::from("Alarm")),
                resource_type: None,
                resource_status: Some(String::from("CREATE_FAILED")),
                resource_status_reason: Some(String::from("bad metric")),
                timestamp: None,
            }])
        });

        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        let err = stack.create(&ParameterMap::new(), true).await.expect_err("should fail");
        assert!(err.to_string().contains("ROLLBACK_COMPLETE: Alarm: bad metric"));
    }

    #[tokio::test]
    async fn test_deployed_template() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_template_body()
            .withf(|name| name == "qa-tutor-web")
            .returning(|_| Ok(String::from("Parameters:\n  Old:\n    Type: String\nResources: {}\n")));

        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        let template = stack.deployed_template().await.expect("template");
        assert_eq!(template.source_name(), "qa-tutor-web");
        assert!(template.parameter_names().contains("Old"));
    }

    #[tokio::test]
    async fn test_update_dry_run_discards() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_describe_stack()
            .times(1)
            .returning(|_| Ok(Some(deployed(&["EnvName", "ImageId"]))));
        engine
            .expect_create_change_set()
            .withf(|request: &ChangeSetRequest| {
                request.parameters.get("EnvName") == Some(&ParameterValue::UsePrevious)
                    && request.parameters.get("ImageId") == Some(&ParameterValue::Literal(String::from("ami-2")))
                    && request.parameters.get("CycleToken").is_none()
            })
            .returning(|_| Ok(String::from("cs-1")));
        engine
            .expect_describe_change_set()
            .returning(|_| Ok(change_set(ChangeSetStatus::Complete, None)));
        engine.expect_delete_change_set().times(1).returning(|_| Ok(()));
        engine.expect_execute_change_set().never();

        let stack = Stack::new(definition(), services(engine, None)).expect("stack").dry_run(true);
        let overrides = BTreeMap::from([(String::from("ImageId"), Some(String::from("ami-2")))]);
        let report = stack
            .update(&overrides, &ForcePatterns::default(), true)
            .await
            .expect("update");

        assert!(matches!(report, UpdateReport::Previewed(_)));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_override_before_remote_calls() {
        let engine = MockOrchestrationEngine::new();
        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        let overrides = BTreeMap::from([(String::from("Typo"), Some(String::from("1")))]);

        let err = stack
            .update(&overrides, &ForcePatterns::default(), false)
            .await
            .expect_err("should fail");
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_update_cycles_parameter_when_secrets_change() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_describe_stack()
            .returning(|_| Ok(Some(deployed(&["EnvName", "ImageId", "CycleToken"]))));
        engine
            .expect_create_change_set()
            .withf(|request: &ChangeSetRequest| {
                request
                    .parameters
                    .get("CycleToken")
                    .and_then(ParameterValue::literal)
                    .is_some_and(|v| v.len() == CYCLE_VALUE_LEN)
            })
            .returning(|_| Ok(String::from("cs-1")));
        engine
            .expect_describe_change_set()
            .returning(|_| Ok(change_set(ChangeSetStatus::Complete, None)));
        engine.expect_execute_change_set().times(1).returning(|_| Ok(()));

        let mut store = MockSecretStore::new();
        store.expect_list().returning(|_| Ok(Vec::new()));
        store.expect_put().times(1).returning(|_| Ok(()));
        let namespace = SecretNamespace::for_block(Some("qa"), "qa-tutor-web", None).expect("namespace");
        let spec = SecretsSpecification::from_content("inline", "token: abc", None).expect("spec");
        let secrets = SecretsSet::new(vec![Secrets::new(namespace, vec![spec], Arc::new(store))]);

        let stack = Stack::new(definition(), services(engine, None))
            .expect("stack")
            .with_secrets(secrets);
        let report = stack
            .update(&ParameterMap::new(), &ForcePatterns::default(), false)
            .await
            .expect("update");

        assert!(matches!(report, UpdateReport::Applied { wait: None, .. }));
    }

    #[tokio::test]
    async fn test_update_with_no_changes() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_describe_stack()
            .returning(|_| Ok(Some(deployed(&["EnvName", "ImageId", "CycleToken"]))));
        engine.expect_create_change_set().returning(|_| Ok(String::from("cs-1")));
        engine.expect_describe_change_set().returning(|_| {
            Ok(change_set(
                ChangeSetStatus::Failed,
                Some("The submitted information didn't contain changes."),
            ))
        });
        engine.expect_delete_change_set().times(1).returning(|_| Ok(()));

        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        let report = stack
            .update(&ParameterMap::new(), &ForcePatterns::default(), true)
            .await
            .expect("update");
        assert!(matches!(report, UpdateReport::NoChanges));
    }

    #[tokio::test]
    async fn test_delete_missing_stack_is_a_no_op() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_stack_status()
            .returning(|_| Ok(StackStatus::DoesNotExist));
        engine.expect_delete_stack().never();

        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        assert_eq!(stack.delete(true).await.expect("delete"), None);
    }

    #[tokio::test]
    async fn test_delete_waits_then_removes_secrets() {
        let mut engine = MockOrchestrationEngine::new();
        let mut statuses = vec![StackStatus::DoesNotExist, StackStatus::DeleteInProgress, StackStatus::UpdateComplete];
        engine
            .expect_stack_status()
            .returning(move |_| Ok(statuses.pop().unwrap_or(StackStatus::DoesNotExist)));
        engine.expect_delete_stack().times(1).returning(|_| Ok(()));

        let mut store = MockSecretStore::new();
        store
            .expect_list()
            .returning(|prefix| {
                Ok(vec![crate::secrets::StoredSecret {
                    path: format!("{prefix}/token"),
                    value: String::from("v"),
                    kind: crate::secrets::SecretType::SecureString,
                    description: None,
                }])
            });
        store.expect_delete().times(1).returning(|_| Ok(Vec::new()));
        let namespace = SecretNamespace::for_block(Some("qa"), "qa-tutor-web", None).expect("namespace");
        let secrets = SecretsSet::new(vec![Secrets::new(namespace, Vec::new(), Arc::new(store))]);

        let stack = Stack::new(definition(), services(engine, None))
            .expect("stack")
            .with_secrets(secrets);
        assert_eq!(
            stack.delete(true).await.expect("delete"),
            Some(WaitOutcome::Completed(StackStatus::DoesNotExist))
        );
    }

    #[tokio::test]
    async fn test_output_value() {
        let mut engine = MockOrchestrationEngine::new();
        engine
            .expect_describe_stack()
            .returning(|_| Ok(Some(deployed(&[]))));

        let stack = Stack::new(definition(), services(engine, None)).expect("stack");
        assert_eq!(stack.output_value("Url").await.expect("output"), "https://qa.example.com");
        assert!(stack.output_value("Missing").await.is_err());

        let dry = Stack::new(definition(), services(MockOrchestrationEngine::new(), None))
            .expect("stack")
            .dry_run(true);
        assert_eq!(dry.output_value("Url").await.expect("output"), DRY_RUN_OUTPUT);
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let mut definition = definition();
        definition.name = String::from(" ");
        assert!(Stack::new(definition, services(MockOrchestrationEngine::new(), None)).is_err());
    }
}
