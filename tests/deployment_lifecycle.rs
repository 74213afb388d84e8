//! End-to-end lifecycle of a deployment against in-memory engine and store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stackdeploy::config::{ConfigParser, Settings};
use stackdeploy::deployment::{Deployment, DeploymentServices};
use stackdeploy::engine::{
    ChangeSetDescription, ChangeSetRequest, ChangeSetStatus, CreateStackRequest, OrchestrationEngine, ResourceChange,
    StackDescription, StackEvent, StackResource, StackStatus,
};
use stackdeploy::error::Result;
use stackdeploy::parameters::{ParameterMap, ParameterSet, ParameterValue};
use stackdeploy::secrets::{ArtifactSource, ForcePatterns, SecretEntry, SecretStore, StoredSecret};
use stackdeploy::stack::{StackServices, UpdateReport};
use stackdeploy::template::InlineTemplateStore;
use stackdeploy::volatile::CapacityReader;
use stackdeploy::wait::Sleeper;

const TEMPLATE: &str = r"
Parameters:
  a:
    Type: String
  b:
    Type: String
  c:
    Type: String
Resources:
  Queue:
    Type: AWS::SQS::Queue
";

#[derive(Debug, Default)]
struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

#[derive(Debug, Clone)]
struct FakeStack {
    status: StackStatus,
    parameters: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeEngine {
    stacks: Mutex<HashMap<String, FakeStack>>,
    change_sets: Mutex<HashMap<String, (String, ChangeSetDescription)>>,
}

impl FakeEngine {
    fn parameters(&self, stack_name: &str) -> BTreeMap<String, String> {
        self.stacks.lock().unwrap()[stack_name].parameters.clone()
    }

    fn pending_change_sets(&self) -> usize {
        self.change_sets.lock().unwrap().len()
    }
}

fn apply(previous: &BTreeMap<String, String>, parameters: &ParameterSet) -> BTreeMap<String, String> {
    parameters
        .iter()
        .filter_map(|(key, value)| match value {
            ParameterValue::Literal(v) => Some((key.clone(), v.clone())),
            ParameterValue::UsePrevious => previous.get(key).map(|v| (key.clone(), v.clone())),
        })
        .collect()
}

#[async_trait]
impl OrchestrationEngine for FakeEngine {
    async fn stack_status(&self, stack_name: &str) -> Result<StackStatus> {
        Ok(self
            .stacks
            .lock()
            .unwrap()
            .get(stack_name)
            .map_or(StackStatus::DoesNotExist, |s| s.status.clone()))
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        Ok(self.stacks.lock().unwrap().get(stack_name).map(|s| StackDescription {
            stack_name: stack_name.to_string(),
            status: Some(s.status.clone()),
            parameters: s.parameters.clone(),
            outputs: BTreeMap::from([(String::from("QueueUrl"), format!("https://sqs/{stack_name}"))]),
            ..StackDescription::default()
        }))
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<()> {
        self.stacks.lock().unwrap().insert(
            request.stack_name.clone(),
            FakeStack {
                status: StackStatus::CreateComplete,
                parameters: apply(&BTreeMap::new(), &request.parameters),
            },
        );
        Ok(())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<()> {
        self.stacks.lock().unwrap().remove(stack_name);
        Ok(())
    }

    async fn create_change_set(&self, request: &ChangeSetRequest) -> Result<String> {
        let previous = self.parameters(&request.stack_name);
        let changed = apply(&previous, &request.parameters) != previous;
        let id = format!("cs-{}", self.change_sets.lock().unwrap().len() + 1);

        let description = ChangeSetDescription {
            id: id.clone(),
            status: if changed {
                ChangeSetStatus::Complete
            } else {
                ChangeSetStatus::Failed
            },
            status_reason: (!changed).then(|| String::from("The submitted information didn't contain changes.")),
            changes: if changed {
                vec![ResourceChange {
                    action: String::from("Modify"),
                    logical_resource_id: String::from("Queue"),
                    resource_type: String::from("AWS::SQS::Queue"),
                    replacement: Some(String::from("False")),
                    scope: vec![String::from("Properties")],
                    causes: Vec::new(),
                }]
            } else {
                Vec::new()
            },
            parameters: request.parameters.clone(),
        };
        self.change_sets
            .lock()
            .unwrap()
            .insert(id.clone(), (request.stack_name.clone(), description));
        Ok(id)
    }

    async fn describe_change_set(&self, change_set_id: &str) -> Result<ChangeSetDescription> {
        Ok(self.change_sets.lock().unwrap()[change_set_id].1.clone())
    }

    async fn execute_change_set(&self, change_set_id: &str) -> Result<()> {
        let (stack_name, description) = self.change_sets.lock().unwrap().remove(change_set_id).unwrap();
        let mut stacks = self.stacks.lock().unwrap();
        let stack = stacks.get_mut(&stack_name).unwrap();
        stack.parameters = apply(&stack.parameters, &description.parameters);
        stack.status = StackStatus::UpdateComplete;
        Ok(())
    }

    async fn delete_change_set(&self, change_set_id: &str) -> Result<()> {
        self.change_sets.lock().unwrap().remove(change_set_id);
        Ok(())
    }

    async fn stack_events(&self, _stack_name: &str) -> Result<Vec<StackEvent>> {
        Ok(Vec::new())
    }

    async fn stack_resources(&self, _stack_name: &str) -> Result<Vec<StackResource>> {
        Ok(Vec::new())
    }

    async fn template_body(&self, _stack_name: &str) -> Result<String> {
        Ok(TEMPLATE.to_string())
    }
}

#[derive(Debug, Default)]
struct FakeStore {
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
    puts: Mutex<usize>,
}

impl FakeStore {
    fn value(&self, path: &str) -> Option<String> {
        self.secrets.lock().unwrap().get(path).map(|s| s.value.clone())
    }

    fn len(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    fn puts(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn get(&self, path: &str) -> Result<Option<StoredSecret>> {
        Ok(self.secrets.lock().unwrap().get(path).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<StoredSecret>> {
        let scope = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.path.starts_with(&scope))
            .cloned()
            .collect())
    }

    async fn put(&self, entry: &SecretEntry) -> Result<()> {
        *self.puts.lock().unwrap() += 1;
        self.secrets.lock().unwrap().insert(
            entry.path.clone(),
            StoredSecret {
                path: entry.path.clone(),
                value: entry.value.clone(),
                kind: entry.kind,
                description: entry.description.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, paths: &[String]) -> Result<Vec<String>> {
        let mut secrets = self.secrets.lock().unwrap();
        Ok(paths
            .iter()
            .filter(|path| secrets.remove(path.as_str()).is_none())
            .cloned()
            .collect())
    }
}

struct NoArtifacts;

#[async_trait]
impl ArtifactSource for NoArtifacts {
    async fn fetch(&self, org_slash_repo: &str, _sha: &str, _path: &str) -> Result<String> {
        Err(stackdeploy::error::DeployError::internal(format!("no access to {org_slash_repo}")))
    }
}

struct NoCapacity;

#[async_trait]
impl CapacityReader for NoCapacity {
    async fn desired_capacity(&self, _group_name: &str) -> Result<Option<i32>> {
        Ok(None)
    }
}

fn config_yaml(domain: &str) -> String {
    format!(
        r#"
deployment:
  name: tutor
  env_name: qa
  region: us-east-1
settings:
  secret_put_delay_ms: 0
stacks:
  - id: web
    parameter_defaults:
      a: "0"
      b: x
    cycle_if_different_parameter: c
    secrets:
      - id: app
        specifications:
          - from: inline
            content:
              api_key: random(hex,8)
              url: "https://{{{{ domain }}}}"
        substitutions:
          domain: {domain}
"#
    )
}

async fn deployment(
    dir: &Path,
    engine: &Arc<FakeEngine>,
    store: &Arc<FakeStore>,
    domain: &str,
    dry_run: bool,
) -> Deployment {
    let config = ConfigParser::new()
        .parse_yaml(&config_yaml(domain), None)
        .expect("config");

    let services = DeploymentServices {
        stack: StackServices {
            engine: Arc::clone(engine) as Arc<dyn OrchestrationEngine>,
            templates: Arc::new(InlineTemplateStore),
            tagging: None,
            sleeper: Arc::new(NoSleep),
            settings: Settings {
                secret_put_delay_ms: 0,
                ..Settings::default()
            },
        },
        secret_store: Arc::clone(store) as Arc<dyn SecretStore>,
        artifacts: Arc::new(NoArtifacts),
        capacity: Arc::new(NoCapacity),
    };

    Deployment::from_config(&config, dir, services, dry_run)
        .await
        .expect("deployment")
}

fn one(key: &str, value: &str) -> ParameterMap {
    BTreeMap::from([(key.to_string(), Some(value.to_string()))])
}

#[tokio::test]
async fn test_create_preview_update_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("templates")).expect("mkdir");
    std::fs::write(dir.path().join("templates/web.yml"), TEMPLATE).expect("write");

    let engine = Arc::new(FakeEngine::default());
    let store = Arc::new(FakeStore::default());
    let stack_name = "qa-tutor-web";
    let url_path = "/qa/qa-tutor-web/app/url";
    let key_path = "/qa/qa-tutor-web/app/api_key";

    // Create with an override: defaults fill the rest.
    let live = deployment(dir.path(), &engine, &store, "example.com", false).await;
    let created = live.create(&[], &one("a", "1"), false).await.expect("create");
    assert_eq!(created.len(), 1);
    assert_eq!(
        engine.parameters(stack_name),
        BTreeMap::from([
            (String::from("a"), String::from("1")),
            (String::from("b"), String::from("x")),
        ])
    );
    assert_eq!(store.value(url_path).as_deref(), Some("https://example.com"));
    let api_key = store.value(key_path).expect("generated key");
    assert_eq!(api_key.len(), 8);

    // Preview: only the override changes; nothing is written.
    let preview = deployment(dir.path(), &engine, &store, "example.com", true).await;
    let reports = preview
        .update(&[], &one("a", "2"), &ForcePatterns::default(), false)
        .await
        .expect("preview");
    let UpdateReport::Previewed(changes) = &reports[0].1 else {
        panic!("expected a preview, got {:?}", reports[0].1);
    };
    assert_eq!(
        changes.parameter_value("a"),
        Some(&ParameterValue::Literal(String::from("2")))
    );
    assert_eq!(changes.parameter_value("b"), Some(&ParameterValue::UsePrevious));
    assert_eq!(changes.parameter_value("c"), None);
    assert_eq!(engine.pending_change_sets(), 0);
    assert_eq!(engine.parameters(stack_name)["a"], "1");

    // Apply with a changed substitution: the secret is rewritten, the
    // generated key is kept, and the cycle parameter gets a fresh value.
    let puts_before = store.puts();
    let changed = deployment(dir.path(), &engine, &store, "example.org", false).await;
    let reports = changed
        .update(&[], &one("a", "2"), &ForcePatterns::default(), false)
        .await
        .expect("update");
    assert!(matches!(reports[0].1, UpdateReport::Applied { .. }));
    assert_eq!(store.puts(), puts_before + 1);
    assert_eq!(store.value(url_path).as_deref(), Some("https://example.org"));
    assert_eq!(store.value(key_path), Some(api_key));

    let deployed = engine.parameters(stack_name);
    assert_eq!(deployed["a"], "2");
    assert_eq!(deployed["b"], "x");
    assert_eq!(deployed["c"].len(), 16);

    let status = changed.status(&[]).await.expect("status");
    assert_eq!(status[0].status, StackStatus::UpdateComplete);

    let web = changed.stack("web").expect("web");
    assert_eq!(
        web.output_value("QueueUrl").await.expect("output"),
        "https://sqs/qa-tutor-web"
    );

    // Delete removes the stack and every secret; a second delete is a no-op.
    changed.delete(&[], false).await.expect("delete");
    assert_eq!(engine.stack_status(stack_name).await.expect("status"), StackStatus::DoesNotExist);
    assert_eq!(store.len(), 0);
    changed.delete(&[], false).await.expect("second delete");
}

#[tokio::test]
async fn test_update_without_changes() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("templates")).expect("mkdir");
    std::fs::write(dir.path().join("templates/web.yml"), TEMPLATE).expect("write");

    let engine = Arc::new(FakeEngine::default());
    let store = Arc::new(FakeStore::default());

    let live = deployment(dir.path(), &engine, &store, "example.com", false).await;
    live.create(&[], &ParameterMap::new(), false).await.expect("create");

    let reports = live
        .update(&[], &ParameterMap::new(), &ForcePatterns::default(), false)
        .await
        .expect("update");
    assert!(matches!(reports[0].1, UpdateReport::NoChanges));
    assert_eq!(engine.pending_change_sets(), 0);

    let err = live
        .update(&[], &one("missing", "1"), &ForcePatterns::default(), false)
        .await
        .expect_err("undeclared override");
    assert!(err.is_validation());
}
