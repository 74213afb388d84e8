//! Stack templates and where the engine reads them from.
//!
//! Templates are parsed only far enough to learn their parameter names and
//! whether they declare IAM resources. Bodies are uploaded once per
//! invocation to the template bucket, or passed inline without one.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::engine::{Capability, TemplateLocation};
use crate::error::{ConfigError, EngineError, Result};

/// File extensions recognised as templates, in lookup order.
pub const TEMPLATE_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Resource type prefix that requires `CAPABILITY_NAMED_IAM`.
const IAM_RESOURCE_PREFIX: &str = "AWS::IAM::";

/// A parsed stack template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source_name: String,
    file_name: String,
    body: String,
    document: Value,
}

impl Template {
    /// Reads a template file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source_name = path.display().to_string();
        let body = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidTemplate {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;

        let mut template = Self::from_body(source_name, body)?;
        if let Some(name) = path.file_name() {
            template.file_name = name.to_string_lossy().into_owned();
        }
        Ok(template)
    }

    /// Parses a template body, e.g. the one the engine reports for a
    /// deployed stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is neither YAML nor JSON, or is not a
    /// mapping.
    pub fn from_body(source_name: impl Into<String>, body: impl Into<String>) -> Result<Self> {
        let source_name = source_name.into();
        let body = body.into();

        let document: Value = serde_yaml::from_str(&body).map_err(|e| ConfigError::InvalidTemplate {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;
        if !document.is_mapping() {
            return Err(ConfigError::InvalidTemplate {
                source_name,
                message: String::from("template must be a mapping"),
            }
            .into());
        }

        Ok(Self {
            file_name: String::from("template.yml"),
            source_name,
            body,
            document,
        })
    }

    /// Returns where the template came from.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Returns the file name used when uploading.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Returns the names of the declared parameters.
    #[must_use]
    pub fn parameter_names(&self) -> BTreeSet<String> {
        self.document
            .get("Parameters")
            .and_then(Value::as_mapping)
            .map(|params| {
                params
                    .keys()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the capabilities the template needs acknowledged.
    #[must_use]
    pub fn required_capabilities(&self) -> Vec<Capability> {
        let declares_iam = self
            .document
            .get("Resources")
            .and_then(Value::as_mapping)
            .is_some_and(|resources| {
                resources.values().any(|resource| {
                    resource
                        .get("Type")
                        .and_then(Value::as_str)
                        .is_some_and(|t| t.starts_with(IAM_RESOURCE_PREFIX))
                })
            });

        if declares_iam {
            vec![Capability::NamedIam]
        } else {
            Vec::new()
        }
    }
}

/// Finds `<directory>/<id>.yml`, `.yaml` or `.json`.
#[must_use]
pub fn find_template(directory: &Path, id: &str) -> Option<std::path::PathBuf> {
    TEMPLATE_EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{id}.{ext}")))
        .find(|path| path.is_file())
}

/// Hands templates to the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Returns where the engine should read the template from, uploading
    /// it first if needed.
    async fn locate(&self, template: &Template) -> Result<TemplateLocation>;
}

/// Passes template bodies inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTemplateStore;

#[async_trait]
impl TemplateStore for InlineTemplateStore {
    async fn locate(&self, template: &Template) -> Result<TemplateLocation> {
        Ok(TemplateLocation::Body(template.body().to_string()))
    }
}

/// Uploads templates to an S3 bucket.
#[derive(Debug)]
pub struct S3TemplateStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    folder: Option<String>,
    /// URLs of templates already uploaded, by source name.
    uploaded: Mutex<HashMap<String, String>>,
}

impl S3TemplateStore {
    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, folder: Option<&str>) -> Self {
        let folder = folder
            .map(|f| f.trim_matches('/').to_string())
            .filter(|f| !f.is_empty());

        Self {
            client,
            bucket: bucket.to_string(),
            folder,
            uploaded: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a store from shared SDK configuration, optionally pinned to
    /// the bucket's region.
    #[must_use]
    pub fn from_sdk_config(config: &SdkConfig, bucket: &str, folder: Option<&str>, region: Option<&str>) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(config);
        if let Some(region) = region {
            builder = builder.region(aws_sdk_s3::config::Region::new(region.to_string()));
        }
        Self::with_client(Client::from_conf(builder.build()), bucket, folder)
    }

    fn url(&self, key: &str) -> String {
        format!("https://s3.amazonaws.com/{}/{key}", self.bucket)
    }
}

/// Builds the object key for an upload: `<folder>/<timestamp>_<suffix>/<file>`.
#[must_use]
pub fn upload_key(folder: Option<&str>, now: DateTime<Utc>, suffix: &str, file_name: &str) -> String {
    let unique = format!("{}_{suffix}", now.format("%Y%m%d_%H%M%S"));
    folder
        .into_iter()
        .chain([unique.as_str(), file_name])
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl TemplateStore for S3TemplateStore {
    async fn locate(&self, template: &Template) -> Result<TemplateLocation> {
        let cached = self
            .uploaded
            .lock()
            .ok()
            .and_then(|uploaded| uploaded.get(template.source_name()).cloned());
        if let Some(url) = cached {
            debug!("Template {} already uploaded", template.source_name());
            return Ok(TemplateLocation::Url(url));
        }

        let suffix = format!("{:08x}", rand::thread_rng().r#gen::<u32>());
        let key = upload_key(self.folder.as_deref(), Utc::now(), &suffix, template.file_name());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(template.body().as_bytes().to_vec().into())
            .send()
            .await
            .map_err(|e| EngineError::TemplateUpload {
                message: format!("{}", DisplayErrorContext(e)),
            })?;

        let url = self.url(&key);
        info!("Uploaded {} to {url}", template.source_name());

        if let Ok(mut uploaded) = self.uploaded.lock() {
            uploaded.insert(template.source_name().to_string(), url.clone());
        }
        Ok(TemplateLocation::Url(url))
    }
}
