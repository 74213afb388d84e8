//! Building and synchronizing blocks of secrets.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SecretError};
use crate::wait::Sleeper;

use super::diff::{ForcePatterns, entries_to_write};
use super::directive::{Directive, Reference, interpolate};
use super::entry::{SecretEntry, SecretType, StoredSecret, generated_description};
use super::specification::{SecretsSpecification, SpecValue};
use super::store::{MAX_DELETE_BATCH, SecretStore};

/// Path prefix under which a block's secrets live, e.g. `/qa/tutor-app/web`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNamespace {
    segments: Vec<String>,
}

impl SecretNamespace {
    /// Creates a namespace from explicit segments.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no segments or any segment is blank or
    /// contains `/`.
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();

        if segments.is_empty() {
            return Err(invalid_namespace("at least one segment is required"));
        }
        for segment in &segments {
            if segment.trim().is_empty() {
                return Err(invalid_namespace("segments cannot be blank"));
            }
            if segment.contains('/') {
                return Err(invalid_namespace(&format!("segment '{segment}' cannot contain '/'")));
            }
        }

        Ok(Self { segments })
    }

    /// Builds the namespace for a block of a stack: environment, unit name
    /// and block id, skipping the environment and block id when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit name is blank.
    pub fn for_block(env_name: Option<&str>, unit_name: &str, block_id: Option<&str>) -> Result<Self> {
        let segments: Vec<&str> = present(env_name)
            .into_iter()
            .chain(std::iter::once(unit_name))
            .chain(present(block_id))
            .collect();
        Self::new(segments)
    }

    /// Returns `/<segment>/<segment>...`.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// Returns the full path of a local secret name.
    #[must_use]
    pub fn path(&self, local_name: &str) -> String {
        format!("{}/{}", self.key_prefix(), local_name.trim_start_matches('/'))
    }
}

fn present(segment: Option<&str>) -> Option<&str> {
    segment.map(str::trim).filter(|s| !s.is_empty())
}

fn invalid_namespace(message: &str) -> crate::error::DeployError {
    SecretError::InvalidNamespace {
        message: message.to_string(),
    }
    .into()
}

/// A block of secrets built from one or more specifications.
pub struct Secrets {
    namespace: SecretNamespace,
    specifications: Vec<SecretsSpecification>,
    substitutions: BTreeMap<String, String>,
    force: ForcePatterns,
    store: Arc<dyn SecretStore>,
    sleeper: Option<(Arc<dyn Sleeper>, Duration)>,
    dry_run: bool,
    cache: Mutex<Option<BTreeMap<String, StoredSecret>>>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("namespace", &self.namespace)
            .field("specifications", &self.specifications.len())
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// A flattened leaf after parsing, before evaluation.
enum Planned {
    Scalar(Directive, String),
    List(Vec<(Directive, String)>),
}

impl Secrets {
    /// Creates a block.
    #[must_use]
    pub fn new(
        namespace: SecretNamespace,
        specifications: Vec<SecretsSpecification>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            namespace,
            specifications,
            substitutions: BTreeMap::new(),
            force: ForcePatterns::default(),
            store,
            sleeper: None,
            dry_run: false,
            cache: Mutex::new(None),
        }
    }

    /// Sets the substitutions for `{{ name }}` tokens and `ssm(name)`.
    #[must_use]
    pub fn with_substitutions(mut self, substitutions: BTreeMap<String, String>) -> Self {
        self.substitutions = substitutions;
        self
    }

    /// Sets the patterns that are always written on update.
    #[must_use]
    pub fn with_force_update(mut self, force: ForcePatterns) -> Self {
        self.force = force;
        self
    }

    /// Pauses between writes on create.
    #[must_use]
    pub fn with_put_delay(mut self, sleeper: Arc<dyn Sleeper>, delay: Duration) -> Self {
        self.sleeper = Some((sleeper, delay));
        self
    }

    /// Logs writes and deletes instead of performing them.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the namespace.
    #[must_use]
    pub const fn namespace(&self) -> &SecretNamespace {
        &self.namespace
    }

    /// Returns the path prefix of every secret in this block.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        self.namespace.key_prefix()
    }

    /// Builds every entry. Later specifications override earlier ones at
    /// the path level. All directives and tokens are checked before any
    /// value is generated or looked up.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed directives, unresolved substitutions
    /// or missing cross-referenced parameters.
    pub async fn build(&self) -> Result<Vec<SecretEntry>> {
        let mut raw: BTreeMap<String, SpecValue> = BTreeMap::new();
        for specification in &self.specifications {
            raw.extend(specification.expanded_data()?);
        }

        let mut planned = Vec::with_capacity(raw.len());
        for (local_name, value) in raw {
            let plan = match value {
                SpecValue::Scalar(text) => {
                    let (directive, text) = self.plan_one(&text)?;
                    Planned::Scalar(directive, text)
                }
                SpecValue::List(items) => Planned::List(
                    items
                        .iter()
                        .map(|item| self.plan_one(item))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            planned.push((local_name, plan));
        }

        let mut entries = Vec::with_capacity(planned.len());
        for (local_name, plan) in planned {
            let path = self.namespace.path(&local_name);
            let entry = match plan {
                Planned::Scalar(directive, text) => {
                    let (value, kind) = self.evaluate(&directive).await?;
                    SecretEntry {
                        path,
                        value,
                        kind,
                        description: directive.is_generator().then(|| generated_description(&text)),
                    }
                }
                Planned::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for (directive, _) in &items {
                        values.push(self.evaluate(directive).await?.0);
                    }
                    SecretEntry {
                        path,
                        value: values.join(","),
                        kind: SecretType::StringList,
                        description: None,
                    }
                }
            };
            entries.push(entry);
        }

        debug!("Built {} secrets under {}", entries.len(), self.key_prefix());
        Ok(entries)
    }

    fn plan_one(&self, raw: &str) -> Result<(Directive, String)> {
        let text = raw.trim().to_string();
        let directive = Directive::parse(&text)?;

        match &directive {
            Directive::Interpolation(template) => {
                interpolate(template, &self.substitutions)?;
            }
            Directive::Reference(Reference::Substitution(name)) if !self.substitutions.contains_key(name) => {
                return Err(SecretError::UnresolvedSubstitution { name: name.clone() }.into());
            }
            _ => {}
        }

        Ok((directive, text))
    }

    /// Evaluates one directive. References keep the type of the parameter
    /// they read; everything else is a secure string.
    async fn evaluate(&self, directive: &Directive) -> Result<(String, SecretType)> {
        match directive {
            Directive::Literal(value) => Ok((value.clone(), SecretType::SecureString)),
            Directive::Interpolation(template) => {
                Ok((interpolate(template, &self.substitutions)?, SecretType::SecureString))
            }
            Directive::Reference(reference) => {
                let path = match reference {
                    Reference::Path(path) => path.clone(),
                    Reference::Substitution(name) => self
                        .substitutions
                        .get(name)
                        .cloned()
                        .ok_or_else(|| SecretError::UnresolvedSubstitution { name: name.clone() })?,
                };
                let stored = self
                    .store
                    .get(&path)
                    .await?
                    .ok_or(SecretError::ReferenceNotFound { path })?;
                Ok((stored.value, stored.kind))
            }
            generator => Ok((generator.generate()?, SecretType::SecureString)),
        }
    }

    /// Returns what the store currently holds under the prefix, keyed by
    /// path. The answer is cached until the next write.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn data(&self) -> Result<BTreeMap<String, StoredSecret>> {
        if let Some(cached) = self.cache.lock().ok().and_then(|c| c.clone()) {
            return Ok(cached);
        }

        let data: BTreeMap<String, StoredSecret> = self
            .store
            .list(&self.key_prefix())
            .await?
            .into_iter()
            .map(|secret| (secret.path.clone(), secret))
            .collect();

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(data.clone());
        }
        Ok(data)
    }

    /// Returns the stored value of a secret by its name inside the block.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn get(&self, local_name: &str) -> Result<Option<String>> {
        let path = self.namespace.path(local_name);
        Ok(self.data().await?.get(&path).map(|s| s.value.clone()))
    }

    fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Builds and writes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if building fails or a write fails.
    pub async fn create(&self) -> Result<Vec<SecretEntry>> {
        let entries = self.build().await?;
        self.write(&entries, true).await?;
        Ok(entries)
    }

    /// Writes the entries that changed or match a force pattern. Returns
    /// true if anything was (or in dry-run, would be) written.
    ///
    /// # Errors
    ///
    /// Returns an error if building, listing or writing fails.
    pub async fn update(&self, force: &ForcePatterns) -> Result<bool> {
        let entries = self.build().await?;
        let existing = self.data().await?;
        let force = self.force.merged(force);
        let to_write = entries_to_write(&existing, &entries, &force);

        if to_write.is_empty() {
            info!("Secrets under {} are up to date", self.key_prefix());
            return Ok(false);
        }

        self.write(&to_write, false).await?;
        Ok(true)
    }

    async fn write(&self, entries: &[SecretEntry], throttle: bool) -> Result<()> {
        for (i, entry) in entries.iter().enumerate() {
            if self.dry_run {
                info!("Would write secret {} ({})", entry.path, entry.kind);
                continue;
            }
            if throttle
                && i > 0
                && let Some((sleeper, delay)) = &self.sleeper
            {
                sleeper.sleep(*delay).await;
            }
            info!("Writing secret {} ({})", entry.path, entry.kind);
            self.store.put(entry).await?;
        }

        if !self.dry_run {
            self.invalidate();
        }
        Ok(())
    }

    /// Deletes every secret under the prefix. Returns the number of paths
    /// submitted for deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if listing or a delete call fails.
    pub async fn delete(&self) -> Result<usize> {
        let paths: Vec<String> = self.data().await?.into_keys().collect();

        if paths.is_empty() {
            debug!("No secrets under {}", self.key_prefix());
            return Ok(0);
        }

        if self.dry_run {
            for path in &paths {
                info!("Would delete secret {path}");
            }
            return Ok(paths.len());
        }

        for batch in paths.chunks(MAX_DELETE_BATCH) {
            let invalid = self.store.delete(batch).await?;
            for path in invalid {
                warn!("Secret {path} was already deleted");
            }
        }

        self.invalidate();
        info!("Deleted {} secrets under {}", paths.len(), self.key_prefix());
        Ok(paths.len())
    }
}

/// Several secret blocks handled together.
#[derive(Debug, Default)]
pub struct SecretsSet {
    blocks: Vec<Secrets>,
}

impl SecretsSet {
    /// Creates a set.
    #[must_use]
    pub const fn new(blocks: Vec<Secrets>) -> Self {
        Self { blocks }
    }

    /// Returns true if there are no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the blocks.
    #[must_use]
    pub fn blocks(&self) -> &[Secrets] {
        &self.blocks
    }

    /// Creates every block.
    ///
    /// # Errors
    ///
    /// Stops at the first block that fails.
    pub async fn create(&self) -> Result<()> {
        for block in &self.blocks {
            block.create().await?;
        }
        Ok(())
    }

    /// Updates every block. Returns true if any block changed.
    ///
    /// # Errors
    ///
    /// Stops at the first block that fails.
    pub async fn update(&self, force: &ForcePatterns) -> Result<bool> {
        let mut changed = false;
        for block in &self.blocks {
            changed |= block.update(force).await?;
        }
        Ok(changed)
    }

    /// Deletes every block.
    ///
    /// # Errors
    ///
    /// Stops at the first block that fails.
    pub async fn delete(&self) -> Result<()> {
        for block in &self.blocks {
            block.delete().await?;
        }
        Ok(())
    }
}
