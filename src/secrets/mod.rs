//! Secret synchronization.
//!
//! This module contains:
//! - Specification loading (file, inline, source control)
//! - Directive evaluation (`random`, `rsa`, `uuid`, `{{ }}`, `ssm()`)
//! - Diffing built secrets against the parameter store
//! - The parameter store interface and its SSM implementation

mod diff;
mod directive;
mod entry;
mod source;
mod specification;
mod store;
mod synchronizer;

pub use diff::{ForcePatterns, changed_secrets, entries_to_write};
pub use directive::{Directive, Reference, interpolate};
pub use entry::{GENERATED_WITH_PREFIX, SecretEntry, SecretType, StoredSecret, generated_description};
#[cfg(test)]
pub use source::MockArtifactSource;
pub use source::{ArtifactSource, GITHUB_RAW_URL, GithubArtifactSource};
pub use specification::{SecretsSpecification, SpecValue};
#[cfg(test)]
pub use store::MockSecretStore;
pub use store::{MAX_DELETE_BATCH, SecretStore, SsmSecretStore};
pub use synchronizer::{SecretNamespace, Secrets, SecretsSet};
