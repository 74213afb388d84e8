//! Secret specification documents.
//!
//! A specification is a nested YAML or JSON document whose leaves are raw
//! secret expressions. It is flattened to `a/b/c` paths before evaluation.

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SecretError};

use super::source::ArtifactSource;

/// A flattened specification leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecValue {
    /// A single raw expression.
    Scalar(String),
    /// A list of raw expressions, stored as a `StringList`.
    List(Vec<String>),
}

/// A loaded specification document.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretsSpecification {
    source_name: String,
    data: Value,
}

impl SecretsSpecification {
    /// Builds a specification from a parsed document, optionally narrowed to
    /// the subtree under `top_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `top_key` is missing or the document is not a
    /// mapping.
    pub fn from_value(source_name: impl Into<String>, data: Value, top_key: Option<&str>) -> Result<Self> {
        let source_name = source_name.into();

        let data = match top_key {
            Some(key) => data.get(key).cloned().ok_or_else(|| SecretError::Specification {
                source_name: source_name.clone(),
                message: format!("top key '{key}' not found"),
            })?,
            None => data,
        };

        if !data.is_mapping() {
            return Err(SecretError::Specification {
                source_name,
                message: String::from("document must be a mapping"),
            }
            .into());
        }

        Ok(Self { source_name, data })
    }

    /// Parses YAML (or JSON) text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or `top_key` is missing.
    pub fn from_content(source_name: impl Into<String>, content: &str, top_key: Option<&str>) -> Result<Self> {
        let source_name = source_name.into();
        let data: Value = serde_yaml::from_str(content).map_err(|e| SecretError::Specification {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;
        Self::from_value(source_name, data, top_key)
    }

    /// Reads a specification file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path, top_key: Option<&str>) -> Result<Self> {
        let source_name = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| SecretError::Specification {
            source_name: source_name.clone(),
            message: e.to_string(),
        })?;
        Self::from_content(source_name, &content, top_key)
    }

    /// Fetches a specification from source control.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails or the content does not parse.
    pub async fn from_git(
        source: &dyn ArtifactSource,
        org_slash_repo: &str,
        sha: &str,
        path: &str,
        top_key: Option<&str>,
    ) -> Result<Self> {
        let content = source.fetch(org_slash_repo, sha, path).await?;
        Self::from_content(format!("{org_slash_repo}@{sha}:{path}"), &content, top_key)
    }

    /// Returns where the specification came from.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Flattens the document to `a/b/c` paths.
    ///
    /// # Errors
    ///
    /// Returns an error for empty values, non-string keys or nested
    /// collections inside lists.
    pub fn expanded_data(&self) -> Result<BTreeMap<String, SpecValue>> {
        let mut flat = BTreeMap::new();
        self.flatten(&self.data, None, &mut flat)?;
        Ok(flat)
    }

    fn flatten(&self, value: &Value, prefix: Option<&str>, out: &mut BTreeMap<String, SpecValue>) -> Result<()> {
        let Value::Mapping(mapping) = value else {
            return Ok(());
        };

        for (key, child) in mapping {
            let key = scalar_text(key).ok_or_else(|| self.error("keys must be scalars"))?;
            let path = match prefix {
                Some(prefix) => format!("{prefix}/{key}"),
                None => key,
            };

            match child {
                Value::Mapping(_) => self.flatten(child, Some(&path), out)?,
                Value::Sequence(items) => {
                    let items = items
                        .iter()
                        .map(|item| {
                            scalar_text(item)
                                .ok_or_else(|| self.error(&format!("'{path}' lists must hold scalars")))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    out.insert(path, SpecValue::List(items));
                }
                Value::Null => return Err(self.error(&format!("'{path}' has no value"))),
                other => {
                    let text = scalar_text(other)
                        .ok_or_else(|| self.error(&format!("'{path}' has an unsupported value")))?;
                    out.insert(path, SpecValue::Scalar(text));
                }
            }
        }

        Ok(())
    }

    fn error(&self, message: &str) -> crate::error::DeployError {
        SecretError::Specification {
            source_name: self.source_name.clone(),
            message: message.to_string(),
        }
        .into()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
