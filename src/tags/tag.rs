//! Validated resource tags.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{ConfigError, Result};

/// Maximum tag key length.
pub const MAX_KEY_LEN: usize = 128;

/// Maximum tag value length.
pub const MAX_VALUE_LEN: usize = 256;

/// Prefix reserved for provider-managed tags.
pub const RESERVED_PREFIX: &str = "aws:";

/// A validated key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Creates a tag after validating its key and value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or value is outside the allowed charset or
    /// length, or if the key uses the reserved `aws:` prefix.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let value = value.into();

        if key.is_empty() || key.chars().count() > MAX_KEY_LEN || !key.chars().all(is_tag_char) {
            return Err(invalid(format!(
                "key '{key}' must be 1 to {MAX_KEY_LEN} letters, digits or _-/.+=:@"
            )));
        }
        if key.starts_with(RESERVED_PREFIX) {
            return Err(invalid(format!("key '{key}' cannot begin with '{RESERVED_PREFIX}'")));
        }
        if value.chars().count() > MAX_VALUE_LEN
            || !value.chars().all(|c| c == ' ' || is_tag_char(c))
        {
            return Err(invalid(format!(
                "value '{value}' for key '{key}' must be at most {MAX_VALUE_LEN} letters, digits, spaces or _-/.+=:@"
            )));
        }

        Ok(Self { key, value })
    }

    /// Creates a tag whose value may be missing from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is missing or the tag is invalid.
    pub fn from_optional(key: impl Into<String>, value: Option<String>) -> Result<Self> {
        let key = key.into();
        match value {
            Some(value) => Self::new(key, value),
            None => Err(invalid(format!("value for key '{key}' cannot be empty"))),
        }
    }

    /// Returns the tag key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the tag value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

const fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '+' | '=' | ':' | '@')
}

fn invalid(message: String) -> crate::error::DeployError {
    ConfigError::InvalidTag { message }.into()
}

/// Builds validated tags from a configuration map.
///
/// # Errors
///
/// Returns an error on the first invalid tag.
pub fn tags_from_map(map: &BTreeMap<String, Option<String>>) -> Result<Vec<Tag>> {
    map.iter()
        .map(|(key, value)| Tag::from_optional(key.clone(), value.clone()))
        .collect()
}

/// Returns the desired tags a resource does not carry yet, comparing whole
/// key/value pairs. The result keeps the order of `desired`.
#[must_use]
pub fn missing_tags(desired: &[Tag], present: &[Tag]) -> Vec<Tag> {
    let present: BTreeSet<&Tag> = present.iter().collect();
    desired
        .iter()
        .filter(|tag| !present.contains(tag))
        .cloned()
        .collect()
}
