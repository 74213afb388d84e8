//! Secret entries and their stored counterparts.

use serde::Serialize;
use std::fmt;

use crate::error::{Result, SecretError};

/// Prefix of the description given to generated secrets.
pub const GENERATED_WITH_PREFIX: &str = "Generated with";

/// Parameter store value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum SecretType {
    /// Plain string.
    String,
    /// Encrypted string.
    #[default]
    SecureString,
    /// Comma-separated list.
    StringList,
}

impl SecretType {
    /// Returns the store's name for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::SecureString => "SecureString",
            Self::StringList => "StringList",
        }
    }

    /// Parses the store's name for a type.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown type names.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "String" => Ok(Self::String),
            "SecureString" => Ok(Self::SecureString),
            "StringList" => Ok(Self::StringList),
            other => Err(SecretError::store(format!("unknown parameter type '{other}'")).into()),
        }
    }
}

impl fmt::Display for SecretType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A secret to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SecretEntry {
    /// Full path, including the namespace prefix.
    pub path: String,
    /// Value.
    pub value: String,
    /// Value type.
    pub kind: SecretType,
    /// Provenance description for generated values.
    pub description: Option<String>,
}

impl SecretEntry {
    /// Returns true if the value was produced by a generator directive.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.description
            .as_deref()
            .is_some_and(|d| d.starts_with(GENERATED_WITH_PREFIX))
    }
}

/// A secret as currently held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSecret {
    /// Full path.
    pub path: String,
    /// Decrypted value.
    pub value: String,
    /// Value type.
    pub kind: SecretType,
    /// Description, if any.
    pub description: Option<String>,
}

/// Builds the provenance description for a generator expression.
#[must_use]
pub fn generated_description(expression: &str) -> String {
    format!("{GENERATED_WITH_PREFIX} {expression}")
}
