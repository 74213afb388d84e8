//! Deciding which built secrets need writing.

use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::error::{ConfigError, Result};

use super::entry::{SecretEntry, StoredSecret};

/// Returns the proposed entries that differ from what the store holds.
///
/// An entry is skipped when the store has the same value at that path, or
/// when both sides were generated and carry the same provenance
/// description. Generated values are random, so comparing them would
/// rewrite them on every update.
#[must_use]
pub fn changed_secrets(existing: &BTreeMap<String, StoredSecret>, proposed: &[SecretEntry]) -> Vec<SecretEntry> {
    proposed
        .iter()
        .filter(|entry| match existing.get(&entry.path) {
            None => true,
            Some(stored) if stored.value == entry.value => false,
            Some(stored) => {
                let same_generator = entry.is_generated()
                    && stored.description.is_some()
                    && stored.description == entry.description;
                !same_generator
            }
        })
        .cloned()
        .collect()
}

/// Path patterns whose entries are always written.
#[derive(Debug, Clone, Default)]
pub struct ForcePatterns(Vec<Regex>);

impl ForcePatterns {
    /// Compiles the patterns.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first pattern that does not compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ConfigError::validation(
                        format!("Invalid force update pattern '{}': {e}", p.as_ref()),
                        "force_update",
                    )
                    .into()
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Returns a set holding the patterns of both.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    /// Returns true if any pattern matches the path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.0.iter().any(|re| re.is_match(path))
    }

    /// Returns true if there are no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Returns the changed entries plus every entry matching a force pattern,
/// without duplicates, in the order they were built.
#[must_use]
pub fn entries_to_write(
    existing: &BTreeMap<String, StoredSecret>,
    proposed: &[SecretEntry],
    force: &ForcePatterns,
) -> Vec<SecretEntry> {
    let changed: HashSet<String> = changed_secrets(existing, proposed)
        .into_iter()
        .map(|entry| entry.path)
        .collect();

    proposed
        .iter()
        .filter(|entry| changed.contains(&entry.path) || force.matches(&entry.path))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::entry::{SecretType, generated_description};

    fn entry(path: &str, value: &str, description: Option<&str>) -> SecretEntry {
        SecretEntry {
            path: path.to_string(),
            value: value.to_string(),
            kind: SecretType::SecureString,
            description: description.map(str::to_string),
        }
    }

    fn stored(path: &str, value: &str, description: Option<&str>) -> (String, StoredSecret) {
        (
            path.to_string(),
            StoredSecret {
                path: path.to_string(),
                value: value.to_string(),
                kind: SecretType::SecureString,
                description: description.map(str::to_string),
            },
        )
    }

    #[test]
    fn test_diff_cases() {
        let hex16 = generated_description("random(hex,16)");
        let hex32 = generated_description("random(hex,32)");
        let existing: BTreeMap<_, _> = [
            stored("/qa/app/unchanged", "same", None),
            stored("/qa/app/edited", "old", None),
            stored("/qa/app/same_generator", "aaaa", Some(&hex16)),
            stored("/qa/app/new_generator", "bbbb", Some(&hex16)),
        ]
        .into_iter()
        .collect();

        let proposed = vec![
            entry("/qa/app/new", "value", None),
            entry("/qa/app/unchanged", "same", None),
            entry("/qa/app/edited", "new", None),
            entry("/qa/app/same_generator", "cccc", Some(&hex16)),
            entry("/qa/app/new_generator", "dddd", Some(&hex32)),
        ];

        let changed: Vec<String> = changed_secrets(&existing, &proposed)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(
            changed,
            vec![
                String::from("/qa/app/new"),
                String::from("/qa/app/edited"),
                String::from("/qa/app/new_generator"),
            ]
        );
    }

    #[test]
    fn test_literal_replacing_generator_is_written() {
        let hex16 = generated_description("random(hex,16)");
        let existing: BTreeMap<_, _> = [stored("/qa/app/key", "aaaa", Some(&hex16))].into_iter().collect();
        let proposed = vec![entry("/qa/app/key", "fixed", None)];
        assert_eq!(changed_secrets(&existing, &proposed).len(), 1);
    }

    #[test]
    fn test_force_patterns_are_deduplicated() {
        let existing: BTreeMap<_, _> = [stored("/qa/app/api_key", "k", None)].into_iter().collect();
        let proposed = vec![
            entry("/qa/app/api_key", "k", None),
            entry("/qa/app/fresh", "v", None),
        ];
        let force = ForcePatterns::new(&["api_key$", "^/qa/"]).expect("valid patterns");

        let paths: Vec<String> = entries_to_write(&existing, &proposed, &force)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(
            paths,
            vec![String::from("/qa/app/api_key"), String::from("/qa/app/fresh")]
        );
    }

    #[test]
    fn test_invalid_force_pattern() {
        assert!(ForcePatterns::new(&["("]).is_err());
        assert!(ForcePatterns::new::<&str>(&[]).expect("empty").is_empty());
    }
}
