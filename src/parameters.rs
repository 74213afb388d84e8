//! Parameter reconciliation.
//!
//! Computes the parameter set handed to the orchestration engine. On create
//! the set is the configured defaults merged with overrides. On update every
//! parameter the template still declares and the deployed stack already has
//! keeps its previous value, unless a volatile resolver or an explicit
//! override supplies a new one.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::error::{ParameterError, Result};

/// A single parameter value handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterValue {
    /// An explicit value.
    Literal(String),
    /// Keep whatever value the deployed stack currently has.
    UsePrevious,
}

impl ParameterValue {
    /// Returns the literal value, if any.
    #[must_use]
    pub fn literal(&self) -> Option<&str> {
        match self {
            Self::Literal(value) => Some(value),
            Self::UsePrevious => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::UsePrevious => write!(f, "(use previous value)"),
        }
    }
}

/// An ordered parameter-key to value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterSet(BTreeMap<String, ParameterValue>);

impl ParameterSet {
    /// Creates an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Sets a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: ParameterValue) {
        self.0.insert(key.into(), value);
    }

    /// Gets a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.0.get(key)
    }

    /// Iterates parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ParameterValue)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, ParameterValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parameter values that may be absent. `None` drops the key.
pub type ParameterMap = BTreeMap<String, Option<String>>;

/// Computes the parameter set for a stack that does not exist yet.
///
/// # Errors
///
/// Returns an error if any key is blank.
pub fn resolve_for_create(defaults: &ParameterMap, overrides: &ParameterMap) -> Result<ParameterSet> {
    let mut merged: BTreeMap<String, Option<String>> = BTreeMap::new();

    for (key, value) in defaults.iter().chain(overrides.iter()) {
        check_key(key)?;
        merged.insert(key.clone(), value.clone());
    }

    Ok(compact(merged))
}

/// Inputs to [`resolve_for_update`].
#[derive(Debug, Clone, Copy)]
pub struct UpdateInputs<'a> {
    /// Parameters declared by the template being deployed.
    pub template_keys: &'a BTreeSet<String>,
    /// Parameters the currently deployed stack has.
    pub deployed_keys: &'a BTreeSet<String>,
    /// Configured defaults.
    pub defaults: &'a ParameterMap,
    /// Values read from live state.
    pub volatile: &'a ParameterMap,
    /// Explicit caller overrides.
    pub overrides: &'a ParameterMap,
}

/// Computes the parameter set for updating a deployed stack.
///
/// Precedence, lowest first: previous value for continuing keys, default for
/// keys new to the template, volatile values, explicit overrides. Keys that
/// end up without a value are dropped.
///
/// # Errors
///
/// Returns an error if any key is blank or if a volatile or override key is
/// not declared by the template.
pub fn resolve_for_update(inputs: UpdateInputs<'_>) -> Result<ParameterSet> {
    check_declared(inputs.volatile, inputs.template_keys)?;
    check_declared(inputs.overrides, inputs.template_keys)?;

    let mut resolved: BTreeMap<String, Option<ParameterValue>> = BTreeMap::new();

    for key in inputs.template_keys {
        check_key(key)?;
        if inputs.deployed_keys.contains(key) {
            resolved.insert(key.clone(), Some(ParameterValue::UsePrevious));
        } else {
            let default = inputs.defaults.get(key).cloned().flatten();
            resolved.insert(key.clone(), default.map(ParameterValue::Literal));
        }
    }

    for (key, value) in inputs.volatile.iter().chain(inputs.overrides.iter()) {
        resolved.insert(key.clone(), value.clone().map(ParameterValue::Literal));
    }

    let set: ParameterSet = resolved
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();

    debug!("Resolved {} parameters for update", set.len());
    Ok(set)
}

/// Checks that every key is non-blank and declared by the template.
///
/// # Errors
///
/// Returns the first blank or undeclared key.
pub fn check_declared(values: &ParameterMap, template_keys: &BTreeSet<String>) -> Result<()> {
    for key in values.keys() {
        check_key(key)?;
        if !template_keys.contains(key) {
            return Err(ParameterError::UnknownParameter { key: key.clone() }.into());
        }
    }
    Ok(())
}

fn check_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(ParameterError::BlankKey.into());
    }
    Ok(())
}

fn compact(map: BTreeMap<String, Option<String>>) -> ParameterSet {
    map.into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, ParameterValue::Literal(v))))
        .collect()
}

/// Context available to volatile parameter resolvers.
#[derive(Debug, Clone, Copy)]
pub struct VolatileContext<'a> {
    /// Name of the stack being updated.
    pub stack_name: &'a str,
    /// Region of the stack.
    pub region: &'a str,
}

/// Reads parameter values from live state at update time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VolatileParameters: Send + Sync {
    /// Returns the parameters to overwrite for the next update.
    async fn resolve(&self, stack_name: &str, region: &str) -> Result<ParameterMap>;
}

/// Resolves volatile parameters from a context.
///
/// # Errors
///
/// Returns an error if the resolver fails.
pub async fn resolve_volatile(
    resolver: Option<&dyn VolatileParameters>,
    context: VolatileContext<'_>,
) -> Result<ParameterMap> {
    match resolver {
        Some(resolver) => resolver.resolve(context.stack_name, context.region).await,
        None => Ok(ParameterMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    fn map(pairs: &[(&str, Option<&str>)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
            .collect()
    }

    fn literal(value: &str) -> ParameterValue {
        ParameterValue::Literal(value.to_string())
    }

    #[test]
    fn test_create_overrides_win_and_nils_drop() {
        let defaults = map(&[("A", Some("1")), ("B", Some("2")), ("C", None)]);
        let overrides = map(&[("B", Some("3")), ("A", None)]);

        let set = resolve_for_create(&defaults, &overrides).expect("resolve failed");

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("B"), Some(&literal("3")));
    }

    #[test]
    fn test_create_rejects_blank_key() {
        let result = resolve_for_create(&map(&[(" ", Some("x"))]), &ParameterMap::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_update_precedence() {
        let template = keys(&["Kept", "New", "NewNoDefault", "Volatile", "Overridden"]);
        let deployed = keys(&["Kept", "Volatile", "Overridden", "Removed"]);
        let defaults = map(&[("New", Some("d")), ("Kept", Some("ignored"))]);
        let volatile = map(&[("Volatile", Some("7"))]);
        let overrides = map(&[("Overridden", Some("o"))]);

        let set = resolve_for_update(UpdateInputs {
            template_keys: &template,
            deployed_keys: &deployed,
            defaults: &defaults,
            volatile: &volatile,
            overrides: &overrides,
        })
        .expect("resolve failed");

        assert_eq!(set.get("Kept"), Some(&ParameterValue::UsePrevious));
        assert_eq!(set.get("New"), Some(&literal("d")));
        assert_eq!(set.get("NewNoDefault"), None);
        assert_eq!(set.get("Volatile"), Some(&literal("7")));
        assert_eq!(set.get("Overridden"), Some(&literal("o")));
        assert_eq!(set.get("Removed"), None);
    }

    #[test]
    fn test_update_override_beats_volatile() {
        let template = keys(&["Capacity"]);
        let set = resolve_for_update(UpdateInputs {
            template_keys: &template,
            deployed_keys: &template,
            defaults: &ParameterMap::new(),
            volatile: &map(&[("Capacity", Some("2"))]),
            overrides: &map(&[("Capacity", Some("5"))]),
        })
        .expect("resolve failed");

        assert_eq!(set.get("Capacity"), Some(&literal("5")));
    }

    #[test]
    fn test_update_rejects_unknown_override() {
        let template = keys(&["A"]);
        let result = resolve_for_update(UpdateInputs {
            template_keys: &template,
            deployed_keys: &template,
            defaults: &ParameterMap::new(),
            volatile: &ParameterMap::new(),
            overrides: &map(&[("Typo", Some("1"))]),
        });

        assert!(matches!(
            result,
            Err(crate::error::DeployError::Parameter(ParameterError::UnknownParameter { .. }))
        ));
    }

    #[tokio::test]
    async fn test_resolve_volatile_uses_resolver() {
        let mut resolver = MockVolatileParameters::new();
        resolver
            .expect_resolve()
            .withf(|stack, region| stack == "qa-app-web" && region == "us-east-1")
            .returning(|_, _| Ok(map(&[("DesiredCapacity", Some("4"))])));

        let context = VolatileContext {
            stack_name: "qa-app-web",
            region: "us-east-1",
        };
        let values = resolve_volatile(Some(&resolver), context)
            .await
            .expect("resolve failed");
        assert_eq!(values.get("DesiredCapacity"), Some(&Some(String::from("4"))));

        let none = resolve_volatile(None, context).await.expect("resolve failed");
        assert!(none.is_empty());
    }
}
