//! Human readable change set summaries.

use crate::engine::{ChangeSetDescription, ResourceChange};
use crate::parameters::ParameterValue;

impl ResourceChange {
    /// Returns true for in-place or replacing modifications.
    #[must_use]
    pub fn is_modify(&self) -> bool {
        self.action == "Modify"
    }

    /// Formats the change as one summary line.
    ///
    /// `Modify '<LogicalId>' (<Type>): Replacement=<flag>; Due to change in
    /// <scopes>; Causes: <source:entity, ...>`
    #[must_use]
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} '{}' ({})",
            self.action, self.logical_resource_id, self.resource_type
        );

        if self.is_modify() {
            let causes: Vec<String> = self
                .causes
                .iter()
                .map(|c| match (&c.change_source, &c.causing_entity) {
                    (Some(source), Some(entity)) => format!("{source}:{entity}"),
                    (Some(source), None) => source.clone(),
                    (None, Some(entity)) => entity.clone(),
                    (None, None) => String::from("unknown"),
                })
                .collect();

            line.push_str(&format!(
                ": Replacement={}; Due to change in {}; Causes: {}",
                self.replacement.as_deref().unwrap_or("False"),
                self.scope.join(", "),
                causes.join(", ")
            ));
        }

        line
    }
}

impl ChangeSetDescription {
    /// Returns one summary line per affected resource.
    #[must_use]
    pub fn summary(&self) -> Vec<String> {
        self.changes.iter().map(ResourceChange::summary_line).collect()
    }

    /// Returns true if any change was caused by the given entity, e.g. a
    /// parameter name.
    #[must_use]
    pub fn has_change_caused_by(&self, entity: &str) -> bool {
        self.changes.iter().any(|change| {
            change
                .causes
                .iter()
                .any(|cause| cause.causing_entity.as_deref() == Some(entity))
        })
    }

    /// Returns the value the change set would give a parameter.
    #[must_use]
    pub fn parameter_value(&self, key: &str) -> Option<&ParameterValue> {
        self.parameters.get(key)
    }

    /// Returns true if the change set affects no resource.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
