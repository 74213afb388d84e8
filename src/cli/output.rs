//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DeployConfig, ValidationResult};
use crate::engine::{ChangeSetDescription, StackPhase, StatusReport, describe_event};
use crate::parameters::ParameterSet;
use crate::stack::{CreateReport, UpdateReport};
use crate::tags::TagReconcileReport;
use crate::wait::WaitOutcome;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Stack status row for table display.
#[derive(Tabled)]
struct StackStatusRow {
    #[tabled(rename = "Stack")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Failures")]
    failures: usize,
}

/// Parameter row for table display.
#[derive(Tabled)]
struct ParameterRow {
    #[tabled(rename = "Parameter")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for machine-readable output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, config: &DeployConfig, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
                "deployment": config.deployment.name,
                "stacks": config.stacks.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Configuration has {} error(s):", "✗".red(), result.error_count());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = writeln!(output, "\nConfiguration summary:");
                let _ = writeln!(output, "  Deployment: {}", config.deployment.name);
                let _ = writeln!(
                    output,
                    "  Environment: {}",
                    config.deployment.env_name().unwrap_or("(none)")
                );
                let _ = writeln!(output, "  Region: {}", config.deployment.region);
                let _ = writeln!(output, "  Stacks: {}", config.stacks.len());
                let _ = writeln!(output, "  Images: {}", config.images.len());
                output
            }
        }
    }

    /// Formats stack status reports.
    #[must_use]
    pub fn format_status(&self, reports: &[StatusReport]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&reports.iter().map(StatusReport::to_json).collect::<Vec<_>>()),
            OutputFormat::Text => {
                if reports.is_empty() {
                    return String::from("   No stacks configured.\n");
                }

                let rows: Vec<StackStatusRow> = reports
                    .iter()
                    .map(|r| StackStatusRow {
                        name: r.stack_name.clone(),
                        status: r.status.to_string(),
                        phase: format_phase(r.phase),
                        failures: if r.failed() { r.failed_events.len() } else { 0 },
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');

                for report in reports.iter().filter(|r| r.failed() && !r.failed_events.is_empty()) {
                    let _ = writeln!(output, "\n{} {}:", "✗".red(), report.stack_name);
                    for event in &report.failed_events {
                        let _ = writeln!(output, "   - {}", describe_event(event));
                    }
                }
                output
            }
        }
    }

    /// Formats the result of creating stacks.
    #[must_use]
    pub fn format_create(&self, reports: &[(String, CreateReport)]) -> String {
        match self.format {
            OutputFormat::Json => to_json(
                &reports
                    .iter()
                    .map(|(id, r)| StackResultJson {
                        stack: id,
                        result: "created",
                        parameters: Some(&r.parameters),
                        changes: Vec::new(),
                        wait: r.wait.as_ref(),
                        tags: r.tags.as_ref(),
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => {
                let mut output = String::new();
                for (id, report) in reports {
                    let _ = writeln!(output, "{} Created {id}", "+".green());
                    output.push_str(&format_parameters(&report.parameters));
                    write_wait(&mut output, report.wait.as_ref());
                    write_tags(&mut output, report.tags.as_ref());
                }
                output
            }
        }
    }

    /// Formats the result of updating stacks.
    #[must_use]
    pub fn format_update(&self, reports: &[(String, UpdateReport)]) -> String {
        match self.format {
            OutputFormat::Json => to_json(
                &reports
                    .iter()
                    .map(|(id, report)| match report {
                        UpdateReport::NoChanges => StackResultJson {
                            stack: id,
                            result: "no_changes",
                            parameters: None,
                            changes: Vec::new(),
                            wait: None,
                            tags: None,
                        },
                        UpdateReport::Previewed(changes) => StackResultJson {
                            stack: id,
                            result: "previewed",
                            parameters: Some(&changes.parameters),
                            changes: changes.summary(),
                            wait: None,
                            tags: None,
                        },
                        UpdateReport::Applied { changes, wait, tags } => StackResultJson {
                            stack: id,
                            result: "applied",
                            parameters: Some(&changes.parameters),
                            changes: changes.summary(),
                            wait: wait.as_ref(),
                            tags: tags.as_ref(),
                        },
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => {
                let mut output = String::new();
                for (id, report) in reports {
                    match report {
                        UpdateReport::NoChanges => {
                            let _ = writeln!(output, "{} {id}: no changes", "✓".green());
                        }
                        UpdateReport::Previewed(changes) => {
                            let _ = writeln!(output, "{} {id}: would apply", "~".yellow());
                            write_changes(&mut output, changes);
                        }
                        UpdateReport::Applied { changes, wait, tags } => {
                            let _ = writeln!(output, "{} Updated {id}", "~".yellow());
                            write_changes(&mut output, changes);
                            write_wait(&mut output, wait.as_ref());
                            write_tags(&mut output, tags.as_ref());
                        }
                    }
                }
                output
            }
        }
    }

    /// Formats the result of deleting stacks.
    #[must_use]
    pub fn format_delete(&self, outcomes: &[(String, Option<WaitOutcome>)]) -> String {
        match self.format {
            OutputFormat::Json => to_json(
                &outcomes
                    .iter()
                    .map(|(id, wait)| StackResultJson {
                        stack: id,
                        result: "deleted",
                        parameters: None,
                        changes: Vec::new(),
                        wait: wait.as_ref(),
                        tags: None,
                    })
                    .collect::<Vec<_>>(),
            ),
            OutputFormat::Text => {
                let mut output = String::new();
                for (id, wait) in outcomes {
                    let _ = writeln!(output, "{} Deleted {id}", "-".red());
                    write_wait(&mut output, wait.as_ref());
                }
                output
            }
        }
    }

    /// Formats a stack output value.
    #[must_use]
    pub fn format_output_value(&self, stack: &str, key: &str, value: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "stack": stack, "key": key, "value": value })),
            OutputFormat::Text => format!("{value}\n"),
        }
    }

    /// Formats the result of an image build.
    #[must_use]
    pub fn format_image(&self, image: &str, image_id: Option<&str>) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "image": image, "image_id": image_id })),
            OutputFormat::Text => match image_id {
                Some(id) => format!("{} Built {image}: {id}\n", "✓".green()),
                None => format!("{} No image id reported for {image}\n", "⚠".yellow()),
            },
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{marker} {message}\n"),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn format_phase(phase: Option<StackPhase>) -> String {
    match phase {
        Some(StackPhase::Succeeded) => "succeeded".green().to_string(),
        Some(StackPhase::Failed) => "failed".red().to_string(),
        Some(StackPhase::Absent) => "absent".dimmed().to_string(),
        Some(phase) => phase.to_string().to_lowercase().yellow().to_string(),
        None => "unknown".dimmed().to_string(),
    }
}

fn format_parameters(parameters: &ParameterSet) -> String {
    if parameters.is_empty() {
        return String::new();
    }
    let rows: Vec<ParameterRow> = parameters
        .iter()
        .map(|(key, value)| ParameterRow {
            key: key.clone(),
            value: value.to_string(),
        })
        .collect();
    let mut table = Table::new(rows).to_string();
    table.push('\n');
    table
}

fn write_changes(output: &mut String, changes: &ChangeSetDescription) {
    for line in changes.summary() {
        let _ = writeln!(output, "   {line}");
    }
    output.push_str(&format_parameters(&changes.parameters));
}

fn write_wait(output: &mut String, wait: Option<&WaitOutcome>) {
    match wait {
        Some(WaitOutcome::Completed(status)) => {
            let _ = writeln!(output, "   Finished: {status}");
        }
        Some(WaitOutcome::NotInProgress(status)) => {
            let _ = writeln!(output, "   Not in progress: {status}");
        }
        None => {}
    }
}

fn write_tags(output: &mut String, tags: Option<&TagReconcileReport>) {
    let Some(tags) = tags else {
        return;
    };
    if !tags.tagged.is_empty() {
        let _ = writeln!(output, "   Tagged: {}", tags.tagged.join(", "));
    }
    for (resource, reason) in &tags.failed {
        let _ = writeln!(output, "   {} Could not tag {resource}: {reason}", "⚠".yellow());
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct StackResultJson<'a> {
    stack: &'a str,
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a ParameterSet>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait: Option<&'a WaitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a TagReconcileReport>,
}
