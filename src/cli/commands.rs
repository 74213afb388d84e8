//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::parameters::ParameterMap;

/// Stackdeploy - Declarative CloudFormation deployment manager.
#[derive(Parser, Debug)]
#[command(name = "stackdeploy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "STACKDEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Stacks a command applies to.
#[derive(Args, Debug, Clone, Default)]
pub struct StackSelection {
    /// Stack id to act on; repeat for several. Defaults to every stack.
    #[arg(short, long = "stack")]
    pub stacks: Vec<String>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the deployment configuration and templates.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Create stacks and their secrets.
    Create {
        /// Stacks to create.
        #[command(flatten)]
        selection: StackSelection,

        /// Parameter override as KEY=VALUE; needs a single stack.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Wait for each stack to finish.
        #[arg(short, long)]
        wait: bool,

        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Preview and apply stack updates.
    Update {
        /// Stacks to update.
        #[command(flatten)]
        selection: StackSelection,

        /// Parameter override as KEY=VALUE; needs a single stack.
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Rewrite secrets whose path matches this pattern.
        #[arg(long = "force-secret")]
        force_secrets: Vec<String>,

        /// Wait for each stack to finish.
        #[arg(short, long)]
        wait: bool,

        /// Preview the changes without applying them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete stacks and their secrets, in reverse order.
    Delete {
        /// Stacks to delete.
        #[command(flatten)]
        selection: StackSelection,

        /// Wait for each stack to be gone.
        #[arg(short, long)]
        wait: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show stack status and recent failures.
    Status {
        /// Stacks to report on.
        #[command(flatten)]
        selection: StackSelection,
    },

    /// Print one output of a deployed stack.
    Output {
        /// Stack id.
        stack: String,

        /// Output key.
        key: String,
    },

    /// Manage secrets without touching stacks.
    Secrets {
        /// Secrets subcommand.
        #[command(subcommand)]
        command: SecretsCommands,
    },

    /// Build a machine image with Packer.
    BuildImage {
        /// Image id from the configuration.
        image: String,

        /// Commit to build.
        #[arg(long, conflicts_with = "branch")]
        sha: Option<String>,

        /// Branch to resolve to a commit.
        #[arg(long)]
        branch: Option<String>,

        /// Run Packer in debug mode.
        #[arg(long)]
        debug: bool,

        /// Print the Packer command without running it.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Secrets management subcommands.
#[derive(Subcommand, Debug)]
pub enum SecretsCommands {
    /// Write every secret.
    Create {
        /// Stacks whose secrets to write.
        #[command(flatten)]
        selection: StackSelection,

        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Write changed secrets.
    Update {
        /// Stacks whose secrets to update.
        #[command(flatten)]
        selection: StackSelection,

        /// Rewrite secrets whose path matches this pattern.
        #[arg(long = "force-secret")]
        force_secrets: Vec<String>,

        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every secret under the stacks' namespaces.
    Delete {
        /// Stacks whose secrets to delete.
        #[command(flatten)]
        selection: StackSelection,

        /// Log what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parses a `KEY=VALUE` parameter override. The value may be empty or
/// contain `=`.
///
/// # Errors
///
/// Returns an error if there is no `=` or the key is blank.
pub fn parse_param(text: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{text}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("blank parameter key in '{text}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Collects parameter overrides, rejecting repeated keys.
///
/// # Errors
///
/// Returns an error if a key is given twice.
pub fn overrides_from(params: &[(String, String)]) -> Result<ParameterMap> {
    let mut overrides = ParameterMap::new();
    for (key, value) in params {
        if overrides.insert(key.clone(), Some(value.clone())).is_some() {
            return Err(ConfigError::validation(format!("Parameter {key} given more than once"), "param").into());
        }
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("ImageId=ami-1"),
            Ok((String::from("ImageId"), String::from("ami-1")))
        );
        assert_eq!(
            parse_param("Query=a=b"),
            Ok((String::from("Query"), String::from("a=b")))
        );
        assert_eq!(parse_param("Empty="), Ok((String::from("Empty"), String::new())));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_update_flags() {
        let cli = Cli::try_parse_from([
            "stackdeploy",
            "update",
            "--stack",
            "web",
            "--param",
            "Capacity=3",
            "--force-secret",
            "^/qa/.*",
            "--dry-run",
        ])
        .expect("parse");

        match cli.command {
            Commands::Update {
                selection,
                params,
                force_secrets,
                wait,
                dry_run,
            } => {
                assert_eq!(selection.stacks, vec!["web"]);
                assert_eq!(params, vec![(String::from("Capacity"), String::from("3"))]);
                assert_eq!(force_secrets, vec!["^/qa/.*"]);
                assert!(!wait);
                assert!(dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_overrides_reject_duplicates() {
        let params = vec![
            (String::from("A"), String::from("1")),
            (String::from("A"), String::from("2")),
        ];
        assert!(overrides_from(&params).is_err());

        let overrides = overrides_from(&params[..1]).expect("overrides");
        assert_eq!(overrides.get("A"), Some(&Some(String::from("1"))));
    }

    #[test]
    fn test_sha_conflicts_with_branch() {
        let result = Cli::try_parse_from([
            "stackdeploy",
            "build-image",
            "web",
            "--sha",
            "abc",
            "--branch",
            "main",
        ]);
        assert!(result.is_err());
    }
}
