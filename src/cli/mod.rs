//! CLI module for the stackdeploy tool.
//!
//! This module provides the command-line interface for managing
//! CloudFormation deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, SecretsCommands, StackSelection, overrides_from, parse_param};
pub use output::OutputFormatter;
