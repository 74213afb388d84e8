// ============================================================================
// Linting
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackdeploy
//!
//! Declarative, idempotent lifecycle management for CloudFormation stacks,
//! the parameter-store secrets that feed them, and the tags they carry.
//!
//! ## Overview
//!
//! A deployment is described once in `stackdeploy.yaml`: a set of stacks,
//! each with a template, parameter defaults, secret blocks and tags. The tool
//! then:
//!
//! - Creates stacks with fully resolved parameters
//! - Updates stacks through reviewed change sets, keeping deployed values
//!   the caller did not mention
//! - Writes generated and templated secrets, rewriting only what changed
//! - Waits on stack operations and reports the failure events that matter
//! - Tags resources the engine does not tag on its own
//! - Builds machine images with Packer
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`parameters`]: Parameter reconciliation for create and update
//! - [`changeset`]: Change set staging and summaries
//! - [`secrets`]: Secret specifications and synchronization
//! - [`wait`]: Polling and stack waiters
//! - [`tags`]: Tag validation and the tag sweep
//! - [`engine`]: The orchestration engine seam and its CloudFormation client
//! - [`stack`]: The per-stack façade tying the above together
//! - [`deployment`]: Sets of stacks built from configuration
//! - [`build`]: Packer image builds
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! deployment:
//!   name: tutor
//!   env_name: qa
//!   region: us-east-1
//!
//! stacks:
//!   - id: network
//!   - id: web
//!     parameter_defaults:
//!       InstanceType: t3.small
//!     secrets:
//!       - id: app
//!         specifications:
//!           - from: file
//!             path: secrets/web.yml
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod aws;
pub mod build;
pub mod changeset;
pub mod cli;
pub mod config;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod parameters;
pub mod secrets;
pub mod stack;
pub mod tags;
pub mod template;
pub mod volatile;
pub mod wait;

// ============================================================================
// Re-exports
// ============================================================================

pub use changeset::{ChangePreviewer, StageOutcome};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeployConfig};
pub use deployment::{Deployment, DeploymentServices};
pub use engine::{CloudFormationEngine, OrchestrationEngine, StackStatus, StatusReport};
pub use error::{DeployError, Result};
pub use parameters::{ParameterMap, ParameterSet, ParameterValue};
pub use secrets::{SecretStore, Secrets, SecretsSet};
pub use stack::{CreateReport, Stack, StackDefinition, StackServices, UpdateReport};
pub use tags::{Tag, TagReconciler};
pub use template::{Template, TemplateStore};
pub use wait::{Poller, StackWaiter, WaitOutcome};
