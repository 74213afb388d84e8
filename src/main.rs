//! Stackdeploy CLI entrypoint.
//!
//! This is the main entrypoint for the stackdeploy command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stackdeploy::aws::load_sdk_config;
use stackdeploy::build::{BuildOptions, ImageBuilder};
use stackdeploy::cli::{Cli, Commands, OutputFormatter, SecretsCommands, StackSelection, overrides_from};
use stackdeploy::config::{ConfigParser, ConfigValidator, DeployConfig, ValidationError, find_config_file};
use stackdeploy::deployment::{Deployment, DeploymentServices, template_path};
use stackdeploy::engine::CloudFormationEngine;
use stackdeploy::error::{ConfigError, Result};
use stackdeploy::secrets::{ForcePatterns, GithubArtifactSource, SsmSecretStore};
use stackdeploy::stack::StackServices;
use stackdeploy::tags::{AwsResourceTagging, ResourceTagging};
use stackdeploy::template::{InlineTemplateStore, S3TemplateStore, Template, TemplateStore};
use stackdeploy::volatile::AutoScalingCapacity;
use stackdeploy::wait::TokioSleeper;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", formatter.error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<()> {
    let config_path = cli.config.as_ref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, formatter),
        Commands::Create {
            selection,
            params,
            wait,
            dry_run,
        } => {
            let overrides = overrides_from(&params)?;
            let deployment = load_deployment(config_path, dry_run).await?;
            let reports = deployment.create(&selection.stacks, &overrides, wait).await?;
            emit(&formatter.format_create(&reports))
        }
        Commands::Update {
            selection,
            params,
            force_secrets,
            wait,
            dry_run,
        } => {
            let overrides = overrides_from(&params)?;
            let force = ForcePatterns::new(force_secrets.as_slice())?;
            let deployment = load_deployment(config_path, dry_run).await?;
            let reports = deployment
                .update(&selection.stacks, &overrides, &force, wait)
                .await?;
            emit(&formatter.format_update(&reports))
        }
        Commands::Delete {
            selection,
            wait,
            yes,
            dry_run,
        } => cmd_delete(config_path, &selection, wait, yes, dry_run, formatter).await,
        Commands::Status { selection } => {
            let deployment = load_deployment(config_path, false).await?;
            let reports = deployment.status(&selection.stacks).await?;
            emit(&formatter.format_status(&reports))
        }
        Commands::Output { stack, key } => {
            let deployment = load_deployment(config_path, false).await?;
            let unit = deployment
                .stack(&stack)
                .ok_or_else(|| ConfigError::validation(format!("Unknown stack '{stack}'"), "stack"))?;
            let value = unit.output_value(&key).await?;
            emit(&formatter.format_output_value(unit.name(), &key, &value))
        }
        Commands::Secrets { command } => cmd_secrets(config_path, command, formatter).await,
        Commands::BuildImage {
            image,
            sha,
            branch,
            debug,
            dry_run,
        } => {
            let options = BuildOptions {
                sha,
                branch,
                verbose: cli.verbose,
                debug,
                dry_run,
            };
            cmd_build_image(config_path, &image, &options, formatter).await
        }
    }
}

/// Validate configuration and templates.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let (config, base_path) = read_config(config_path)?;
    info!("Validating deployment {}", config.deployment.name);

    let mut result = ConfigValidator::new().check(&config);

    // Templates are checked only when the configuration itself is sound.
    if result.is_valid() {
        for (index, stack) in config.stacks.iter().enumerate() {
            let field = format!("stacks[{index}].template");
            let template = template_path(stack, &base_path, &config.settings)
                .and_then(|path| Template::from_file(&path));
            match template {
                Ok(template) => debug!(
                    "Template for {} declares {} parameters",
                    stack.id,
                    template.parameter_names().len()
                ),
                Err(e) => result.errors.push(ValidationError {
                    field,
                    message: e.to_string(),
                }),
            }
        }
    }

    emit(&formatter.format_validation(&config, &result, show_warnings))?;

    if let Some(first) = result.errors.first() {
        return Err(ConfigError::validation(first.message.clone(), first.field.clone()).into());
    }
    Ok(())
}

/// Delete stacks after confirmation.
async fn cmd_delete(
    config_path: Option<&PathBuf>,
    selection: &StackSelection,
    wait: bool,
    auto_approve: bool,
    dry_run: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let deployment = load_deployment(config_path, dry_run).await?;
    let targets = deployment.select(&selection.stacks)?;

    if !auto_approve && !dry_run {
        eprintln!("The following stacks and their secrets will be deleted:");
        for (id, stack) in &targets {
            eprintln!("  - {} ({id})", stack.name());
        }
        if deployment.is_production() {
            eprint!("{}", formatter.warning("This is the production environment."));
        }
        eprint!("\nThis action is IRREVERSIBLE. Type 'delete' to confirm: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "delete" {
            eprintln!("Deletion cancelled.");
            return Ok(());
        }
    }

    let outcomes = deployment.delete(&selection.stacks, wait).await?;
    emit(&formatter.format_delete(&outcomes))
}

/// Secrets management commands.
async fn cmd_secrets(config_path: Option<&PathBuf>, command: SecretsCommands, formatter: &OutputFormatter) -> Result<()> {
    match command {
        SecretsCommands::Create { selection, dry_run } => {
            let deployment = load_deployment(config_path, dry_run).await?;
            for (id, stack) in deployment.select(&selection.stacks)? {
                stack.secrets().create().await?;
                emit(&formatter.success(&format!("Secrets written for {id}")))?;
            }
        }
        SecretsCommands::Update {
            selection,
            force_secrets,
            dry_run,
        } => {
            let force = ForcePatterns::new(force_secrets.as_slice())?;
            let deployment = load_deployment(config_path, dry_run).await?;
            for (id, stack) in deployment.select(&selection.stacks)? {
                let message = if stack.secrets().update(&force).await? {
                    format!("Secrets updated for {id}")
                } else {
                    format!("Secrets unchanged for {id}")
                };
                emit(&formatter.success(&message))?;
            }
        }
        SecretsCommands::Delete { selection, dry_run } => {
            let deployment = load_deployment(config_path, dry_run).await?;
            for (id, stack) in deployment.select(&selection.stacks)?.into_iter().rev() {
                stack.secrets().delete().await?;
                emit(&formatter.success(&format!("Secrets deleted for {id}")))?;
            }
        }
    }
    Ok(())
}

/// Build a machine image.
async fn cmd_build_image(
    config_path: Option<&PathBuf>,
    image_id: &str,
    options: &BuildOptions,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, base_path) = load_config(config_path)?;
    let image = config
        .images
        .iter()
        .find(|i| i.id == image_id)
        .ok_or_else(|| ConfigError::validation(format!("Unknown image '{image_id}'"), "image"))?;

    let builder = ImageBuilder::new(image, &base_path, &config.deployment.region);
    let built = builder.build(options).await?;
    emit(&formatter.format_image(image_id, built.as_deref()))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Reads configuration with environment overrides. Returns it with the
/// directory relative paths are resolved against.
fn read_config(config_path: Option<&PathBuf>) -> Result<(DeployConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading configuration from: {}", config_file.display());

    let base_path = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let parser = ConfigParser::new().with_base_path(&base_path);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;
    Ok((config, base_path))
}

/// Reads and validates configuration.
fn load_config(config_path: Option<&PathBuf>) -> Result<(DeployConfig, PathBuf)> {
    let (config, base_path) = read_config(config_path)?;
    for warning in ConfigValidator::new().validate(&config)?.warnings {
        warn!("{warning}");
    }

    Ok((config, base_path))
}

/// Loads configuration and wires the AWS-backed services.
async fn load_deployment(config_path: Option<&PathBuf>, dry_run: bool) -> Result<Deployment> {
    let (config, base_path) = load_config(config_path)?;
    let settings = &config.settings;
    let sdk = load_sdk_config(Some(&config.deployment.region)).await;

    let templates: Arc<dyn TemplateStore> = match &settings.template_bucket {
        Some(bucket) => Arc::new(S3TemplateStore::from_sdk_config(
            &sdk,
            bucket,
            settings.template_folder.as_deref(),
            settings.template_bucket_region.as_deref(),
        )),
        None => Arc::new(InlineTemplateStore),
    };

    let has_tags = !config.tags.is_empty() || config.stacks.iter().any(|s| !s.tags.is_empty());
    let tagging: Option<Arc<dyn ResourceTagging>> = if has_tags {
        Some(Arc::new(AwsResourceTagging::from_sdk_config(&sdk)))
    } else {
        None
    };

    let token = std::env::var(&settings.github_token_env).ok();
    let services = DeploymentServices {
        stack: StackServices {
            engine: Arc::new(CloudFormationEngine::from_sdk_config(&sdk)),
            templates,
            tagging,
            sleeper: Arc::new(TokioSleeper),
            settings: settings.clone(),
        },
        secret_store: Arc::new(SsmSecretStore::from_sdk_config(&sdk)),
        artifacts: Arc::new(GithubArtifactSource::new(token)?),
        capacity: Arc::new(AutoScalingCapacity::from_sdk_config(&sdk)),
    };

    Deployment::from_config(&config, &base_path, services, dry_run).await
}
