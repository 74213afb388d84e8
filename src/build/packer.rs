//! Packer command construction and execution.

use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{BuildError, Result};

/// Matches the `<region>: ami-<id>` line Packer prints for created images.
static IMAGE_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[a-z]{2}(?:-[a-z]+)+-\d+: (ami-[0-9a-f]+)\b").ok());

/// A `packer build` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerCommand {
    program: String,
    template: PathBuf,
    only: Vec<String>,
    vars: BTreeMap<String, String>,
    verbose: bool,
    debug: bool,
}

impl PackerCommand {
    /// Creates a command building the given template.
    #[must_use]
    pub fn new(template: impl Into<PathBuf>) -> Self {
        Self {
            program: String::from("packer"),
            template: template.into(),
            only: Vec::new(),
            vars: BTreeMap::new(),
            verbose: false,
            debug: false,
        }
    }

    /// Uses a different executable.
    #[must_use]
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Restricts the build to the given builders.
    #[must_use]
    pub fn only<I, S>(mut self, builders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = builders.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a template variable.
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Enables `PACKER_LOG=1`.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Runs Packer in step-by-step debug mode.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns the template path.
    #[must_use]
    pub fn template(&self) -> &Path {
        &self.template
    }

    /// Returns the arguments passed to the executable.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![String::from("build")];
        if !self.only.is_empty() {
            args.push(format!("--only={}", self.only.join(",")));
        }
        for (key, value) in &self.vars {
            args.push(String::from("--var"));
            args.push(format!("{key}={value}"));
        }
        if self.debug {
            args.push(String::from("--debug"));
        }
        args.push(self.template.display().to_string());
        args
    }

    /// Returns extra environment variables for the process.
    #[must_use]
    pub fn envs(&self) -> Vec<(&'static str, &'static str)> {
        if self.verbose {
            vec![("PACKER_LOG", "1")]
        } else {
            Vec::new()
        }
    }

    /// Returns the command as it would be typed in a shell.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut words = vec![self.program.clone()];
        words.extend(self.args());
        let command = shell_words::join(words);

        self.envs()
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .chain(std::iter::once(command))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the build, streaming its output to stderr, and returns the id
    /// of the created image. In dry-run only logs the command.
    ///
    /// # Errors
    ///
    /// Returns an error if Packer cannot be started or exits unsuccessfully.
    pub async fn run(&self, dry_run: bool) -> Result<Option<String>> {
        let command_line = self.command_line();

        if dry_run {
            info!("**** DRY RUN ****");
            info!("Running: {command_line}");
            return Ok(None);
        }
        info!("Running: {command_line}");

        let mut child = Command::new(&self.program)
            .args(self.args())
            .envs(self.envs())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| BuildError::SpawnFailed {
                command: command_line.clone(),
                message: e.to_string(),
            })?;

        let mut image_id = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                eprintln!("{line}");
                if let Some(id) = extract_image_id(&line) {
                    image_id = Some(id);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(BuildError::NonZeroExit {
                command: command_line,
                code: status.code().unwrap_or(-1),
            }
            .into());
        }

        debug!("Packer finished, image: {image_id:?}");
        Ok(image_id)
    }
}

/// Returns the image id from a `<region>: ami-<id>` output line.
#[must_use]
pub fn extract_image_id(line: &str) -> Option<String> {
    IMAGE_ID
        .as_ref()?
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
