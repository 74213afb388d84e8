//! Machine image builds.
//!
//! This module contains:
//! - The Packer command builder and runner
//! - Branch to commit resolution
//! - Image naming

mod git;
mod packer;

pub use git::{parse_ls_remote, sha_for_branch};
pub use packer::{PackerCommand, extract_image_id};

use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::config::ImageConfig;
use crate::error::Result;

/// Builder restricted to by default.
pub const DEFAULT_BUILDER: &str = "amazon-ebs";

/// Branch resolved when neither a sha nor a branch is given.
pub const DEFAULT_BRANCH: &str = "master";

/// Options for one image build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Commit to build; resolved from `branch` when absent.
    pub sha: Option<String>,
    /// Branch to resolve when no sha is given.
    pub branch: Option<String>,
    /// Enable Packer logging.
    pub verbose: bool,
    /// Run Packer in debug mode.
    pub debug: bool,
    /// Log the command instead of running it.
    pub dry_run: bool,
}

/// Returns `<base>@<sha7> <yymmddHHMMZ>`, or `<base> <yymmddHHMMZ>` without
/// a sha.
#[must_use]
pub fn ami_name(base: &str, sha: Option<&str>, now: DateTime<Utc>) -> String {
    let timestamp = now.format("%y%m%d%H%MZ");
    match sha {
        Some(sha) => {
            let short: String = sha.chars().take(7).collect();
            format!("{base}@{short} {timestamp}")
        }
        None => format!("{base} {timestamp}"),
    }
}

/// Builds one configured image.
#[derive(Debug, Clone, Copy)]
pub struct ImageBuilder<'a> {
    image: &'a ImageConfig,
    base_path: &'a Path,
    region: &'a str,
}

impl<'a> ImageBuilder<'a> {
    /// Creates a builder. Relative template paths are resolved against
    /// `base_path`.
    #[must_use]
    pub const fn new(image: &'a ImageConfig, base_path: &'a Path, region: &'a str) -> Self {
        Self {
            image,
            base_path,
            region,
        }
    }

    /// Resolves the commit to build.
    ///
    /// # Errors
    ///
    /// Returns an error if a branch must be resolved and cannot be.
    pub async fn resolve_sha(&self, options: &BuildOptions) -> Result<Option<String>> {
        if let Some(sha) = &options.sha {
            return Ok(Some(sha.clone()));
        }
        match &self.image.repository {
            Some(repository) => {
                let branch = options.branch.as_deref().unwrap_or(DEFAULT_BRANCH);
                sha_for_branch(repository, branch).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Returns the Packer command for a build of `sha` started at `now`.
    #[must_use]
    pub fn command(&self, sha: Option<&str>, options: &BuildOptions, now: DateTime<Utc>) -> PackerCommand {
        let base = self.image.ami_name_base.as_deref().unwrap_or(&self.image.id);
        let name = ami_name(base, sha, now);
        let only = self.image.only.as_deref().unwrap_or(DEFAULT_BUILDER);

        let mut description = serde_json::Map::new();
        if let Some(sha) = sha {
            description.insert(String::from("sha"), serde_json::Value::from(sha));
        }
        if let Some(repository) = &self.image.repository {
            description.insert(String::from("repository"), serde_json::Value::from(repository.as_str()));
        }

        let mut command = PackerCommand::new(self.base_path.join(&self.image.template))
            .only(only.split(',').map(str::trim))
            .var("region", self.region)
            .var("ami_name", name)
            .var("ami_description", serde_json::Value::Object(description).to_string())
            .verbose(options.verbose)
            .debug(options.debug);

        if let Some(sha) = sha {
            command = command.var("sha", sha);
        }
        for (key, value) in &self.image.vars {
            command = command.var(key, value);
        }
        command
    }

    /// Resolves the commit and runs the build. Returns the created image id
    /// when Packer reported one.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution or the build fails.
    pub async fn build(&self, options: &BuildOptions) -> Result<Option<String>> {
        let sha = self.resolve_sha(options).await?;
        let command = self.command(sha.as_deref(), options, Utc::now());

        let image_id = command.run(options.dry_run).await?;
        if let Some(id) = &image_id {
            info!("Image {} built: {id}", self.image.id);
        }
        Ok(image_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn image() -> ImageConfig {
        ImageConfig {
            id: String::from("web"),
            template: PathBuf::from("packer/web.json"),
            only: None,
            vars: BTreeMap::from([(String::from("instance_type"), String::from("t3.small"))]),
            ami_name_base: Some(String::from("tutor-web")),
            repository: Some(String::from("https://github.com/openstax/tutor-server")),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single().expect("valid time")
    }

    #[test]
    fn test_ami_name() {
        assert_eq!(
            ami_name("tutor-web", Some("0123456789abcdef"), now()),
            "tutor-web@0123456 2403091405Z"
        );
        assert_eq!(ami_name("tutor-web", None, now()), "tutor-web 2403091405Z");
    }

    #[test]
    fn test_command_vars() {
        let image = image();
        let builder = ImageBuilder::new(&image, Path::new("/work"), "us-east-1");
        let command = builder.command(Some("0123456789abcdef"), &BuildOptions::default(), now());
        let args = command.args();

        assert_eq!(command.template(), Path::new("/work/packer/web.json"));
        assert!(args.contains(&String::from("--only=amazon-ebs")));
        assert!(args.contains(&String::from("ami_name=tutor-web@0123456 2403091405Z")));
        assert!(args.contains(&String::from("sha=0123456789abcdef")));
        assert!(args.contains(&String::from("instance_type=t3.small")));
        assert!(args.contains(&String::from("region=us-east-1")));
    }

    #[tokio::test]
    async fn test_explicit_sha_skips_resolution() {
        let image = image();
        let builder = ImageBuilder::new(&image, Path::new("/work"), "us-east-1");
        let options = BuildOptions {
            sha: Some(String::from("abc")),
            ..BuildOptions::default()
        };
        assert_eq!(builder.resolve_sha(&options).await.expect("resolve"), Some(String::from("abc")));
    }

    #[tokio::test]
    async fn test_no_repository_means_no_sha() {
        let mut image = image();
        image.repository = None;
        let builder = ImageBuilder::new(&image, Path::new("/work"), "us-east-1");
        assert_eq!(builder.resolve_sha(&BuildOptions::default()).await.expect("resolve"), None);
    }
}
