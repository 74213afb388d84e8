//! Resolving branch names to commits.

use tokio::process::Command;
use tracing::debug;

use crate::error::{BuildError, Result};

/// Returns the commit a branch points to, using `git ls-remote`.
///
/// # Errors
///
/// Returns an error if git cannot be run or the branch does not exist.
pub async fn sha_for_branch(repository: &str, branch: &str) -> Result<String> {
    let reference = format!("refs/heads/{branch}");
    let output = Command::new("git")
        .args(["ls-remote", repository, &reference])
        .output()
        .await
        .map_err(|e| BuildError::SpawnFailed {
            command: format!("git ls-remote {repository} {reference}"),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BuildError::NonZeroExit {
            command: format!("git ls-remote {repository} {reference}"),
            code: output.status.code().unwrap_or(-1),
        }
        .into());
    }

    let sha = parse_ls_remote(&String::from_utf8_lossy(&output.stdout), branch).ok_or_else(|| {
        BuildError::UnknownBranch {
            repository: repository.to_string(),
            branch: branch.to_string(),
        }
    })?;

    debug!("{repository} {branch} is at {sha}");
    Ok(sha)
}

/// Finds the sha of `refs/heads/<branch>` in `git ls-remote` output.
#[must_use]
pub fn parse_ls_remote(output: &str, branch: &str) -> Option<String> {
    let reference = format!("refs/heads/{branch}");
    output.lines().find_map(|line| {
        let (sha, name) = line.split_once('\t')?;
        (name.trim() == reference).then(|| sha.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ls_remote() {
        let output = "\
1111111111111111111111111111111111111111\trefs/heads/main
2222222222222222222222222222222222222222\trefs/heads/main-old
3333333333333333333333333333333333333333\trefs/tags/v1
";
        assert_eq!(
            parse_ls_remote(output, "main"),
            Some(String::from("1111111111111111111111111111111111111111"))
        );
        assert_eq!(parse_ls_remote(output, "develop"), None);
    }
}
