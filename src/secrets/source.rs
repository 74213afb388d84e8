//! Fetching specification files from source control.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::debug;

use crate::error::{DeployError, Result, SecretError};

/// Raw content host for GitHub repositories.
pub const GITHUB_RAW_URL: &str = "https://raw.githubusercontent.com";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches file content at a revision.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Returns the content of `path` in `org_slash_repo` at `sha`.
    async fn fetch(&self, org_slash_repo: &str, sha: &str, path: &str) -> Result<String>;
}

/// Reads files from GitHub's raw content host.
#[derive(Debug, Clone)]
pub struct GithubArtifactSource {
    /// HTTP client.
    client: Client,
    /// Base URL, overridable for tests and enterprise hosts.
    base_url: String,
    /// Optional access token for private repositories.
    token: Option<String>,
}

impl GithubArtifactSource {
    /// Creates a source for the public host.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base_url(GITHUB_RAW_URL, token)
    }

    /// Creates a source for a custom host.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeployError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn url(&self, org_slash_repo: &str, sha: &str, path: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            org_slash_repo.trim_matches('/'),
            sha,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ArtifactSource for GithubArtifactSource {
    async fn fetch(&self, org_slash_repo: &str, sha: &str, path: &str) -> Result<String> {
        let url = self.url(org_slash_repo, sha, path);
        let source_name = format!("{org_slash_repo}@{sha}:{path}");
        debug!("Fetching {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("token {token}"));
        }

        let response = request.send().await.map_err(|e| SecretError::Specification {
            source_name: source_name.clone(),
            message: format!("Request failed: {e}"),
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SecretError::Specification {
                source_name,
                message: String::from("file not found (or the token cannot read it)"),
            }
            .into());
        }
        if !status.is_success() {
            return Err(SecretError::Specification {
                source_name,
                message: format!("HTTP {}", status.as_u16()),
            }
            .into());
        }

        response.text().await.map_err(|e| {
            SecretError::Specification {
                source_name,
                message: format!("Failed to read response: {e}"),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openstax/secrets/abc123/config/secrets.yml"))
            .and(header_eq("authorization", "token s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string("db:\n  password: uuid\n"))
            .expect(1)
            .mount(&server)
            .await;

        let source = GithubArtifactSource::with_base_url(server.uri(), Some(String::from("s3cret")))
            .expect("client");
        let body = source
            .fetch("openstax/secrets", "abc123", "/config/secrets.yml")
            .await
            .expect("should fetch");
        assert_eq!(body, "db:\n  password: uuid\n");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = GithubArtifactSource::with_base_url(server.uri(), None).expect("client");
        let err = source
            .fetch("openstax/secrets", "abc123", "missing.yml")
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("openstax/secrets@abc123:missing.yml"));
    }
}
