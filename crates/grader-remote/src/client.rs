//! GitHub contents API client
//!
//! Thin authenticated wrapper around `GET /repos/{owner}/{repo}/contents/{path}`.
//! Raw file bytes are requested with the `application/vnd.github.v3.raw`
//! media type; directory listings use the JSON media type.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::GitHubConfig;
use crate::content::{clean_remote_path, ContentEntry, RepositoryContent};
use crate::error::{RemoteError, Result};

const RAW_MEDIA_TYPE: &str = "application/vnd.github.v3.raw";
const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// Authenticated client for the GitHub contents API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: Url,
    http: reqwest::Client,
}

impl GitHubClient {
    /// Create a client. Fails fast with a configuration error when no token
    /// is configured.
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                RemoteError::configuration(
                    "GitHub integration is not configured: set GITHUB_TOKEN or configure a token in the admin panel",
                )
            })?;

        let api_url = Url::parse(config.api_url.trim_end_matches('/')).map_err(|e| {
            RemoteError::configuration(format!(
                "invalid GitHub API URL '{}': {}",
                config.api_url, e
            ))
        })?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RemoteError::configuration("GitHub token contains invalid characters"))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let timeout = Some(config.timeout_secs)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| {
                RemoteError::configuration(format!(
                    "GitHub timeout must be a positive number of seconds, got {}",
                    config.timeout_secs
                ))
            })?;

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                RemoteError::configuration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(GitHubClient { api_url, http })
    }

    /// Create a client from `GITHUB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(GitHubConfig::from_env())
    }

    fn contents_url(&self, repository: &str, path: &str, reference: &str) -> Result<Url> {
        let repository = repository.trim().trim_matches('/');
        if repository.is_empty() {
            return Err(RemoteError::configuration(
                "the GitHub repository is not configured",
            ));
        }

        let mut url = self.api_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RemoteError::configuration(format!(
                    "GitHub API URL '{}' cannot be a base",
                    self.api_url
                ))
            })?;
            segments.pop_if_empty().push("repos");
            segments.extend(repository.split('/'));
            segments.push("contents");
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
        }
        if !reference.is_empty() {
            url.query_pairs_mut().append_pair("ref", reference);
        }
        Ok(url)
    }

    async fn get(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
        media_type: &'static str,
        action: &str,
    ) -> Result<reqwest::Response> {
        let url = self.contents_url(repository, path, reference)?;
        debug!(
            repository = %repository,
            path = %path,
            reference = %reference,
            action,
            "github request"
        );

        let response = self
            .http
            .get(url)
            .header(ACCEPT, media_type)
            .send()
            .await
            .map_err(|e| RemoteError::Download {
                repository: repository.to_string(),
                path: path.to_string(),
                reference: reference.to_string(),
                message: format!("could not reach GitHub while {}: {}", action, e),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                repository: repository.to_string(),
                path: path.to_string(),
                reference: reference.to_string(),
            });
        }
        if status.is_client_error() || status.is_server_error() {
            let details = error_details(response).await;
            return Err(RemoteError::Download {
                repository: repository.to_string(),
                path: path.to_string(),
                reference: reference.to_string(),
                message: format!(
                    "GitHub answered {} while {}: {}",
                    status.as_u16(),
                    action,
                    details
                ),
            });
        }
        Ok(response)
    }
}

/// Render an error body: the JSON `message` field when present, raw text otherwise.
async fn error_details(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or(text)
}

#[async_trait]
impl RepositoryContent for GitHubClient {
    async fn fetch_file(&self, repository: &str, path: &str, reference: &str) -> Result<Vec<u8>> {
        let path = clean_remote_path(path);
        if path.is_empty() {
            return Err(RemoteError::configuration(
                "the path requested from the GitHub repository is empty",
            ));
        }

        let response = self
            .get(repository, path, reference, RAW_MEDIA_TYPE, "reading")
            .await?;
        let bytes = response.bytes().await.map_err(|e| RemoteError::Download {
            repository: repository.to_string(),
            path: path.to_string(),
            reference: reference.to_string(),
            message: format!("failed to read response body: {}", e),
        })?;
        Ok(bytes.to_vec())
    }

    async fn list_directory(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Vec<ContentEntry>> {
        let path = clean_remote_path(path);
        let response = self
            .get(repository, path, reference, JSON_MEDIA_TYPE, "listing")
            .await?;

        let invalid = |detail: String| RemoteError::Download {
            repository: repository.to_string(),
            path: path.to_string(),
            reference: reference.to_string(),
            message: format!("GitHub returned an invalid listing: {}", detail),
        };

        let body = response.text().await.map_err(|e| invalid(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| invalid(e.to_string()))?;

        if value.is_array() {
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
        } else {
            let entry: ContentEntry =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
            Ok(vec![entry])
        }
    }
}
