//! GitHub client configuration and environment lookup.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Injectable environment-variable lookup.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the process environment.
pub fn process_env() -> EnvLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

/// Default contents API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";
/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = "PortalKidsVerifier/1.0";

/// Settings for [`crate::client::GitHubClient`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubConfig {
    /// Bearer token. Required to build a client.
    pub token: Option<String>,
    /// API base URL (no trailing slash needed)
    pub api_url: String,
    /// Hard per-request deadline in seconds
    pub timeout_secs: f64,
    pub user_agent: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl GitHubConfig {
    /// Read `GITHUB_TOKEN`, `GITHUB_API_URL`, `GITHUB_TIMEOUT` and `GITHUB_USER_AGENT`.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let timeout_secs = non_blank("GITHUB_TIMEOUT")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        GitHubConfig {
            token: non_blank("GITHUB_TOKEN"),
            api_url: non_blank("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout_secs,
            user_agent: non_blank("GITHUB_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        }
    }

    /// Config for a specific endpoint without a token.
    pub fn new(api_url: &str) -> Self {
        GitHubConfig {
            token: None,
            api_url: api_url.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the request timeout
    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = GitHubConfig::from_lookup(lookup(&[]));
        assert_eq!(config.token, None);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_reads_all_variables() {
        let config = GitHubConfig::from_lookup(lookup(&[
            ("GITHUB_TOKEN", " tok "),
            ("GITHUB_API_URL", "https://example.invalid"),
            ("GITHUB_TIMEOUT", "5"),
            ("GITHUB_USER_AGENT", "grader-test"),
        ]));
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.api_url, "https://example.invalid");
        assert_eq!(config.timeout_secs, 5.0);
        assert_eq!(config.user_agent, "grader-test");
    }

    #[test]
    fn test_unparsable_timeout_falls_back() {
        let config = GitHubConfig::from_lookup(lookup(&[("GITHUB_TIMEOUT", "soon")]));
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        let config = GitHubConfig::from_lookup(lookup(&[("GITHUB_TIMEOUT", "-3")]));
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_blank_token_is_absent() {
        let config = GitHubConfig::from_lookup(lookup(&[("GITHUB_TOKEN", "   ")]));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_builders() {
        let config = GitHubConfig::new("http://127.0.0.1:1")
            .with_token("secret")
            .with_timeout_secs(2.5);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 2.5);
    }
}
