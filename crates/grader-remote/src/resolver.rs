//! Identity → available repositories.

use std::sync::Arc;

use crate::config::{process_env, EnvLookup};
use crate::error::{RemoteError, Result};
use crate::hints::{HintTable, RoleMatcher, OPERATIONS_KEY, SALES_KEY};
use crate::selection::{RepositoryInfo, RepositorySet};

/// Resolves the repositories an identity may submit work in.
pub trait RepositoryResolver: Send + Sync {
    /// Fails with a configuration error when nothing is configured.
    fn resolve_repositories(&self, slug: &str, role: Option<&str>) -> Result<RepositorySet>;
}

/// Resolver backed by `GITHUB_<KEY>_REPO` / `GITHUB_<KEY>_BRANCH` variables.
///
/// Keys hinted by the slug or role are used when present; otherwise every
/// configured key is offered.
#[derive(Clone)]
pub struct EnvRepositoryResolver {
    matcher: Arc<dyn RoleMatcher>,
    env: EnvLookup,
    keys: Vec<String>,
}

impl Default for EnvRepositoryResolver {
    fn default() -> Self {
        Self::new(process_env())
    }
}

impl EnvRepositoryResolver {
    pub fn new(env: EnvLookup) -> Self {
        Self {
            matcher: Arc::new(HintTable::standard()),
            env,
            keys: vec![SALES_KEY.to_string(), OPERATIONS_KEY.to_string()],
        }
    }

    pub fn from_env() -> Self {
        Self::default()
    }

    /// Replace the role heuristics.
    pub fn with_matcher(mut self, matcher: Arc<dyn RoleMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.env)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn repo_var(key: &str) -> String {
        format!("GITHUB_{}_REPO", key.to_uppercase())
    }

    fn build_info(&self, key: &str) -> Result<RepositoryInfo> {
        let repo_var = Self::repo_var(key);
        let repository = self.var(&repo_var).ok_or_else(|| {
            RemoteError::configuration(format!(
                "set the {} environment variable to enable repository '{}'",
                repo_var, key
            ))
        })?;
        let branch = self
            .var(&format!("GITHUB_{}_BRANCH", key.to_uppercase()))
            .unwrap_or_else(|| "main".to_string());
        Ok(RepositoryInfo::new(key, &repository, &branch))
    }
}

impl RepositoryResolver for EnvRepositoryResolver {
    fn resolve_repositories(&self, slug: &str, role: Option<&str>) -> Result<RepositorySet> {
        let mut keys: Vec<String> = Vec::new();
        for key in &self.keys {
            if self.matcher.matches(key, slug) || self.matcher.matches(key, role.unwrap_or("")) {
                keys.push(key.clone());
            }
        }
        if keys.is_empty() {
            keys = self
                .keys
                .iter()
                .filter(|k| self.var(&Self::repo_var(k)).is_some())
                .cloned()
                .collect();
        }

        let mut repositories = RepositorySet::new();
        for key in &keys {
            repositories.insert(self.build_info(key)?);
        }

        if repositories.is_empty() {
            return Err(RemoteError::configuration(
                "no GitHub repositories are configured for the student; check GITHUB_VENTAS_REPO and GITHUB_OPERACIONES_REPO",
            ));
        }
        Ok(repositories)
    }
}
