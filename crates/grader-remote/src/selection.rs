//! Repository selection: which `(repository, branch, base path)` a contract reads from.
//!
//! [`RepositorySelector::select`] picks one repository for a contract's
//! `source` block; [`RepositorySelector::rank_candidates`] returns the ordered
//! list of keys a caller may try in sequence when content is missing. The
//! selector only ranks; retrying is the caller's job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{process_env, EnvLookup};
use crate::error::{RemoteError, Result};
use crate::hints::{HintTable, RoleMatcher, OPERATIONS_KEY, SALES_KEY};
use crate::template::format_template;

/// Key a contract uses to ask for the default routing.
pub const DEFAULT_KEY: &str = "default";

/// A repository an identity may submit work in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub key: String,
    /// `owner/name`
    pub repository: String,
    pub default_branch: String,
}

impl RepositoryInfo {
    pub fn new(key: &str, repository: &str, default_branch: &str) -> Self {
        Self {
            key: key.to_string(),
            repository: repository.to_string(),
            default_branch: default_branch.to_string(),
        }
    }
}

/// Insertion-ordered set of repositories keyed by [`RepositoryInfo::key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySet {
    entries: Vec<RepositoryInfo>,
}

impl RepositorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry with the same key, keeping its position.
    pub fn insert(&mut self, info: RepositoryInfo) {
        match self.entries.iter_mut().find(|e| e.key == info.key) {
            Some(existing) => *existing = info,
            None => self.entries.push(info),
        }
    }

    pub fn get(&self, key: &str) -> Option<&RepositoryInfo> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RepositoryInfo> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }
}

impl FromIterator<RepositoryInfo> for RepositorySet {
    fn from_iter<T: IntoIterator<Item = RepositoryInfo>>(iter: T) -> Self {
        let mut set = RepositorySet::new();
        for info in iter {
            set.insert(info);
        }
        set
    }
}

/// A resolved repository, branch and base path for one verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySelection {
    pub info: RepositoryInfo,
    pub branch: String,
    /// Slash-trimmed prefix applied to every relative path.
    pub base_path: String,
}

impl RepositorySelection {
    /// Remote path for `relative_path` under the base path.
    pub fn resolve_path(&self, relative_path: &str) -> String {
        let relative = relative_path.trim_matches('/');
        let base = self.base_path.trim_matches('/');
        match (base.is_empty(), relative.is_empty()) {
            (false, false) => format!("{}/{}", base, relative),
            (false, true) => base.to_string(),
            _ => relative.to_string(),
        }
    }

    pub fn repository(&self) -> &str {
        &self.info.repository
    }
}

/// `source` block of a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Repository key, or `"default"`.
    pub repository: Option<String>,
    /// Environment variable that overrides the branch.
    pub branch_env: Option<String>,
    pub branch: Option<String>,
    pub default_branch: Option<String>,
    pub prefer_repository_by_role: bool,
    /// Template with a `{slug}` placeholder.
    #[serde(alias = "base_path_template")]
    pub base_path: Option<String>,
}

impl SourceConfig {
    /// Normalized requested key; blank means `"default"`.
    pub fn requested_key(&self) -> String {
        self.repository
            .as_deref()
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_KEY.to_string())
    }
}

/// Who is being graded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub slug: String,
    pub role: Option<String>,
}

impl Identity {
    pub fn new(slug: &str, role: Option<&str>) -> Self {
        Self {
            slug: slug.to_string(),
            role: role.map(str::to_string),
        }
    }
}

/// Blank or whitespace-only branches are absent.
pub fn normalize_branch(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Ranks and resolves repositories for contracts.
#[derive(Clone)]
pub struct RepositorySelector {
    matcher: Arc<dyn RoleMatcher>,
    env: EnvLookup,
}

impl Default for RepositorySelector {
    fn default() -> Self {
        Self::new(Arc::new(HintTable::standard()), process_env())
    }
}

impl std::fmt::Debug for RepositorySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySelector").finish_non_exhaustive()
    }
}

impl RepositorySelector {
    pub fn new(matcher: Arc<dyn RoleMatcher>, env: EnvLookup) -> Self {
        Self { matcher, env }
    }

    /// Replace the environment lookup used for `branch_env` overrides.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Pick one repository for `source` and resolve its branch and base path.
    pub fn select(
        &self,
        source: &SourceConfig,
        identity: &Identity,
        repositories: &RepositorySet,
        mission_roles: &[String],
    ) -> Result<RepositorySelection> {
        let key = self
            .rank_candidates(source, identity, repositories, mission_roles)?
            .into_iter()
            .next()
            .ok_or_else(|| no_repositories(identity))?;
        self.resolve(&key, source, identity, repositories)
    }

    /// Ordered candidate keys for `source`.
    ///
    /// An explicit key yields exactly that key. Default routing yields the
    /// role-inferred keys (identity role, then slug, then each mission role)
    /// when `prefer_repository_by_role` is set and more than one repository is
    /// available; otherwise the single tie-break pick.
    pub fn rank_candidates(
        &self,
        source: &SourceConfig,
        identity: &Identity,
        repositories: &RepositorySet,
        mission_roles: &[String],
    ) -> Result<Vec<String>> {
        if repositories.is_empty() {
            return Err(no_repositories(identity));
        }

        let requested = source.requested_key();
        if requested != DEFAULT_KEY {
            if !repositories.contains(&requested) {
                return Err(RemoteError::configuration(format!(
                    "the contract requires repository '{}', but student '{}' has no such repository assigned",
                    requested, identity.slug
                )));
            }
            return Ok(vec![requested]);
        }

        if source.prefer_repository_by_role && repositories.len() > 1 {
            let inferred = self.role_candidates(identity, repositories, mission_roles);
            if !inferred.is_empty() {
                debug!(
                    slug = %identity.slug,
                    candidates = ?inferred,
                    "repository inferred from role hints"
                );
                return Ok(inferred);
            }
        }

        Ok(vec![default_key(repositories)])
    }

    fn role_candidates(
        &self,
        identity: &Identity,
        repositories: &RepositorySet,
        mission_roles: &[String],
    ) -> Vec<String> {
        let role = identity.role.clone().unwrap_or_default();
        let hints = std::iter::once(role.as_str())
            .chain(std::iter::once(identity.slug.as_str()))
            .chain(mission_roles.iter().map(String::as_str));

        let mut keys: Vec<String> = Vec::new();
        for hint in hints {
            if let Some(key) = self.matcher.match_repository(hint, repositories) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Resolve branch and base path for a specific repository key.
    pub fn resolve(
        &self,
        key: &str,
        source: &SourceConfig,
        identity: &Identity,
        repositories: &RepositorySet,
    ) -> Result<RepositorySelection> {
        let info = repositories.get(key).cloned().ok_or_else(|| {
            RemoteError::configuration(format!(
                "the contract requires repository '{}', but student '{}' has no such repository assigned",
                key, identity.slug
            ))
        })?;

        let env_override = source
            .branch_env
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| normalize_branch((self.env)(name).as_deref()));

        let branch = env_override
            .or_else(|| normalize_branch(source.branch.as_deref()))
            .or_else(|| normalize_branch(source.default_branch.as_deref()))
            .or_else(|| normalize_branch(Some(&info.default_branch)))
            .unwrap_or_default();

        let template = source.base_path.as_deref().unwrap_or("");
        let base_path = format_template(template, &[("slug", identity.slug.as_str())])
            .map_err(|e| {
                RemoteError::configuration(format!(
                    "base path template '{}' is invalid: {}",
                    template, e
                ))
            })?
            .trim_matches('/')
            .to_string();

        Ok(RepositorySelection {
            info,
            branch,
            base_path,
        })
    }
}

/// Fixed tie-break: single repository, then sales, then operations, then first.
pub fn default_key(repositories: &RepositorySet) -> String {
    if repositories.len() == 1 {
        return repositories.keys().remove(0);
    }
    for preferred in [SALES_KEY, OPERATIONS_KEY] {
        if repositories.contains(preferred) {
            return preferred.to_string();
        }
    }
    repositories
        .iter()
        .next()
        .map(|info| info.key.clone())
        .unwrap_or_else(|| DEFAULT_KEY.to_string())
}

fn no_repositories(identity: &Identity) -> RemoteError {
    RemoteError::configuration(format!(
        "no GitHub repositories are configured for student '{}'",
        identity.slug
    ))
}
