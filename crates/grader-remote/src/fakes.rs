//! In-memory fakes for the remote seams (testing only)
//!
//! Provides `MemoryRepository` for [`RepositoryContent`] and
//! `StaticRepositoryResolver` for [`RepositoryResolver`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::content::{clean_remote_path, ContentEntry, EntryKind, RepositoryContent};
use crate::error::{RemoteError, Result};
use crate::resolver::RepositoryResolver;
use crate::selection::RepositorySet;

type FileKey = (String, String, String);

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// Files stored by `(repository, branch, path)`.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    files: Mutex<BTreeMap<FileKey, Vec<u8>>>,
    failures: Mutex<HashMap<(String, String), String>>,
    fetches: Mutex<Vec<String>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, repository: &str, branch: &str, path: &str, bytes: &[u8]) {
        self.files.lock().unwrap().insert(
            (
                repository.to_string(),
                branch.to_string(),
                clean_remote_path(path).to_string(),
            ),
            bytes.to_vec(),
        );
    }

    pub fn with_file(self, repository: &str, branch: &str, path: &str, bytes: &[u8]) -> Self {
        self.add_file(repository, branch, path, bytes);
        self
    }

    /// Make every request for `path` in `repository` fail with a download error.
    pub fn fail_path(&self, repository: &str, path: &str, message: &str) {
        self.failures.lock().unwrap().insert(
            (repository.to_string(), clean_remote_path(path).to_string()),
            message.to_string(),
        );
    }

    /// `repository:path` of every `fetch_file` call, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    fn check_failure(&self, repository: &str, path: &str, reference: &str) -> Result<()> {
        let failures = self.failures.lock().unwrap();
        match failures.get(&(repository.to_string(), path.to_string())) {
            Some(message) => Err(RemoteError::Download {
                repository: repository.to_string(),
                path: path.to_string(),
                reference: reference.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn not_found(repository: &str, path: &str, reference: &str) -> RemoteError {
        RemoteError::NotFound {
            repository: repository.to_string(),
            path: path.to_string(),
            reference: reference.to_string(),
        }
    }
}

#[async_trait]
impl RepositoryContent for MemoryRepository {
    async fn fetch_file(&self, repository: &str, path: &str, reference: &str) -> Result<Vec<u8>> {
        let path = clean_remote_path(path);
        self.fetches
            .lock()
            .unwrap()
            .push(format!("{}:{}", repository, path));
        self.check_failure(repository, path, reference)?;

        let files = self.files.lock().unwrap();
        files
            .get(&(
                repository.to_string(),
                reference.to_string(),
                path.to_string(),
            ))
            .cloned()
            .ok_or_else(|| Self::not_found(repository, path, reference))
    }

    async fn list_directory(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Vec<ContentEntry>> {
        let path = clean_remote_path(path);
        self.check_failure(repository, path, reference)?;

        let files = self.files.lock().unwrap();
        let key = (
            repository.to_string(),
            reference.to_string(),
            path.to_string(),
        );
        if let Some((_, _, file_path)) = files.get_key_value(&key).map(|(k, _)| k) {
            let name = file_path.rsplit('/').next().unwrap_or(file_path).to_string();
            return Ok(vec![ContentEntry {
                name,
                path: file_path.clone(),
                kind: EntryKind::File,
            }]);
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
        for (repo, branch, file_path) in files.keys() {
            if repo != repository || branch != reference {
                continue;
            }
            if let Some(rest) = file_path.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        children.insert(dir.to_string(), EntryKind::Dir);
                    }
                    None => {
                        children.entry(rest.to_string()).or_insert(EntryKind::File);
                    }
                }
            }
        }

        if children.is_empty() {
            return Err(Self::not_found(repository, path, reference));
        }
        Ok(children
            .into_iter()
            .map(|(name, kind)| ContentEntry {
                path: format!("{}{}", prefix, name),
                name,
                kind,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// StaticRepositoryResolver
// ---------------------------------------------------------------------------

/// Returns the same repository set for every identity.
#[derive(Debug, Default)]
pub struct StaticRepositoryResolver {
    repositories: RepositorySet,
}

impl StaticRepositoryResolver {
    pub fn new(repositories: RepositorySet) -> Self {
        Self { repositories }
    }
}

impl RepositoryResolver for StaticRepositoryResolver {
    fn resolve_repositories(&self, slug: &str, _role: Option<&str>) -> Result<RepositorySet> {
        if self.repositories.is_empty() {
            return Err(RemoteError::configuration(format!(
                "no GitHub repositories are configured for student '{}'",
                slug
            )));
        }
        Ok(self.repositories.clone())
    }
}
