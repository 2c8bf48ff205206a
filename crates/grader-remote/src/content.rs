//! Backend-agnostic access to repository contents.
//!
//! [`RepositoryContent`] is the seam between the grader and the code host:
//! the GitHub client implements it over HTTP and [`crate::fakes`] provides an
//! in-memory implementation for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
    #[serde(other)]
    Other,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    /// Base name of the entry.
    pub name: String,
    /// Full remote path of the entry.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

/// Read access to files stored in a remote repository.
#[async_trait]
pub trait RepositoryContent: Send + Sync {
    /// Raw bytes of `path` in `repository` at `reference` (empty = default branch).
    ///
    /// Fails with `RemoteError::NotFound` when the path does not exist.
    async fn fetch_file(&self, repository: &str, path: &str, reference: &str) -> Result<Vec<u8>>;

    /// Entries under `path`.
    ///
    /// When `path` names a file, the listing contains that single file entry.
    async fn list_directory(
        &self,
        repository: &str,
        path: &str,
        reference: &str,
    ) -> Result<Vec<ContentEntry>>;
}

/// Strip leading/trailing slashes the way the contents API expects paths.
pub fn clean_remote_path(path: &str) -> &str {
    path.trim_matches('/')
}
