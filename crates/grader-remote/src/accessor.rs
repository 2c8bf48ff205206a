//! Per-attempt access to the files of one repository selection.
//!
//! A [`RepositoryFileAccessor`] wraps a content backend and a selection and
//! caches every fetched file by remote path. One accessor lives for exactly
//! one verification attempt; nothing is shared across requests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::content::{clean_remote_path, RepositoryContent};
use crate::error::{RemoteError, Result};
use crate::selection::RepositorySelection;
use crate::workspace::download_tree;

pub struct RepositoryFileAccessor {
    content: Arc<dyn RepositoryContent>,
    selection: RepositorySelection,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl std::fmt::Debug for RepositoryFileAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFileAccessor")
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl RepositoryFileAccessor {
    pub fn new(content: Arc<dyn RepositoryContent>, selection: RepositorySelection) -> Self {
        Self {
            content,
            selection,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn selection(&self) -> &RepositorySelection {
        &self.selection
    }

    pub fn repository(&self) -> &str {
        self.selection.repository()
    }

    pub fn branch(&self) -> &str {
        &self.selection.branch
    }

    /// `"<repo> (branch <branch>)"`, followed by `" at <remote path>"` when a
    /// relative path is given.
    pub fn describe_source(&self, relative_path: Option<&str>) -> String {
        let base = format!("{} (branch {})", self.repository(), self.branch());
        match relative_path.map(|p| self.selection.resolve_path(p)) {
            Some(remote) if !remote.is_empty() => format!("{} at {}", base, remote),
            _ => base,
        }
    }

    pub fn resolve_remote_path(&self, relative_path: &str) -> String {
        self.selection.resolve_path(relative_path)
    }

    /// Bytes of a path relative to the base path.
    pub async fn read_bytes(&self, relative_path: &str) -> Result<Vec<u8>> {
        let remote = self.selection.resolve_path(relative_path);
        self.read_remote(&remote).await
    }

    /// Bytes of an already-resolved remote path.
    pub async fn read_remote(&self, remote_path: &str) -> Result<Vec<u8>> {
        let remote_path = clean_remote_path(remote_path);
        if let Some(hit) = self.cached(remote_path) {
            debug!(path = %remote_path, "remote cache hit");
            return Ok(hit);
        }

        let bytes = self
            .content
            .fetch_file(self.repository(), remote_path, self.branch())
            .await?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(remote_path.to_string(), bytes.clone());
        Ok(bytes)
    }

    pub async fn read_text(&self, relative_path: &str) -> Result<String> {
        let bytes = self.read_bytes(relative_path).await?;
        String::from_utf8(bytes).map_err(|e| RemoteError::Download {
            repository: self.repository().to_string(),
            path: self.resolve_remote_path(relative_path),
            reference: self.branch().to_string(),
            message: format!("file is not valid UTF-8: {}", e),
        })
    }

    /// `false` only for missing files; other failures propagate.
    pub async fn exists(&self, relative_path: &str) -> Result<bool> {
        match self.read_bytes(relative_path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn download_workspace(&self, paths: &[String], destination: &Path) -> Result<()> {
        download_tree(self.content.as_ref(), &self.selection, paths, destination).await
    }

    /// Remote paths fetched so far.
    pub fn cached_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    fn cached(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(remote_path)
            .cloned()
    }
}
