//! Recursive workspace download.
//!
//! Materializes remote files and directories onto local disk, mirroring
//! their paths relative to the selection's base path. Directories are
//! created lazily as entries are written.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::content::{clean_remote_path, ContentEntry, EntryKind, RepositoryContent};
use crate::error::{RemoteError, Result};
use crate::selection::RepositorySelection;

/// Normalize a workspace entry: drop empty and `.` segments, reject `..`.
///
/// Returns `Ok(None)` for entries that normalize to nothing.
pub fn normalize_workspace_entry(entry: &str) -> Result<Option<String>> {
    let mut parts: Vec<&str> = Vec::new();
    for part in entry.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(RemoteError::configuration(format!(
                    "workspace path '{}' must not climb above the base path",
                    entry
                )))
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |acc, part| acc.join(part))
}

fn is_single_file(entries: &[ContentEntry], remote_path: &str) -> bool {
    entries.len() == 1
        && entries[0].kind == EntryKind::File
        && clean_remote_path(&entries[0].path) == remote_path
}

/// Download every path in `paths` (files or directories, relative to the
/// selection's base path) into `destination`.
pub async fn download_tree(
    content: &dyn RepositoryContent,
    selection: &RepositorySelection,
    paths: &[String],
    destination: &Path,
) -> Result<()> {
    let repository = selection.repository();
    let branch = selection.branch.as_str();
    let io_error = |path: &Path, e: std::io::Error| RemoteError::Download {
        repository: repository.to_string(),
        path: path.display().to_string(),
        reference: branch.to_string(),
        message: format!("failed to write workspace file: {}", e),
    };

    tokio::fs::create_dir_all(destination)
        .await
        .map_err(|e| io_error(destination, e))?;

    let mut pending: Vec<String> = Vec::new();
    for entry in paths {
        if let Some(normalized) = normalize_workspace_entry(entry)? {
            pending.push(normalized);
        }
    }
    pending.reverse();

    while let Some(relative) = pending.pop() {
        let remote_path = selection.resolve_path(&relative);
        let entries = content
            .list_directory(repository, &remote_path, branch)
            .await?;

        if is_single_file(&entries, &remote_path) {
            let bytes = content.fetch_file(repository, &remote_path, branch).await?;
            let target = local_path(destination, &relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
            tokio::fs::write(&target, &bytes)
                .await
                .map_err(|e| io_error(&target, e))?;
            debug!(path = %relative, bytes = bytes.len(), "workspace file downloaded");
            continue;
        }

        let dir = local_path(destination, &relative);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        // reversed so children are processed in listing order
        for entry in entries.iter().rev() {
            if entry.name.is_empty() {
                continue;
            }
            match entry.kind {
                EntryKind::File | EntryKind::Dir => {
                    pending.push(format!("{}/{}", relative, entry.name));
                }
                other => {
                    return Err(RemoteError::Download {
                        repository: repository.to_string(),
                        path: entry.path.clone(),
                        reference: branch.to_string(),
                        message: format!("unsupported content type {:?}", other),
                    });
                }
            }
        }
    }

    Ok(())
}
