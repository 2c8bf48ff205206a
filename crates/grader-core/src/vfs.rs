//! The file set a sandboxed script observes.
//!
//! [`VirtualFileSet`] maps canonical relative paths to staged bytes and to
//! remote paths that may be fetched on demand. Any path the child opens is
//! turned into candidate keys (raw form, relative to each anchor directory,
//! then with leading `./`, `../` and `/` segments stripped) and checked in
//! that order. Nothing here writes to disk.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use grader_remote::RepositoryFileAccessor;
use tracing::{debug, warn};

use crate::error::{Result, VerifyError};

/// POSIX-normalise a relative path: drop empty and `.` segments, fold `..`.
///
/// Returns `None` for empty paths and for paths that climb above their root.
pub fn canonical_key(path: &str) -> Option<String> {
    let posix = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in posix.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Remove leading `./`, `../` and `/` segments.
pub fn strip_leading(path: &str) -> Option<String> {
    let posix = path.replace('\\', "/");
    let mut rest = posix.as_str();
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            break;
        }
    }
    canonical_key(rest)
}

/// Lexically normalise an absolute path (no filesystem access).
fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn relative_key(path: &Path, anchor: &Path) -> Option<String> {
    let rest = path.strip_prefix(anchor).ok()?;
    let text = rest
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    canonical_key(&text)
}

/// Ordered absolute directories relative paths are resolved against.
#[derive(Debug, Clone, Default)]
pub struct AnchorSet {
    anchors: Vec<PathBuf>,
}

impl AnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `dir` and, when it differs, its canonical on-disk form.
    pub fn push(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        let lexical = normalize_absolute(dir);
        let resolved = std::fs::canonicalize(dir).ok();
        for anchor in std::iter::once(lexical).chain(resolved) {
            if !self.anchors.contains(&anchor) {
                self.anchors.push(anchor);
            }
        }
    }

    pub fn with(mut self, dir: impl AsRef<Path>) -> Self {
        self.push(dir);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.anchors.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl<P: AsRef<Path>> FromIterator<P> for AnchorSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = AnchorSet::new();
        for dir in iter {
            set.push(dir);
        }
        set
    }
}

/// Staged bytes, lazily fetchable remote paths and anchors for one run.
#[derive(Debug, Clone, Default)]
pub struct VirtualFileSet {
    files: HashMap<String, Vec<u8>>,
    remote: HashMap<String, String>,
    anchors: AnchorSet,
}

impl VirtualFileSet {
    pub fn new(anchors: AnchorSet) -> Self {
        Self {
            anchors,
            ..Self::default()
        }
    }

    /// Build a set from required-file bytes and a remote map.
    ///
    /// Keys are canonicalised; a key that cannot be is a configuration error.
    pub fn stage<F, R>(required: F, remote_map: R, anchors: AnchorSet) -> Result<Self>
    where
        F: IntoIterator<Item = (String, Vec<u8>)>,
        R: IntoIterator<Item = (String, String)>,
    {
        let mut set = Self::new(anchors);
        for (path, bytes) in required {
            let key = checked_key(&path)?;
            set.insert(&key, bytes);
        }
        for (path, remote) in remote_map {
            let key = checked_key(&path)?;
            set.add_remote(&key, &remote);
        }
        Ok(set)
    }

    /// Stage concrete bytes, replacing any entry under the same key.
    pub fn insert(&mut self, key: &str, bytes: Vec<u8>) {
        self.files.insert(key.to_string(), bytes);
    }

    /// Stage bytes under an alternate key unless that key is already taken.
    pub fn insert_alias(&mut self, key: &str, bytes: &[u8]) -> bool {
        if self.files.contains_key(key) {
            return false;
        }
        self.files.insert(key.to_string(), bytes.to_vec());
        true
    }

    /// Map a canonical key to a remote path; the first mapping wins.
    pub fn add_remote(&mut self, key: &str, remote_path: &str) {
        self.remote
            .entry(key.to_string())
            .or_insert_with(|| remote_path.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.files.get(key).map(Vec::as_slice)
    }

    pub fn remote_path(&self, key: &str) -> Option<&str> {
        self.remote.get(key).map(String::as_str)
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.files.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Candidate canonical keys for `path` as opened from `cwd`, deduplicated.
    pub fn candidates(&self, path: &str, cwd: &Path) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut push = |key: Option<String>| {
            if let Some(key) = key {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        };

        let requested = Path::new(path);
        if !requested.is_absolute() {
            push(canonical_key(path));
        }

        let absolute = if requested.is_absolute() {
            normalize_absolute(requested)
        } else {
            normalize_absolute(&cwd.join(requested))
        };
        for anchor in self.anchors.iter() {
            push(relative_key(&absolute, anchor));
        }

        push(strip_leading(path));
        keys
    }

    /// Staged bytes for `path`, without touching the network.
    pub fn resolve_local(&self, path: &str, cwd: &Path) -> Option<&[u8]> {
        self.candidates(path, cwd)
            .iter()
            .find_map(|key| self.files.get(key))
            .map(Vec::as_slice)
    }

    /// Staged bytes, else the first remote mapping that fetches successfully.
    ///
    /// Fetch failures are logged and treated as misses so the caller can fall
    /// through to the real filesystem.
    pub async fn resolve(
        &self,
        path: &str,
        cwd: &Path,
        remote: Option<&RepositoryFileAccessor>,
    ) -> Option<Vec<u8>> {
        let keys = self.candidates(path, cwd);
        debug!(path = %path, candidates = ?keys, "resolving virtual file");

        if let Some(bytes) = keys.iter().find_map(|key| self.files.get(key)) {
            return Some(bytes.clone());
        }

        let accessor = remote?;
        for key in &keys {
            let Some(remote_path) = self.remote.get(key) else {
                continue;
            };
            match accessor.read_remote(remote_path).await {
                Ok(bytes) => return Some(bytes),
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "lazy remote fetch failed");
                }
            }
        }
        None
    }
}

fn checked_key(path: &str) -> Result<String> {
    canonical_key(path).ok_or_else(|| {
        VerifyError::configuration(format!(
            "file path '{}' does not name a file inside the workspace",
            path
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("./a//b/./c.csv").as_deref(), Some("a/b/c.csv"));
        assert_eq!(canonical_key("a/x/../b").as_deref(), Some("a/b"));
        assert_eq!(canonical_key("data\\raw\\q.csv").as_deref(), Some("data/raw/q.csv"));
        assert_eq!(canonical_key("../secrets"), None);
        assert_eq!(canonical_key("./"), None);
    }

    #[test]
    fn test_strip_leading() {
        assert_eq!(strip_leading("../../sources/a.csv").as_deref(), Some("sources/a.csv"));
        assert_eq!(strip_leading("/sources/a.csv").as_deref(), Some("sources/a.csv"));
        assert_eq!(strip_leading("./.hidden").as_deref(), Some(".hidden"));
    }

    #[test]
    fn test_candidate_order() {
        let anchors = AnchorSet::new().with("/run/ws/students/ana");
        let set = VirtualFileSet::new(anchors);
        let keys = set.candidates("../sources/a.csv", Path::new("/run/ws/students/ana/scripts"));
        assert_eq!(keys, vec!["sources/a.csv".to_string()]);

        let keys = set.candidates("data.csv", Path::new("/run/ws/students/ana/scripts"));
        assert_eq!(keys, vec!["data.csv".to_string(), "scripts/data.csv".to_string()]);
    }

    #[test]
    fn test_absolute_path_resolves_through_anchor() {
        let anchors = AnchorSet::new().with("/run/ws");
        let set = VirtualFileSet::stage(
            vec![("sources/a.csv".to_string(), b"x".to_vec())],
            Vec::new(),
            anchors,
        )
        .unwrap();
        assert_eq!(
            set.resolve_local("/run/ws/sources/a.csv", Path::new("/elsewhere")),
            Some(&b"x"[..])
        );
        assert_eq!(set.resolve_local("/other/sources/b.csv", Path::new("/")), None);
    }

    #[test]
    fn test_alias_never_overwrites() {
        let mut set = VirtualFileSet::default();
        set.insert("a.csv", b"concrete".to_vec());
        assert!(!set.insert_alias("a.csv", b"alias"));
        assert!(set.insert_alias("base/a.csv", b"alias"));
        assert_eq!(set.get("a.csv"), Some(&b"concrete"[..]));
        assert_eq!(set.keys(), vec!["a.csv", "base/a.csv"]);
    }

    #[test]
    fn test_stage_rejects_escaping_keys() {
        let err = VirtualFileSet::stage(
            vec![("../x.csv".to_string(), Vec::new())],
            Vec::new(),
            AnchorSet::new(),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_remote_mapping_first_wins() {
        let mut set = VirtualFileSet::default();
        set.add_remote("a.csv", "base/a.csv");
        set.add_remote("a.csv", "other/a.csv");
        assert_eq!(set.remote_path("a.csv"), Some("base/a.csv"));
    }
}
