//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Interpreter used when `GRADER_PYTHON` is unset.
pub const DEFAULT_PYTHON: &str = "python3";
/// Script wall-clock limit in seconds when `GRADER_SCRIPT_TIMEOUT` is unset.
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 30;

/// Settings for [`crate::engine::VerificationEngine`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interpreter executable the student script is passed to.
    pub python: String,
    pub script_timeout_secs: u64,
    /// Local directory holding fallback copies of required files.
    pub backup_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl EngineConfig {
    /// Read `GRADER_PYTHON`, `GRADER_SCRIPT_TIMEOUT` and `GRADER_BACKUP_ROOT`.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            python: non_blank("GRADER_PYTHON").unwrap_or_else(|| DEFAULT_PYTHON.to_string()),
            script_timeout_secs: non_blank("GRADER_SCRIPT_TIMEOUT")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS),
            backup_root: non_blank("GRADER_BACKUP_ROOT").map(PathBuf::from),
        }
    }

    /// Defaults without consulting the environment.
    pub fn new() -> Self {
        Self::from_lookup(|_| None)
    }

    pub fn with_python(mut self, python: &str) -> Self {
        self.python = python.to_string();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.script_timeout_secs = secs;
        self
    }

    pub fn with_backup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.backup_root = Some(root.into());
        self
    }
}
