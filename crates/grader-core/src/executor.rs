//! Sandboxed script execution.
//!
//! The child runs with its working directory set to the execution root, a
//! null stdin, piped stdout/stderr and a hard wall-clock deadline. It is
//! killed when the deadline passes or the request is cancelled. Only an
//! allow-listed part of the host environment reaches the child.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::CancellationToken;
use crate::error::ExecutionError;
use crate::shim::prepend_pythonpath;

/// Host variables passed through to student code; everything else is dropped.
const INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "LANG",
    "LANGUAGE",
    "TZ",
    "TMPDIR",
    "TEMP",
    "TMP",
    "SYSTEMROOT",
];

/// Prefixes of host variables passed through to student code.
const INHERITED_PREFIXES: &[&str] = &["LC_", "PYTHON"];

/// Whether a host variable reaches the child.
pub fn is_inherited(name: &str) -> bool {
    INHERITED_ENV.contains(&name) || INHERITED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Captured result of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// How the child's environment is prepared.
#[derive(Debug, Clone, Default)]
pub struct ExecutionConfig {
    /// Directory prepended to `PYTHONPATH`.
    pub hook_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hook_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    interpreter: String,
}

impl SandboxedExecutor {
    pub fn new(interpreter: &str) -> Self {
        Self {
            interpreter: interpreter.to_string(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Run `script` under the interpreter from `execution_root`.
    pub async fn run(
        &self,
        script: &Path,
        execution_root: &Path,
        config: &ExecutionConfig,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutput, ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .current_dir(execution_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear()
            .envs(
                std::env::vars_os().filter(|(name, _)| name.to_str().is_some_and(is_inherited)),
            )
            .env("PYTHONDONTWRITEBYTECODE", "1");
        if let Some(dir) = &config.hook_dir {
            let existing: Option<OsString> = std::env::var_os("PYTHONPATH");
            let existing = existing.as_ref().and_then(|v| v.to_str());
            command.env("PYTHONPATH", prepend_pythonpath(dir, existing));
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let start = Instant::now();
        let child = command.spawn().map_err(|source| ExecutionError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?;
        debug!(script = %script.display(), pid = ?child.id(), "script started");

        // dropping the wait future drops the child, and kill_on_drop reaps it
        let output = tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
                Ok(output) => output?,
                Err(_) => {
                    warn!(
                        script = %script.display(),
                        limit_secs = timeout.as_secs(),
                        "script timed out"
                    );
                    return Err(ExecutionError::Timeout {
                        limit_secs: timeout.as_secs(),
                    });
                }
            },
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
        };

        let result = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        };
        debug!(exit_code = ?result.exit_code, duration_ms = result.duration_ms, "script finished");
        Ok(result)
    }
}
