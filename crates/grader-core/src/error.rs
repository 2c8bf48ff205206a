//! Error types for grader-core

use grader_remote::RemoteError;
use thiserror::Error;

/// Failures of the sandboxed child process itself.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Wall-clock limit hit; the child was killed.
    #[error("script timed out after {limit_secs} seconds (execution timeout) and was terminated")]
    Timeout { limit_secs: u64 },

    #[error("script execution was cancelled")]
    Cancelled,

    #[error("execution I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end a verification attempt before output validation.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// Not retryable; surfaced verbatim to the caller.
    #[error("{0}")]
    Configuration(String),

    /// A remote path is missing (HTTP 404).
    #[error("{0}")]
    NotFound(RemoteError),

    /// Transport or HTTP failure other than 404.
    #[error("{0}")]
    Download(RemoteError),

    #[error(transparent)]
    Execution(ExecutionError),

    #[error("verification was cancelled")]
    Cancelled,

    #[error("completion could not be recorded: {0}")]
    Completion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VerifyError {
    pub fn configuration(message: impl Into<String>) -> Self {
        VerifyError::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, VerifyError::Configuration(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VerifyError::NotFound(_))
    }
}

impl From<RemoteError> for VerifyError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Configuration(message) => VerifyError::Configuration(message),
            e @ RemoteError::NotFound { .. } => VerifyError::NotFound(e),
            e @ RemoteError::Download { .. } => VerifyError::Download(e),
        }
    }
}

impl From<ExecutionError> for VerifyError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Cancelled => VerifyError::Cancelled,
            other => VerifyError::Execution(other),
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, VerifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_keep_their_taxon() {
        let missing: VerifyError = RemoteError::NotFound {
            repository: "acme/ventas".to_string(),
            path: "a.py".to_string(),
            reference: "main".to_string(),
        }
        .into();
        assert!(missing.is_not_found());
        assert!(missing.to_string().contains("acme/ventas:a.py"));

        let config: VerifyError = RemoteError::configuration("GITHUB_TOKEN is not set").into();
        assert!(config.is_configuration());
        assert_eq!(config.to_string(), "GITHUB_TOKEN is not set");
    }

    #[test]
    fn test_cancelled_execution_maps_to_cancelled() {
        let err: VerifyError = ExecutionError::Cancelled.into();
        assert!(matches!(err, VerifyError::Cancelled));

        let err: VerifyError = ExecutionError::Timeout { limit_secs: 5 }.into();
        assert!(err.to_string().contains("timed out after 5 seconds"));
    }
}
