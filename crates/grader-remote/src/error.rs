//! Error types for grader-remote

use thiserror::Error;

/// Errors raised while talking to the remote repository host.
///
/// `NotFound` and `Download` are kept apart on purpose: only a missing path
/// is a reason to try another candidate repository.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Missing token, unknown repository key, malformed template...
    #[error("{0}")]
    Configuration(String),

    /// The path does not exist at the requested ref (HTTP 404)
    #[error("{repository}:{path} not found on {}", display_ref(.reference))]
    NotFound {
        repository: String,
        path: String,
        reference: String,
    },

    /// Transport failure or any other HTTP error status
    #[error("download of {repository}:{path} ({}) failed: {message}", display_ref(.reference))]
    Download {
        repository: String,
        path: String,
        reference: String,
        message: String,
    },
}

impl RemoteError {
    /// Shorthand for a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        RemoteError::Configuration(message.into())
    }

    /// Whether this error means the remote content is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }

    /// Whether this error is a configuration problem (never retried).
    pub fn is_configuration(&self) -> bool {
        matches!(self, RemoteError::Configuration(_))
    }

    /// Remote path the error refers to, when it refers to one.
    pub fn path(&self) -> Option<&str> {
        match self {
            RemoteError::NotFound { path, .. } | RemoteError::Download { path, .. } => Some(path),
            RemoteError::Configuration(_) => None,
        }
    }
}

fn display_ref(reference: &str) -> String {
    if reference.is_empty() {
        "default branch".to_string()
    } else {
        format!("branch {}", reference)
    }
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;
