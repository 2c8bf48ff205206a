//! Per-request verification context.
//!
//! Carries the request id used in logs and the cancellation signal that
//! in-flight fetches and the sandboxed child observe.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, VerifyError};

/// Cloneable cancellation flag. Cancelling is permanent.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // the sender lives as long as any token
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerificationContext {
    request_id: String,
    cancel: CancellationToken,
}

impl Default for VerificationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationContext {
    /// Fresh context with a random request id.
    pub fn new() -> Self {
        Self::with_request_id(&uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` unless the request is cancelled first; the future is dropped
    /// on cancellation.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(VerifyError::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancel.cancelled() => Err(VerifyError::Cancelled),
        }
    }
}
