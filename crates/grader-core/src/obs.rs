//! Structured observability hooks for verification lifecycle events.
//!
//! - Request-scoped tracing spans via [`verification_span`]
//! - Emission functions for lifecycle events: start, candidate, fallback,
//!   backup use, configuration error, finish
//!
//! Routine grading failures are logged at `info!`; only configuration errors
//! and unexpected internal errors go to `error!`.

use tracing::{error, info, warn};

/// Span tagged with the request, identity and mission of one verification.
///
/// Attach it to the verification future with `tracing::Instrument`.
pub fn verification_span(request_id: &str, slug: &str, mission_id: &str) -> tracing::Span {
    tracing::info_span!(
        "grader.verification",
        request_id = %request_id,
        slug = %slug,
        mission_id = %mission_id,
    )
}

pub fn emit_verification_started(
    request_id: &str,
    slug: &str,
    mission_id: &str,
    candidates: &[String],
) {
    info!(
        event = "verification.started",
        request_id = %request_id,
        slug = %slug,
        mission_id = %mission_id,
        candidates = ?candidates,
    );
}

/// Emit event: a candidate repository is about to be tried.
pub fn emit_candidate(
    request_id: &str,
    key: &str,
    repository: &str,
    branch: &str,
    base_path: &str,
) {
    info!(
        event = "verification.candidate",
        request_id = %request_id,
        key = %key,
        repository = %repository,
        branch = %branch,
        base_path = %base_path,
    );
}

/// Emit event: a candidate lacked a file and the next one will be tried.
pub fn emit_fallback(request_id: &str, key: &str, missing_path: &str) {
    warn!(
        event = "verification.fallback",
        request_id = %request_id,
        key = %key,
        missing_path = %missing_path,
    );
}

pub fn emit_backup_used(request_id: &str, path: &str) {
    warn!(event = "verification.backup_used", request_id = %request_id, path = %path);
}

pub fn emit_config_error(request_id: &str, error: &dyn std::fmt::Display) {
    error!(event = "verification.config_error", request_id = %request_id, error = %error);
}

/// Emit event: an unexpected internal failure (not a grading outcome).
pub fn emit_internal_error(request_id: &str, error: &dyn std::fmt::Display) {
    error!(event = "verification.internal_error", request_id = %request_id, error = %error);
}

pub fn emit_verification_finished(
    request_id: &str,
    status: &str,
    attempts: usize,
    duration_ms: u64,
) {
    info!(
        event = "verification.finished",
        request_id = %request_id,
        status = %status,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}
