//! Unified error kinds for the danmaku gateway.
//!
//! These map directly onto the "Error Handling Design" section of the
//! platform specification: each variant names a *kind*, not a concrete
//! failure site, so that every crate in the workspace can convert its own
//! local errors into one of these and the API surface can render the
//! unified `{success:false, errorCode, errorMessage}` envelope from it.

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed request or missing required field.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Token unknown, expired, disabled, or UA-filtered.
    #[error("authorization denied: {0}")]
    AuthDenied(String),

    /// Library row missing and no fallback cache entry exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key collision on task submission.
    #[error("conflicting task for key {0}")]
    Conflict(String),

    /// Rate limit exhausted; carries the retry-after delta in seconds.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    LimitExceeded { retry_after_secs: u64 },

    /// Upstream adapter/metadata call timed out.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Upstream adapter/metadata call could not be reached.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// A state transition could not be completed consistently.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Signature verification or key material failure. The affected
    /// component is disabled; other components continue operating.
    #[error("fatal integrity failure: {0}")]
    Fatal(String),

    /// Escape hatch for persistence-layer failures.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Escape hatch for anything not worth a dedicated variant.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// The dandanplay-compatible error code for this error kind, per
    /// the unified envelope mapping (HTTP 400->1001, 404/403->1003, 500->500).
    pub fn error_code(&self) -> i32 {
        match self {
            GatewayError::InputInvalid(_) => 1001,
            GatewayError::AuthDenied(_) | GatewayError::NotFound(_) => 1003,
            GatewayError::Conflict(_) => 409,
            _ => 500,
        }
    }
}
