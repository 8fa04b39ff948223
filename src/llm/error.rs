//! Upstream provider error types.

use thiserror::Error;

/// Errors that can occur when calling the upstream generation providers.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP transport to the provider failed (network, timeout, TLS).
    #[error("upstream unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),

    /// Provider returned a non-2xx response.
    #[error("upstream rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },
}
