use thiserror::Error;

/// Errors surfaced by the persistence gateway.
///
/// The gateway performs no retries; callers decide whether a failed write
/// is fatal for their operation.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Transport failure: connect, timeout, or mid-body error.
    #[error("persistence request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The persistence service answered with a non-success status.
    #[error("persistence service rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("failed to decode persistence response: {0}")]
    Decode(String),
}

impl PersistError {
    /// Whether the service reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::Api { status: 404, .. })
    }
}
