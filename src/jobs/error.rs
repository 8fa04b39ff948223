use thiserror::Error;

use crate::persist::{JobStatus, PersistError};

/// Errors from the job lifecycle.
#[derive(Debug, Error)]
pub enum JobError {
    /// The requested transition is not allowed from the job's current
    /// state. The in-memory job is left untouched.
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The transition was applied in memory but the persistence write
    /// failed. The in-memory state is authoritative.
    #[error("job state persisted with error: {0}")]
    Persist(#[from] PersistError),
}
