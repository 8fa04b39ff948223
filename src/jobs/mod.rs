//! Generation job lifecycle.
//!
//! A job moves pending -> processing -> completed or failed. A failed job
//! can be manually requeued; a completed one is final. The state machine
//! itself lives on [`GenerationJob`], the persistence mirroring on
//! [`JobOrchestrator`].

mod error;
mod job;
mod orchestrator;

pub use error::JobError;
pub use job::GenerationJob;
pub use orchestrator::JobOrchestrator;
