use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::persist::{JobPatch, JobStatus, JobType};

use super::JobError;

/// In-memory view of a generation job.
///
/// The transition methods are pure state machine steps: they validate the
/// move, mutate the job, and return the [`JobPatch`] describing exactly
/// what changed. Persistence is the orchestrator's concern.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Starts at 1 on creation; incremented only by manual retry.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn new(id: i64, job_type: JobType, input: Value) -> Self {
        Self {
            id,
            job_type,
            status: JobStatus::Pending,
            input,
            result: None,
            error_message: None,
            attempts: 1,
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending -> Processing. Stamps `started_at` when it is unset; retry
    /// clears both timestamps, so a retried run gets a fresh start time.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<JobPatch, JobError> {
        self.check(JobStatus::Pending, JobStatus::Processing)?;

        self.status = JobStatus::Processing;
        let mut patch = JobPatch {
            status: Some(JobStatus::Processing),
            ..Default::default()
        };
        if self.started_at.is_none() {
            self.started_at = Some(now);
            patch.started_at = Some(now);
        }
        Ok(patch)
    }

    /// Processing -> Completed with the generation result.
    pub fn complete(&mut self, result: Value, now: DateTime<Utc>) -> Result<JobPatch, JobError> {
        self.check(JobStatus::Processing, JobStatus::Completed)?;

        self.status = JobStatus::Completed;
        self.result = Some(result.clone());
        let mut patch = JobPatch {
            status: Some(JobStatus::Completed),
            result_data: Some(result),
            ..Default::default()
        };
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
            patch.completed_at = Some(now);
        }
        Ok(patch)
    }

    /// Processing -> Failed with a human-readable reason.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<JobPatch, JobError> {
        self.check(JobStatus::Processing, JobStatus::Failed)?;

        let error = error.into();
        self.status = JobStatus::Failed;
        self.error_message = Some(error.clone());
        let mut patch = JobPatch {
            status: Some(JobStatus::Failed),
            error_message: Some(Some(error)),
            ..Default::default()
        };
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
            patch.completed_at = Some(now);
        }
        Ok(patch)
    }

    /// Failed -> Pending, bumping the attempt counter. The error and both
    /// timestamps are cleared so the next run stamps fresh ones. A
    /// completed job cannot be re-run; its result is final.
    pub fn retry(&mut self) -> Result<JobPatch, JobError> {
        self.check(JobStatus::Failed, JobStatus::Pending)?;

        self.status = JobStatus::Pending;
        self.attempts += 1;
        self.error_message = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(JobPatch {
            status: Some(JobStatus::Pending),
            attempts: Some(self.attempts),
            // Explicit null so the stored failure text is cleared too.
            error_message: Some(None),
            ..Default::default()
        })
    }

    fn check(&self, from: JobStatus, to: JobStatus) -> Result<(), JobError> {
        if self.status == from {
            Ok(())
        } else {
            Err(JobError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> GenerationJob {
        GenerationJob::new(1, JobType::Image, json!({"prompt": "a cat"}))
    }

    #[test]
    fn happy_path_runs_pending_processing_completed() {
        let mut j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.attempts, 1);

        let now = Utc::now();
        let patch = j.begin(now).unwrap();
        assert_eq!(j.status, JobStatus::Processing);
        assert_eq!(j.started_at, Some(now));
        assert_eq!(patch.status, Some(JobStatus::Processing));
        assert_eq!(patch.started_at, Some(now));

        let done = Utc::now();
        let patch = j.complete(json!({"url": "http://img"}), done).unwrap();
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.completed_at, Some(done));
        assert_eq!(patch.result_data, Some(json!({"url": "http://img"})));
        // Success leaves the attempt counter alone.
        assert_eq!(j.attempts, 1);
    }

    #[test]
    fn failure_then_retry_increments_attempts() {
        let mut j = job();
        j.begin(Utc::now()).unwrap();
        j.fail("upstream timeout", Utc::now()).unwrap();
        assert_eq!(j.status, JobStatus::Failed);
        assert_eq!(j.error_message.as_deref(), Some("upstream timeout"));

        let patch = j.retry().unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.attempts, 2);
        assert!(j.error_message.is_none());
        assert!(j.started_at.is_none());
        assert!(j.completed_at.is_none());
        assert_eq!(patch.attempts, Some(2));
        // The patch nulls the stored message rather than omitting it.
        assert_eq!(patch.error_message, Some(None));

        j.begin(Utc::now()).unwrap();
        j.complete(json!({}), Utc::now()).unwrap();
        assert_eq!(j.attempts, 2);
    }

    #[test]
    fn completed_job_cannot_be_retried() {
        let mut j = job();
        j.begin(Utc::now()).unwrap();
        j.complete(json!({}), Utc::now()).unwrap();

        let err = j.retry().unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Pending,
            }
        ));
        assert_eq!(j.status, JobStatus::Completed);
    }

    #[test]
    fn cannot_complete_without_beginning() {
        let mut j = job();
        let err = j.complete(json!({}), Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(j.status, JobStatus::Pending);
        assert!(j.result.is_none());
    }

    #[test]
    fn cannot_fail_a_pending_job() {
        let mut j = job();
        assert!(j.fail("nope", Utc::now()).is_err());
        assert!(j.error_message.is_none());
    }

    #[test]
    fn retried_job_stamps_fresh_timestamps() {
        let mut j = job();
        let first_start = Utc::now();
        j.begin(first_start).unwrap();
        j.fail("boom", Utc::now()).unwrap();
        j.retry().unwrap();

        let second_start = Utc::now();
        let patch = j.begin(second_start).unwrap();
        assert_eq!(j.started_at, Some(second_start));
        assert_eq!(patch.started_at, Some(second_start));

        let second_end = Utc::now();
        let patch = j.complete(json!({}), second_end).unwrap();
        assert_eq!(j.completed_at, Some(second_end));
        assert_eq!(patch.completed_at, Some(second_end));
    }
}
