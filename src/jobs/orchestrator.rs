use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::persist::{JobType, PersistClient};

use super::{GenerationJob, JobError};

/// Drives job lifecycle transitions and mirrors each one to the
/// persistence service.
///
/// Every successful transition issues exactly one persistence write. If
/// that write fails the in-memory state still stands and the error is
/// returned, except for [`create`](Self::create) where the job identity
/// comes from the service and there is nothing to keep.
#[derive(Clone)]
pub struct JobOrchestrator {
    persist: PersistClient,
}

impl JobOrchestrator {
    pub fn new(persist: PersistClient) -> Self {
        Self { persist }
    }

    /// Create a job record and return the in-memory job for it.
    pub async fn create(&self, job_type: JobType, input: Value) -> Result<GenerationJob, JobError> {
        let record = self.persist.create_job(job_type, &input).await?;
        let mut job = GenerationJob::new(record.id, job_type, input);
        // The service may seed the counter, e.g. when a record is recreated.
        if let Some(attempts) = record.attempts {
            job.attempts = attempts;
        }
        Ok(job)
    }

    /// Mark the job as processing.
    pub async fn begin(&self, job: &mut GenerationJob) -> Result<(), JobError> {
        let patch = job.begin(Utc::now())?;
        self.write(job, &patch).await
    }

    /// Record a successful generation result.
    pub async fn complete(&self, job: &mut GenerationJob, result: Value) -> Result<(), JobError> {
        let patch = job.complete(result, Utc::now())?;
        self.write(job, &patch).await
    }

    /// Record a failure reason.
    pub async fn fail(
        &self,
        job: &mut GenerationJob,
        error: impl Into<String>,
    ) -> Result<(), JobError> {
        let patch = job.fail(error, Utc::now())?;
        self.write(job, &patch).await
    }

    /// Requeue a failed job for another run.
    pub async fn retry(&self, job: &mut GenerationJob) -> Result<(), JobError> {
        let patch = job.retry()?;
        self.write(job, &patch).await
    }

    async fn write(
        &self,
        job: &GenerationJob,
        patch: &crate::persist::JobPatch,
    ) -> Result<(), JobError> {
        if let Err(e) = self.persist.update_job(job.id, patch).await {
            warn!(job_id = job.id, status = %job.status, error = %e,
                "job transition applied in memory but persistence write failed");
            return Err(JobError::Persist(e));
        }
        Ok(())
    }
}
