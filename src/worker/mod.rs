//! Background worker pool for deferred generation jobs.
//!
//! A fixed set of workers drains a bounded queue. Each dequeued job is
//! driven through its lifecycle: begin, then up to `max_attempts`
//! generation calls under a hard per-call timeout, then complete or fail.
//! Queue rejection is immediate so callers can report backpressure
//! instead of blocking.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::jobs::{GenerationJob, JobError, JobOrchestrator};
use crate::llm::{ImageGenerator, ImageInput};

/// Terminal result of a dequeued job, mirrored to the receipt holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(String),
}

/// Handed back on enqueue. The outcome channel resolves when a worker
/// finishes the job; dropping it does not cancel the job.
#[derive(Debug)]
pub struct JobReceipt {
    pub job_id: i64,
    pub outcome: oneshot::Receiver<JobOutcome>,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job queue is full")]
    QueueFull,
    #[error("worker pool is shut down")]
    Closed,
}

struct Dispatch {
    job: GenerationJob,
    done: oneshot::Sender<JobOutcome>,
}

/// Shared context for every worker task.
struct WorkerContext {
    orchestrator: JobOrchestrator,
    images: Arc<dyn ImageGenerator>,
    generation_timeout: Duration,
    max_attempts: u32,
}

/// Handle to a running pool. Cloneable; any clone can enqueue, and
/// `shutdown` stops all clones' workers.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<Dispatch>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Queue a job for execution. Fails fast when the queue is at
    /// capacity.
    pub fn enqueue(&self, job: GenerationJob) -> Result<JobReceipt, WorkerError> {
        let job_id = job.id;
        let (done, outcome) = oneshot::channel();
        self.sender
            .try_send(Dispatch { job, done })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => WorkerError::Closed,
            })?;
        Ok(JobReceipt { job_id, outcome })
    }

    /// Stop accepting work and wait for in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("worker pool stopped");
    }
}

pub struct WorkerPool;

impl WorkerPool {
    /// Spawn the configured number of workers over a bounded queue.
    pub fn start(
        config: &WorkerConfig,
        generation_timeout: Duration,
        orchestrator: JobOrchestrator,
        images: Arc<dyn ImageGenerator>,
    ) -> WorkerHandle {
        let (sender, receiver) = mpsc::channel::<Dispatch>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            orchestrator,
            images,
            generation_timeout,
            max_attempts: config.max_attempts,
        });

        for worker_id in 0..config.workers {
            let receiver = Arc::clone(&receiver);
            let ctx = Arc::clone(&ctx);
            let cancel = cancel.clone();
            tracker.spawn(async move {
                worker_loop(worker_id, receiver, ctx, cancel).await;
            });
        }
        info!(workers = config.workers, queue = config.queue_capacity, "worker pool started");

        WorkerHandle {
            sender,
            tracker,
            cancel,
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    loop {
        let dispatch = tokio::select! {
            () = cancel.cancelled() => break,
            d = async { receiver.lock().await.recv().await } => d,
        };
        let Some(Dispatch { job, done }) = dispatch else {
            break;
        };

        debug!(worker_id, job_id = job.id, "job dequeued");
        let outcome = run_job(&ctx, job).await;
        // Receipt holder may have gone away; the job is done either way.
        let _ = done.send(outcome);
    }
    debug!(worker_id, "worker stopped");
}

async fn run_job(ctx: &WorkerContext, mut job: GenerationJob) -> JobOutcome {
    if let Err(e) = ctx.orchestrator.begin(&mut job).await {
        match e {
            // Memory state is authoritative; the orchestrator logged it.
            JobError::Persist(_) => {}
            JobError::InvalidTransition { .. } => return JobOutcome::Failed(e.to_string()),
        }
    }

    let input: ImageInput = match serde_json::from_value(job.input.clone()) {
        Ok(input) => input,
        Err(e) => {
            let message = format!("invalid job input: {e}");
            let _ = ctx.orchestrator.fail(&mut job, message.clone()).await;
            return JobOutcome::Failed(message);
        }
    };

    let mut last_error = String::from("no attempts made");
    for attempt in 1..=ctx.max_attempts {
        match tokio::time::timeout(ctx.generation_timeout, ctx.images.generate(&input)).await {
            Ok(Ok(result)) => {
                let result_data = json!({
                    "url": result.url,
                    "revised_prompt": result.revised_prompt,
                    "model": input.model.clone(),
                    "size": input.size.clone(),
                    "quality": input.quality.clone(),
                });
                let _ = ctx.orchestrator.complete(&mut job, result_data.clone()).await;
                info!(job_id = job.id, attempt, "generation job completed");
                return JobOutcome::Completed(result_data);
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!(
                    "generation timed out after {}s",
                    ctx.generation_timeout.as_secs()
                );
            }
        }
        warn!(job_id = job.id, attempt, error = %last_error, "generation attempt failed");
    }

    let _ = ctx.orchestrator.fail(&mut job, last_error.clone()).await;
    JobOutcome::Failed(last_error)
}

// ============================================================================
// Tests
// ============================================================================
