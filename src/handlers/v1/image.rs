//! Image generation endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{info, warn};

use crate::api::{ImageGenerateRequest, ImageGenerateResponse};
use crate::handlers::{bad_request, internal_error, service_unavailable};
use crate::jobs::{GenerationJob, JobError, JobOrchestrator};
use crate::llm::ImageInput;
use crate::persist::{JobStatus, JobType};
use crate::server::AppState;
use crate::worker::WorkerError;

/// POST /image/generate
///
/// Creates a generation job, then either queues it for the worker pool
/// (`deferred: true`) or runs a single inline attempt under the hard
/// generation timeout.
pub async fn image_generate(
    State(state): State<AppState>,
    Json(request): Json<ImageGenerateRequest>,
) -> Response {
    if request.prompt.trim().is_empty() {
        return bad_request("prompt must not be empty");
    }

    let input_data = json!({
        "prompt": request.prompt,
        "size": request.size,
        "quality": request.quality,
        "model": state.image_model.clone(),
    });

    let orchestrator = JobOrchestrator::new(state.persist.clone());
    let mut job = match orchestrator.create(JobType::Image, input_data).await {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "failed to create generation job");
            return internal_error("failed to create generation job");
        }
    };

    if request.deferred {
        return enqueue_deferred(&state, job);
    }

    if let Err(e) = orchestrator.begin(&mut job).await {
        match e {
            // In-memory state stands; the write failure is already logged.
            JobError::Persist(_) => {}
            JobError::InvalidTransition { .. } => return internal_error(e.to_string()),
        }
    }

    let input = ImageInput {
        prompt: request.prompt,
        size: request.size,
        quality: request.quality,
        model: state.image_model.clone(),
    };

    match tokio::time::timeout(state.generation_timeout, state.images.generate(&input)).await {
        Ok(Ok(result)) => {
            let result_data = json!({
                "url": result.url.clone(),
                "revised_prompt": result.revised_prompt.clone(),
                "model": state.image_model.clone(),
                "size": input.size,
                "quality": input.quality,
            });
            let _ = orchestrator.complete(&mut job, result_data).await;
            info!(job_id = job.id, "image generated");
            Json(ImageGenerateResponse {
                job_id: job.id,
                status: JobStatus::Completed,
                success: true,
                url: Some(result.url),
                revised_prompt: Some(result.revised_prompt),
                error: None,
            })
            .into_response()
        }
        Ok(Err(e)) => fail_inline(&orchestrator, job, e.to_string()).await,
        Err(_) => {
            let message = format!(
                "generation timed out after {}s",
                state.generation_timeout.as_secs()
            );
            fail_inline(&orchestrator, job, message).await
        }
    }
}

fn enqueue_deferred(state: &AppState, job: GenerationJob) -> Response {
    let Some(workers) = &state.workers else {
        return service_unavailable("background workers are not running");
    };
    match workers.enqueue(job) {
        Ok(receipt) => {
            info!(job_id = receipt.job_id, "generation job queued");
            (
                StatusCode::ACCEPTED,
                Json(ImageGenerateResponse {
                    job_id: receipt.job_id,
                    status: JobStatus::Pending,
                    success: true,
                    url: None,
                    revised_prompt: None,
                    error: None,
                }),
            )
                .into_response()
        }
        Err(WorkerError::QueueFull) => service_unavailable("generation queue is full"),
        Err(WorkerError::Closed) => service_unavailable("background workers are shut down"),
    }
}

async fn fail_inline(
    orchestrator: &JobOrchestrator,
    mut job: GenerationJob,
    message: String,
) -> Response {
    warn!(job_id = job.id, error = %message, "inline generation failed");
    let _ = orchestrator.fail(&mut job, message.clone()).await;
    Json(ImageGenerateResponse {
        job_id: job.id,
        status: JobStatus::Failed,
        success: false,
        url: None,
        revised_prompt: None,
        error: Some(message),
    })
    .into_response()
}
