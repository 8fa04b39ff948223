//! Router assembly and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::background::BackgroundTasks;
use crate::handlers;
use crate::llm::{ChatClient, ImageGenerator};
use crate::persist::PersistClient;
use crate::worker::WorkerHandle;

/// Shared state for all handlers. Cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub persist: PersistClient,
    pub chat: ChatClient,
    pub images: Arc<dyn ImageGenerator>,
    /// Absent when the pool is disabled (`workers = 0`).
    pub workers: Option<WorkerHandle>,
    pub background: BackgroundTasks,
    pub chat_model: String,
    pub image_model: String,
    pub generation_timeout: Duration,
    pub idle_timeout: Duration,
    pub keep_alive_interval: Duration,
}

/// Build the router.
///
/// The SSE route stays outside the request timeout layer; a stream is
/// expected to outlive any sane whole-request deadline and has its own
/// idle timeout instead.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    let streaming = Router::new().route("/chat/stream", post(handlers::v1::chat::chat_stream));

    let standard = Router::new()
        .route("/image/generate", post(handlers::v1::image::image_generate))
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .merge(streaming)
        .merge(standard)
        .with_state(state)
}
