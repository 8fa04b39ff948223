#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use genrelay::background::BackgroundTasks;
use genrelay::config::WorkerConfig;
use genrelay::jobs::JobOrchestrator;
use genrelay::llm::{ChatClient, ImageClient, ImageGenerator};
use genrelay::persist::PersistClient;
use genrelay::server::{AppState, build_app};
use genrelay::worker::WorkerPool;

/// Character id the mock persistence service reports as missing.
pub const MISSING_CHARACTER_ID: i64 = 404;

// ============================================================================
// Mock Persistence Service
// ============================================================================

/// In-process stand-in for the persistence service, recording every
/// write it receives.
#[derive(Clone, Default)]
pub struct MockPersist {
    pub messages: Arc<Mutex<Vec<(i64, Value)>>>,
    pub created_jobs: Arc<Mutex<Vec<Value>>>,
    pub patches: Arc<Mutex<Vec<(i64, Value)>>>,
    next_job_id: Arc<AtomicI64>,
}

impl MockPersist {
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/v1/characters/{id}/", get(get_character))
            .route(
                "/api/v1/conversations/{id}/add_message/",
                post(add_message),
            )
            .route("/api/v1/generation-jobs/", post(create_job))
            .route("/api/v1/generation-jobs/{id}/", patch(update_job))
            .with_state(self.clone())
    }
}

async fn get_character(Path(id): Path<i64>) -> axum::response::Response {
    if id == MISSING_CHARACTER_ID {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "not found"}))).into_response();
    }
    Json(json!({
        "id": id,
        "name": "Mika",
        "system_prompt": "You are Mika.",
        "creativity": null,
    }))
    .into_response()
}

async fn add_message(
    State(state): State<MockPersist>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.messages.lock().await.push((id, body));
    Json(json!({"ok": true}))
}

async fn create_job(State(state): State<MockPersist>, Json(body): Json<Value>) -> Json<Value> {
    let id = 100 + state.next_job_id.fetch_add(1, Ordering::SeqCst);
    state.created_jobs.lock().await.push(body);
    Json(json!({"id": id, "status": "pending"}))
}

async fn update_job(
    State(state): State<MockPersist>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.patches.lock().await.push((id, body));
    Json(json!({"ok": true}))
}

// ============================================================================
// Mock Upstream Provider
// ============================================================================

/// Scripted chat-completion and image upstream.
pub fn upstream_router(
    chat_status: StatusCode,
    chat_sse: &str,
    image_status: StatusCode,
    image_body: Value,
) -> Router {
    let chat_sse = chat_sse.to_string();
    Router::new()
        .route(
            "/chat/completions",
            post(move || {
                let body = chat_sse.clone();
                async move {
                    (
                        chat_status,
                        [(header::CONTENT_TYPE, "text/event-stream")],
                        body,
                    )
                }
            }),
        )
        .route(
            "/images/generations",
            post(move || {
                let body = image_body.clone();
                async move { (image_status, Json(body)) }
            }),
        )
}

pub fn image_upstream_ok() -> Value {
    json!({
        "data": [{
            "url": "https://img.example/out.png",
            "revised_prompt": "a detailed painting"
        }]
    })
}

// ============================================================================
// Application Under Test
// ============================================================================

pub struct TestContext {
    pub app: Router,
    pub persist: MockPersist,
    pub background: BackgroundTasks,
}

/// Spawn a router on an ephemeral loopback port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Build the application wired to a mock upstream and mock persistence
/// service.
pub async fn test_app(upstream: Router) -> TestContext {
    let mock = MockPersist::default();
    let persist_addr = spawn(mock.router()).await;
    let upstream_addr = spawn(upstream).await;

    let http = reqwest::Client::new();
    let chat = ChatClient::new(http.clone(), format!("http://{upstream_addr}"), None);
    let images: Arc<dyn ImageGenerator> = Arc::new(ImageClient::new(
        http,
        format!("http://{upstream_addr}"),
        None,
        Duration::from_secs(5),
    ));
    let persist = PersistClient::new(
        format!("http://{persist_addr}"),
        Duration::from_secs(5),
        None,
    )
    .unwrap();

    let worker_config = WorkerConfig {
        workers: 1,
        queue_capacity: 8,
        max_attempts: 2,
    };
    let workers = WorkerPool::start(
        &worker_config,
        Duration::from_secs(5),
        JobOrchestrator::new(persist.clone()),
        Arc::clone(&images),
    );
    let background = BackgroundTasks::new();

    let state = AppState {
        persist,
        chat,
        images,
        workers: Some(workers),
        background: background.clone(),
        chat_model: "gpt-4o".into(),
        image_model: "dall-e-3".into(),
        generation_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(5),
        keep_alive_interval: Duration::from_secs(15),
    };

    TestContext {
        app: build_app(state, Duration::from_secs(10)),
        persist: mock,
        background,
    }
}

// ============================================================================
// Request Helpers
// ============================================================================

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parse `data:` payloads out of an SSE body, skipping comments.
pub fn parse_sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}
