//! HTTP handlers and shared response helpers.

pub mod v1;

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

// ============================================================================
// Health
// ============================================================================

pub async fn livez() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn readyz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ============================================================================
// Problem Details
// ============================================================================

/// RFC 7807 problem response.
pub fn problem(status: StatusCode, title: &str, detail: impl Into<String>) -> Response {
    let body = json!({
        "title": title,
        "status": status.as_u16(),
        "detail": detail.into(),
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        body.to_string(),
    )
        .into_response()
}

pub fn bad_request(detail: impl Into<String>) -> Response {
    problem(StatusCode::BAD_REQUEST, "Bad Request", detail)
}

pub fn not_found(detail: impl Into<String>) -> Response {
    problem(StatusCode::NOT_FOUND, "Not Found", detail)
}

pub fn internal_error(detail: impl Into<String>) -> Response {
    problem(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error",
        detail,
    )
}

pub fn service_unavailable(detail: impl Into<String>) -> Response {
    problem(
        StatusCode::SERVICE_UNAVAILABLE,
        "Service Unavailable",
        detail,
    )
}
