use axum::{http::StatusCode, response::IntoResponse};

/// Process liveness for orchestration probes.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
