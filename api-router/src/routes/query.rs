use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use orchestrator::{QueryOptions, UiResponse};
use serde::Deserialize;

use crate::api_state::ApiState;

#[derive(Debug, Deserialize, Default)]
pub struct QueryRequestOptions {
    pub timeout_ms: Option<u64>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub patient_id: String,
    pub query_text: String,
    #[serde(default)]
    pub options: Option<QueryRequestOptions>,
}

pub fn options_from_request(request_options: Option<QueryRequestOptions>, headers: &HeaderMap) -> QueryOptions {
    let request_options = request_options.unwrap_or_default();
    QueryOptions {
        timeout_ms: request_options.timeout_ms,
        audit_disabled: false,
        session_id: request_options.session_id,
        user_id: request_options.user_id,
        ip: headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    }
}

/// HTTP status policy: 200 for complete and partial answers, 400 for
/// validation failures, 429 with `Retry-After` when a breaker is open,
/// 500 for internal faults.
pub fn response_status(response: &UiResponse) -> (StatusCode, Option<u64>) {
    match response.metadata.error.as_deref() {
        Some("validation_error") => (StatusCode::BAD_REQUEST, None),
        Some("circuit_open") => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(response.metadata.retry_after_secs.unwrap_or(30)),
        ),
        Some("internal") => (StatusCode::INTERNAL_SERVER_ERROR, None),
        _ => (StatusCode::OK, None),
    }
}

pub async fn query(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    let options = options_from_request(request.options, &headers);
    let response = state
        .core
        .process(&request.patient_id, &request.query_text, options)
        .await;

    let (status, retry_after) = response_status(&response);
    match retry_after {
        Some(secs) => (
            status,
            [(header::RETRY_AFTER, secs.to_string())],
            Json(response),
        )
            .into_response(),
        None => (status, Json(response)).into_response(),
    }
}
