use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::warn;

use crate::api_state::ApiState;

/// Readiness: the service can reach its metadata store.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.core.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            warn!(error = %err, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
