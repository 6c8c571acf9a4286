use axum::{extract::Path, extract::State, Json};
use serde_json::{json, Value};

use crate::{api_state::ApiState, error::ApiError};

/// Trigger offline indexing for one patient.
pub async fn index_patient(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if patient_id.trim().is_empty() {
        return Err(ApiError::Validation("patient_id must be non-empty".into()));
    }
    let report = state.core.index_patient(&patient_id).await?;
    Ok(Json(json!({
        "indexed_chunks": report.indexed_chunks,
        "indexed_artifacts": report.indexed_artifacts,
        "elapsed_ms": report.elapsed_ms,
    })))
}

/// Remove a patient's vectors, metadata and caches. Idempotent.
pub async fn clear_patient(
    State(state): State<ApiState>,
    Path(patient_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if patient_id.trim().is_empty() {
        return Err(ApiError::Validation("patient_id must be non-empty".into()));
    }
    let removed_chunks = state.core.clear_patient(&patient_id).await?;
    Ok(Json(json!({ "removed_chunks": removed_chunks })))
}
