use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use orchestrator::AuditFilter;
use serde::Deserialize;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize, Default)]
pub struct AuditParams {
    pub patient_id: Option<String>,
    pub user_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub format: Option<String>,
}

fn filter_from(params: &AuditParams) -> AuditFilter {
    AuditFilter {
        patient_id: params.patient_id.clone(),
        user_id: params.user_id.clone(),
        date_from: params.from,
        date_to: params.to,
        success: params.success,
    }
}

/// Recent audit entries from the in-memory ring, privacy mode applied.
pub async fn list_entries(
    State(state): State<ApiState>,
    Query(params): Query<AuditParams>,
) -> Response {
    let entries = state.core.audit_log().query(&filter_from(&params));
    Json(entries).into_response()
}

/// Export matching entries as JSON (default) or CSV.
pub async fn export_entries(
    State(state): State<ApiState>,
    Query(params): Query<AuditParams>,
) -> Result<Response, ApiError> {
    let filter = filter_from(&params);
    match params.format.as_deref().unwrap_or("json") {
        "json" => {
            let body = state
                .core
                .audit_log()
                .export_json(&filter)
                .map_err(ApiError::from)?;
            Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
        }
        "csv" => {
            let body = state.core.audit_log().export_csv(&filter);
            Ok(([(header::CONTENT_TYPE, "text/csv")], body).into_response())
        }
        other => Err(ApiError::Validation(format!(
            "unknown export format '{other}'"
        ))),
    }
}
