use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::storage::{metadata_store::Page, types::artifact::ArtifactType};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct EmrParams {
    pub patient_id: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Ok(Utc.from_utc_datetime(&time));
        }
    }
    Err(ApiError::Validation(format!("unparseable date '{raw}'")))
}

fn kinds_for(kind: &str) -> Result<Option<Vec<ArtifactType>>, ApiError> {
    match kind {
        "care_plans" => Ok(Some(vec![ArtifactType::CarePlan])),
        "medications" => Ok(Some(vec![ArtifactType::MedicationOrder])),
        "notes" => Ok(Some(vec![ArtifactType::Note])),
        "all" => Ok(None),
        other => Err(ApiError::Validation(format!("unknown record kind '{other}'"))),
    }
}

/// Normalized EMR passthrough: `/api/emr/{care_plans|medications|notes|all}`.
pub async fn get_records(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Query(params): Query<EmrParams>,
) -> Result<Json<Value>, ApiError> {
    if params.patient_id.trim().is_empty() {
        return Err(ApiError::Validation("patient_id must be non-empty".into()));
    }
    let artifact_types = kinds_for(&kind)?;
    let date_from = params
        .from
        .as_deref()
        .map(|raw| parse_date(raw, false))
        .transpose()?;
    let date_to = params
        .to
        .as_deref()
        .map(|raw| parse_date(raw, true))
        .transpose()?;
    let page = Page {
        limit: params.limit.unwrap_or(100).min(500),
        offset: params.offset.unwrap_or(0),
    };

    let started = Instant::now();
    let artifacts = state
        .core
        .patient_artifacts(&params.patient_id, artifact_types, date_from, date_to, page)
        .await?;

    let count = artifacts.len();
    Ok(Json(json!({
        "data": artifacts,
        "meta": {
            "count": count,
            "cached": false,
            "fetch_time_ms": u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "timestamp": Utc::now().to_rfc3339(),
        }
    })))
}
