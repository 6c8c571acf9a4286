//! HTTP surface for the query core: the query endpoints (plain and SSE),
//! patient indexing, the normalized EMR passthrough, audit queries and
//! health probes.

use axum::{
    routing::{get, post},
    Router,
};

pub mod api_state;
pub mod error;
mod routes;

use api_state::ApiState;
use routes::{
    audit::{export_entries, list_entries},
    emr::get_records,
    index::{clear_patient, index_patient},
    liveness::live,
    query::query,
    readiness::ready,
    stream::query_stream,
};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/api/query", post(query))
        .route("/api/query/stream", post(query_stream))
        .route(
            "/api/index/patient/{patient_id}",
            post(index_patient).delete(clear_patient),
        )
        .route("/api/emr/{kind}", get(get_records))
        .route("/api/audit", get(list_entries))
        .route("/api/audit/export", get(export_entries))
        .with_state(state)
}
