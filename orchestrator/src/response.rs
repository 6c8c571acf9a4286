//! The response surface returned to callers, partial or complete.

use std::collections::BTreeMap;

use generation_pipeline::{ConfidenceReport, Extraction, ProvenanceEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseMetadata {
    pub total_time_ms: u64,
    /// Per-stage wall clock, in stage execution order.
    pub per_stage_ms: BTreeMap<String, u64>,
    /// True when the pipeline did not run to completion and the response
    /// was assembled from whatever stages finished.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Hint for callers when a circuit breaker rejected the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiResponse {
    pub query_id: String,
    pub short_answer: String,
    pub detailed_summary: String,
    pub structured_extractions: Vec<Extraction>,
    pub provenance: Vec<ProvenanceEntry>,
    pub confidence: ConfidenceReport,
    pub metadata: ResponseMetadata,
}
