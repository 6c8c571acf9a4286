//! Per-request context threaded through the orchestrated stages. Partial
//! stage outputs accumulate here so the partial-results handler can build
//! the richest response available when something fails.

use chrono::{DateTime, Utc};
use common::utils::generation::GenerationOutput;
use generation_pipeline::{ConfidenceReport, ProvenanceEntry, ValidatedExtraction};
use query_understanding::StructuredQuery;
use retrieval_pipeline::RetrievalCandidate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    QueryUnderstanding,
    Retrieval,
    Generation,
    ConfidenceScoring,
    ProvenanceFormatting,
    ResponseBuilding,
    AuditLogging,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueryUnderstanding => "query_understanding",
            Self::Retrieval => "retrieval",
            Self::Generation => "generation",
            Self::ConfidenceScoring => "confidence_scoring",
            Self::ProvenanceFormatting => "provenance_formatting",
            Self::ResponseBuilding => "response_building",
            Self::AuditLogging => "audit_logging",
        }
    }
}

/// Caller-supplied knobs for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overall deadline; defaults to the configured query timeout.
    pub timeout_ms: Option<u64>,
    /// Disabled only in tests; production always audits.
    pub audit_disabled: bool,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct QueryContext {
    pub query_id: String,
    pub patient_id: String,
    pub query_text: String,
    pub options: QueryOptions,
    pub reference_time: DateTime<Utc>,

    pub structured_query: Option<StructuredQuery>,
    pub candidates: Vec<RetrievalCandidate>,
    pub generation: Option<GenerationOutput>,
    pub prompt_system: Option<String>,
    pub prompt_user: Option<String>,
    pub prompt_temperature: f32,
    pub prompt_max_tokens: u32,
    pub validated: Vec<ValidatedExtraction>,
    pub confidence: Option<ConfidenceReport>,
    pub provenance: Vec<ProvenanceEntry>,

    pub completed_stages: Vec<Stage>,
    pub stage_timings: Vec<(Stage, u64)>,
}

impl QueryContext {
    pub fn new(
        query_id: String,
        patient_id: &str,
        query_text: &str,
        options: QueryOptions,
        reference_time: DateTime<Utc>,
    ) -> Self {
        Self {
            query_id,
            patient_id: patient_id.to_string(),
            query_text: query_text.to_string(),
            options,
            reference_time,
            structured_query: None,
            candidates: Vec::new(),
            generation: None,
            prompt_system: None,
            prompt_user: None,
            prompt_temperature: 0.0,
            prompt_max_tokens: 0,
            validated: Vec::new(),
            confidence: None,
            provenance: Vec::new(),
            completed_stages: Vec::new(),
            stage_timings: Vec::new(),
        }
    }

    pub fn record_stage(&mut self, stage: Stage, elapsed_ms: u64) {
        self.completed_stages.push(stage);
        self.stage_timings.push((stage, elapsed_ms));
    }

    pub fn stage_completed(&self, stage: Stage) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn valid_extractions(&self) -> Vec<&ValidatedExtraction> {
        self.validated.iter().filter(|v| v.valid).collect()
    }

    pub fn per_stage_ms(&self) -> std::collections::BTreeMap<String, u64> {
        self.stage_timings
            .iter()
            .map(|&(stage, ms)| (stage.as_str().to_string(), ms))
            .collect()
    }

    pub fn total_time_ms(&self) -> u64 {
        let elapsed = Utc::now().signed_duration_since(self.reference_time);
        u64::try_from(elapsed.num_milliseconds().max(0)).unwrap_or(u64::MAX)
    }
}
