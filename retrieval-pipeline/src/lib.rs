//! Staged retrieval over one patient's indexed record: metadata pre-filter,
//! hybrid dense+lexical search, multi-signal scoring, re-ranking,
//! diversification, time decay and highlight generation. Every stage is
//! deterministic given its inputs and the reference time; only the filter
//! and hybrid stages touch external dependencies.

pub mod decay;
pub mod diversify;
pub mod filter;
pub mod highlight;
pub mod lexical;
pub mod pipeline;
pub mod rerank;
pub mod scoring;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{metadata_store::MetadataStore, types::chunk::Chunk, vector_index::VectorIndex},
    utils::{
        breaker::BreakerRegistry, cache::TtlLruCache, deadline::Deadline,
        embedding::EmbeddingProvider,
    },
};
use query_understanding::StructuredQuery;
use serde::{Deserialize, Serialize};

pub use filter::PatientIndex;
pub use pipeline::{RetrievalConfig, StageKind};

/// One highlighted span inside a candidate's content, byte offsets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TermHighlight {
    pub start: usize,
    pub end: usize,
    pub term: String,
    #[serde(rename = "type")]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Entity,
    Fuzzy,
}

/// A chunk travelling through the retrieval stages, picking up signals as
/// it goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    /// Current blended score; rewritten by each scoring stage.
    pub score: f32,
    /// 1-based rank after the most recent re-sort.
    pub rank: usize,
    pub semantic_score: f32,
    pub lexical_score: f32,
    /// Score before re-ranking, kept for the re-rank formula and audit.
    pub original_score: f32,
    /// Multiplicative penalty applied by the diversifier (1.0 = none).
    pub diversity_penalty: f32,
    /// 1-based position of this chunk among its artifact's candidates.
    pub artifact_position: usize,
    pub days_ago: i64,
    pub time_decay_factor: f32,
    pub snippet: String,
    pub term_highlights: Vec<TermHighlight>,
    pub highlighted_html: String,
}

impl RetrievalCandidate {
    pub fn new(chunk: Chunk, semantic_score: f32, lexical_score: f32, score: f32) -> Self {
        Self {
            chunk,
            score,
            rank: 0,
            semantic_score,
            lexical_score,
            original_score: score,
            diversity_penalty: 1.0,
            artifact_position: 1,
            days_ago: 0,
            time_decay_factor: 1.0,
            snippet: String::new(),
            term_highlights: Vec::new(),
            highlighted_html: String::new(),
        }
    }
}

/// Shared handles the retrieval stages draw on.
pub struct RetrievalResources<'a> {
    pub store: &'a MetadataStore,
    pub vector_index: &'a VectorIndex,
    pub embedder: &'a EmbeddingProvider,
    pub patient_index_cache: &'a TtlLruCache<Arc<PatientIndex>>,
    pub breakers: &'a BreakerRegistry,
}

/// Run the full retrieval pipeline for a structured query. An empty result
/// means no chunk survived the metadata filter or search; the caller maps
/// that onto a "no matching records" response.
pub async fn retrieve(
    resources: &RetrievalResources<'_>,
    query: &StructuredQuery,
    reference_time: DateTime<Utc>,
    deadline: &Deadline,
    config: RetrievalConfig,
) -> Result<Vec<RetrievalCandidate>, AppError> {
    pipeline::run_pipeline(resources, query, reference_time, deadline, config).await
}
