mod config;
mod stages;

pub use config::RetrievalConfig;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{error::AppError, utils::deadline::Deadline};
use query_understanding::StructuredQuery;
use tracing::{debug, info};

use crate::{RetrievalCandidate, RetrievalResources};

use stages::{
    DiversifyStage, FilterStage, HighlightStage, HybridSearchStage, RerankStage, ScoreStage,
    TimeDecayStage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Filter,
    HybridSearch,
    Score,
    Rerank,
    Diversify,
    TimeDecay,
    Highlight,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::HybridSearch => "hybrid_search",
            Self::Score => "score",
            Self::Rerank => "rerank",
            Self::Diversify => "diversify",
            Self::TimeDecay => "time_decay",
            Self::Highlight => "highlight",
        }
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError>;
}

pub type BoxedStage = Box<dyn PipelineStage>;

#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }
}

pub struct PipelineContext<'a, 'r> {
    pub resources: &'a RetrievalResources<'r>,
    pub query: &'a StructuredQuery,
    pub reference_time: DateTime<Utc>,
    pub deadline: &'a Deadline,
    pub config: RetrievalConfig,
    /// Chunk ids that survived the metadata pre-filter.
    pub candidate_ids: Vec<String>,
    /// Hydrated candidates from hybrid search onwards.
    pub candidates: Vec<RetrievalCandidate>,
    stage_timings: PipelineStageTimings,
}

impl<'a, 'r> PipelineContext<'a, 'r> {
    pub fn new(
        resources: &'a RetrievalResources<'r>,
        query: &'a StructuredQuery,
        reference_time: DateTime<Utc>,
        deadline: &'a Deadline,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            resources,
            query,
            reference_time,
            deadline,
            config,
            candidate_ids: Vec::new(),
            candidates: Vec::new(),
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: Duration) {
        self.stage_timings.record(kind, duration);
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    /// Re-sort candidates by score descending with a stable id tie-break
    /// and refresh the 1-based ranks.
    pub fn resort_candidates(&mut self) {
        self.candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        for (position, candidate) in self.candidates.iter_mut().enumerate() {
            candidate.rank = position.saturating_add(1);
        }
    }
}

fn stages() -> Vec<BoxedStage> {
    vec![
        Box::new(FilterStage),
        Box::new(HybridSearchStage),
        Box::new(ScoreStage),
        Box::new(RerankStage),
        Box::new(DiversifyStage),
        Box::new(TimeDecayStage),
        Box::new(HighlightStage),
    ]
}

pub async fn run_pipeline(
    resources: &RetrievalResources<'_>,
    query: &StructuredQuery,
    reference_time: DateTime<Utc>,
    deadline: &Deadline,
    config: RetrievalConfig,
) -> Result<Vec<RetrievalCandidate>, AppError> {
    info!(
        patient_id = %query.patient_id,
        intent = query.intent.as_str(),
        "starting retrieval pipeline"
    );

    let mut ctx = PipelineContext::new(resources, query, reference_time, deadline, config);

    for stage in stages() {
        ctx.deadline.checkpoint()?;
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        let elapsed = start.elapsed();
        ctx.record_stage_duration(stage.kind(), elapsed);
        debug!(
            stage = stage.kind().as_str(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            candidates = ctx.candidates.len(),
            "retrieval stage complete"
        );

        // Nothing survived the pre-filter or the search: short-circuit so
        // the caller can build the "no matching records" response.
        if ctx.candidate_ids.is_empty() && matches!(stage.kind(), StageKind::Filter) {
            return Ok(Vec::new());
        }
        if ctx.candidates.is_empty() && matches!(stage.kind(), StageKind::HybridSearch) {
            return Ok(Vec::new());
        }
    }

    Ok(ctx.candidates)
}
