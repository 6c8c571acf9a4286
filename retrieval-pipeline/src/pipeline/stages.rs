//! The seven retrieval stages. Only `Filter` and `HybridSearch` touch
//! external dependencies; everything downstream is pure and checks the
//! deadline at its loop head through the pipeline runner.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use common::{error::AppError, utils::text::tokenize};

use crate::{
    decay, diversify,
    filter::{load_patient_index, FilterCriteria},
    highlight, lexical, rerank,
    scoring::{self, clamp_unit},
    RetrievalCandidate,
};

use super::{PipelineContext, PipelineStage, StageKind};

#[derive(Debug, Clone, Copy)]
pub struct FilterStage;

#[async_trait]
impl PipelineStage for FilterStage {
    fn kind(&self) -> StageKind {
        StageKind::Filter
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let index = ctx
            .deadline
            .race(load_patient_index(
                ctx.resources.store,
                ctx.resources.patient_index_cache,
                ctx.resources.breakers,
                &ctx.query.patient_id,
            ))
            .await?;

        let criteria = FilterCriteria::from_query(ctx.query);
        ctx.candidate_ids = index.filter(&criteria);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridSearchStage;

#[async_trait]
impl PipelineStage for HybridSearchStage {
    fn kind(&self) -> StageKind {
        StageKind::HybridSearch
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        if ctx.candidate_ids.is_empty() {
            return Ok(());
        }

        let embedder_breaker = ctx.resources.breakers.get("embedder");
        let query_vector = ctx
            .deadline
            .race(embedder_breaker.call(ctx.resources.embedder.embed(&ctx.query.original_query)))
            .await?;

        let candidate_set: HashSet<String> = ctx.candidate_ids.iter().cloned().collect();
        let vector_breaker = ctx.resources.breakers.get("vector_index");
        let semantic = ctx
            .deadline
            .race(vector_breaker.call(ctx.resources.vector_index.search(
                &query_vector,
                Some(&candidate_set),
                ctx.candidate_ids.len(),
            )))
            .await?;
        let semantic_by_id: HashMap<String, f32> = semantic.into_iter().collect();

        let store_breaker = ctx.resources.breakers.get("metadata_store");
        let chunks = ctx
            .deadline
            .race(store_breaker.call(ctx.resources.store.get_chunks_by_ids(&ctx.candidate_ids)))
            .await?;

        let terms = lexical::collect_terms(ctx.query);
        let documents: Vec<Vec<String>> =
            chunks.iter().map(|chunk| tokenize(&chunk.content)).collect();
        let lexical_scores = lexical::bm25_scores(&terms, &documents);

        let alpha = ctx.config.hybrid_alpha;
        ctx.candidates = chunks
            .into_iter()
            .zip(lexical_scores)
            .map(|(chunk, lexical_score)| {
                let semantic_score =
                    clamp_unit(semantic_by_id.get(&chunk.id).copied().unwrap_or(0.0));
                let combined = alpha * semantic_score + (1.0 - alpha) * lexical_score;
                RetrievalCandidate::new(chunk, semantic_score, lexical_score, combined)
            })
            .collect();

        ctx.resort_candidates();
        ctx.candidates.truncate(ctx.config.hybrid_top_n);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreStage;

#[async_trait]
impl PipelineStage for ScoreStage {
    fn kind(&self) -> StageKind {
        StageKind::Score
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let query = ctx.query;
        let reference_time = ctx.reference_time;
        scoring::score_candidates(query, &mut ctx.candidates, reference_time);
        ctx.resort_candidates();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankStage;

#[async_trait]
impl PipelineStage for RerankStage {
    fn kind(&self) -> StageKind {
        StageKind::Rerank
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let query = ctx.query;
        rerank::rerank_candidates(query, &mut ctx.candidates);
        ctx.resort_candidates();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiversifyStage;

#[async_trait]
impl PipelineStage for DiversifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Diversify
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let top_k = ctx.config.top_k;
        let base = ctx.config.diversity_penalty_base;
        diversify::diversify(&mut ctx.candidates, top_k, base);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeDecayStage;

#[async_trait]
impl PipelineStage for TimeDecayStage {
    fn kind(&self) -> StageKind {
        StageKind::TimeDecay
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let reference_time = ctx.reference_time;
        let rate = ctx.config.time_decay_rate;
        decay::apply_time_decay(&mut ctx.candidates, reference_time, rate);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HighlightStage;

#[async_trait]
impl PipelineStage for HighlightStage {
    fn kind(&self) -> StageKind {
        StageKind::Highlight
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_, '_>) -> Result<(), AppError> {
        let query = ctx.query;
        let config = ctx.config;
        highlight::highlight_candidates(query, &mut ctx.candidates, &config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{Duration as ChronoDuration, Utc};
    use common::{
        storage::{
            db::SurrealDbClient,
            metadata_store::MetadataStore,
            types::{
                artifact::{Artifact, ArtifactType},
                chunk::Chunk,
            },
            vector_index::{VectorIndex, VectorMeta},
        },
        utils::{
            breaker::BreakerRegistry,
            cache::{TtlLruCache, PATIENT_INDEX_CACHE_CAPACITY, PATIENT_INDEX_CACHE_TTL},
            deadline::Deadline,
            embedding::EmbeddingProvider,
        },
    };
    use query_understanding::analyze;
    use uuid::Uuid;

    use crate::{pipeline::RetrievalConfig, retrieve, PatientIndex, RetrievalResources};

    struct TestStack {
        store: MetadataStore,
        vector_index: VectorIndex,
        embedder: EmbeddingProvider,
        patient_index_cache: TtlLruCache<Arc<PatientIndex>>,
        breakers: BreakerRegistry,
    }

    impl TestStack {
        async fn new() -> Self {
            let db = SurrealDbClient::memory("retrieval_test", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb");
            db.ensure_initialized().await.expect("initialize");
            Self {
                store: MetadataStore::new(Arc::new(db)),
                vector_index: VectorIndex::new(64),
                embedder: EmbeddingProvider::hashed(64),
                patient_index_cache: TtlLruCache::new(
                    "patient_index",
                    PATIENT_INDEX_CACHE_CAPACITY,
                    PATIENT_INDEX_CACHE_TTL,
                ),
                breakers: BreakerRegistry::default(),
            }
        }

        fn resources(&self) -> RetrievalResources<'_> {
            RetrievalResources {
                store: &self.store,
                vector_index: &self.vector_index,
                embedder: &self.embedder,
                patient_index_cache: &self.patient_index_cache,
                breakers: &self.breakers,
            }
        }

        async fn index_artifact(&self, artifact: &Artifact) {
            let chunk = Chunk::from_artifact(artifact, 0, artifact.content.len());
            let embedding = self.embedder.embed(&chunk.content).await.expect("embed");
            self.vector_index
                .add_vectors(vec![(
                    chunk.id.clone(),
                    embedding,
                    VectorMeta {
                        patient_id: chunk.patient_id.clone(),
                    },
                )])
                .await
                .expect("add vector");
            self.store
                .insert_chunks(vec![chunk])
                .await
                .expect("insert chunk");
        }
    }

    fn artifact(id: &str, artifact_type: ArtifactType, content: &str, days_ago: i64) -> Artifact {
        Artifact::new(
            id,
            "p1",
            artifact_type,
            Utc::now() - ChronoDuration::days(days_ago),
            Some("Dr. Chen".into()),
            content.to_string(),
            None,
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn pipeline_retrieves_and_ranks_relevant_chunks() {
        let stack = TestStack::new().await;
        stack
            .index_artifact(&artifact(
                "note_123",
                ArtifactType::Note,
                "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management.",
                2,
            ))
            .await;
        stack
            .index_artifact(&artifact(
                "note_200",
                ArtifactType::Note,
                "Discussed sleep hygiene and exercise routine during the visit.",
                5,
            ))
            .await;

        let query = analyze("What medications is the patient taking?", "p1", Utc::now());
        let deadline = Deadline::new(Duration::from_secs(6));
        let candidates = retrieve(
            &stack.resources(),
            &query,
            Utc::now(),
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval");

        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].chunk.artifact_id, "note_123");
        assert_eq!(candidates[0].rank, 1);
        assert!(!candidates[0].snippet.is_empty());
        assert!(candidates[0].score > 0.0);
        assert!(candidates[0].time_decay_factor <= 1.0);
    }

    #[tokio::test]
    async fn empty_filter_short_circuits_to_no_results() {
        let stack = TestStack::new().await;
        // Nothing indexed for this patient at all.
        let query = analyze("What medications?", "p1", Utc::now());
        let deadline = Deadline::new(Duration::from_secs(6));
        let candidates = retrieve(
            &stack.resources(),
            &query,
            Utc::now(),
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval");
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn pipeline_is_deterministic_for_identical_inputs() {
        let stack = TestStack::new().await;
        for i in 0..4 {
            stack
                .index_artifact(&artifact(
                    &format!("note_{i}"),
                    ArtifactType::Note,
                    &format!("Visit {i}: blood pressure stable, continued lisinopril."),
                    i64::from(i) * 3,
                ))
                .await;
        }

        let reference = Utc::now();
        let query = analyze("blood pressure medication", "p1", reference);
        let deadline = Deadline::new(Duration::from_secs(6));

        let first = retrieve(
            &stack.resources(),
            &query,
            reference,
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .expect("first run");
        let second = retrieve(
            &stack.resources(),
            &query,
            reference,
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .expect("second run");

        let first_order: Vec<(&str, u32)> = first
            .iter()
            .map(|c| (c.chunk.id.as_str(), c.score.to_bits()))
            .collect();
        let second_order: Vec<(&str, u32)> = second
            .iter()
            .map(|c| (c.chunk.id.as_str(), c.score.to_bits()))
            .collect();
        assert_eq!(first_order, second_order);
    }

    #[tokio::test]
    async fn expired_deadline_aborts_the_pipeline() {
        let stack = TestStack::new().await;
        let query = analyze("What medications?", "p1", Utc::now());
        let deadline = Deadline::new(Duration::ZERO);
        let err = retrieve(
            &stack.resources(),
            &query,
            Utc::now(),
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "deadline_exceeded");
    }

    #[tokio::test]
    async fn date_filtered_query_only_sees_the_window() {
        let stack = TestStack::new().await;
        stack
            .index_artifact(&artifact(
                "recent_note",
                ArtifactType::Note,
                "Metformin dose increased at this visit.",
                10,
            ))
            .await;
        stack
            .index_artifact(&artifact(
                "ancient_note",
                ArtifactType::Note,
                "Metformin started years ago at low dose.",
                400,
            ))
            .await;

        let query = analyze(
            "metformin changes in the last 3 months",
            "p1",
            Utc::now(),
        );
        let deadline = Deadline::new(Duration::from_secs(6));
        let candidates = retrieve(
            &stack.resources(),
            &query,
            Utc::now(),
            &deadline,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval");

        assert!(!candidates.is_empty());
        assert!(
            candidates
                .iter()
                .all(|c| c.chunk.artifact_id == "recent_note"),
            "chunks outside the window must be filtered out"
        );
    }
}
