//! The service core: one struct owning every collaborator (stores, models,
//! caches, breakers, audit log) and the orchestrated query pipeline that
//! runs the stages in strict order under a single deadline. `process`
//! never fails; every error is converted into a partial or fallback
//! response and every query is audited.

pub mod audit;
pub mod context;
pub mod partial;
pub mod response;
pub mod retry;


use std::{path::Path, sync::Arc, time::Duration, time::Instant};

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        metadata_store::{MetadataStore, Page},
        types::artifact::{Artifact, ArtifactType},
        vector_index::VectorIndex,
    },
    utils::{
        breaker::BreakerRegistry,
        cache::{
            query_result_cache_key, Sweep, TtlLruCache, PATIENT_INDEX_CACHE_CAPACITY,
            PATIENT_INDEX_CACHE_TTL, QUERY_RESULT_CACHE_CAPACITY, QUERY_RESULT_CACHE_TTL,
            SWEEP_INTERVAL,
        },
        config::AppConfig,
        deadline::Deadline,
        embedding::EmbeddingProvider,
        generation::{Generate, GenerationRequest},
    },
};
use generation_pipeline::{
    build_prompt, parse_extractions, provenance_from_candidates, score_confidence,
    validate_extractions, ConfidenceLabel, ConfidenceReport, PromptMode, SortOrder,
};
use ingestion_pipeline::{record_source::PatientRecordSource, IndexingPipeline, IndexingReport};
use query_understanding::QueryIntent;
use retrieval_pipeline::{PatientIndex, RetrievalConfig, RetrievalResources};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use audit::{LlmAudit, RetrievalAudit, PIPELINE_VERSION};
use context::QueryContext;

pub use audit::{AuditEntry, AuditFilter, AuditLogger};
pub use context::{QueryOptions, Stage};
pub use response::{ResponseMetadata, UiResponse};

/// Progress notification emitted after each completed stage, consumed by
/// the SSE surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StageEvent {
    pub stage: &'static str,
    pub elapsed_ms: u64,
}

pub struct Core {
    config: AppConfig,
    store: MetadataStore,
    vector_index: Arc<VectorIndex>,
    embedder: EmbeddingProvider,
    generator: Arc<dyn Generate>,
    indexing: IndexingPipeline,
    breakers: Arc<BreakerRegistry>,
    patient_index_cache: Arc<TtlLruCache<Arc<PatientIndex>>>,
    query_cache: Arc<TtlLruCache<UiResponse>>,
    audit: Arc<AuditLogger>,
}

impl Core {
    pub fn new(
        config: AppConfig,
        db: Arc<SurrealDbClient>,
        vector_index: Arc<VectorIndex>,
        embedder: EmbeddingProvider,
        generator: Arc<dyn Generate>,
        record_source: Arc<dyn PatientRecordSource>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let store = MetadataStore::new(db);
        let breakers = Arc::new(BreakerRegistry::default());
        let indexing = IndexingPipeline::new(
            store.clone(),
            Arc::clone(&vector_index),
            embedder.clone(),
            record_source,
            Arc::clone(&breakers),
        );

        Self {
            config,
            store,
            vector_index,
            embedder,
            generator,
            indexing,
            breakers,
            patient_index_cache: Arc::new(TtlLruCache::new(
                "patient_index",
                PATIENT_INDEX_CACHE_CAPACITY,
                PATIENT_INDEX_CACHE_TTL,
            )),
            query_cache: Arc::new(TtlLruCache::new(
                "query_result",
                QUERY_RESULT_CACHE_CAPACITY,
                QUERY_RESULT_CACHE_TTL,
            )),
            audit,
        }
    }

    pub fn audit_log(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Answer one clinician query. Fatal-free: every failure mode comes
    /// back as a (possibly partial) `UiResponse`.
    pub async fn process(
        &self,
        patient_id: &str,
        query_text: &str,
        options: QueryOptions,
    ) -> UiResponse {
        self.process_with_events(patient_id, query_text, options, None)
            .await
    }

    /// Like [`Core::process`], emitting a [`StageEvent`] after each
    /// completed stage.
    #[instrument(skip_all, fields(patient_id, query_chars = query_text.len()))]
    pub async fn process_with_events(
        &self,
        patient_id: &str,
        query_text: &str,
        options: QueryOptions,
        events: Option<UnboundedSender<StageEvent>>,
    ) -> UiResponse {
        let mut ctx = QueryContext::new(
            Uuid::new_v4().to_string(),
            patient_id,
            query_text,
            options,
            Utc::now(),
        );

        if patient_id.trim().is_empty() || query_text.trim().is_empty() {
            let error = AppError::Validation(
                "patient_id and query_text must both be non-empty".to_string(),
            );
            let response = partial::fallback_response(&ctx, Stage::QueryUnderstanding, &error);
            self.write_audit(&mut ctx, &response).await;
            return response;
        }

        let cache_key =
            query_result_cache_key(query_text, patient_id, &serde_json::json!({}));
        if let Some(cached) = self.query_cache.get(&cache_key) {
            debug!(patient_id, "serving query from result cache");
            self.write_audit(&mut ctx, &cached).await;
            return cached;
        }

        let timeout = ctx
            .options
            .timeout_ms
            .unwrap_or(self.config.query_timeout_ms);
        let deadline = Deadline::new(Duration::from_millis(timeout));

        let response = match self.run_stages(&mut ctx, &deadline, events.as_ref()).await {
            Ok(response) => response,
            Err((stage, error)) => {
                warn!(
                    stage = stage.as_str(),
                    kind = error.kind(),
                    error = %error,
                    "pipeline stage failed, building fallback response"
                );
                partial::fallback_response(&ctx, stage, &error)
            }
        };

        if !response.metadata.partial && response.metadata.error.is_none() {
            self.query_cache.insert(cache_key, response.clone());
        }

        self.write_audit(&mut ctx, &response).await;
        response
    }

    async fn run_stages(
        &self,
        ctx: &mut QueryContext,
        deadline: &Deadline,
        events: Option<&UnboundedSender<StageEvent>>,
    ) -> Result<UiResponse, (Stage, AppError)> {
        // Stage 1: query understanding (pure).
        let stage_start = Instant::now();
        let structured =
            query_understanding::analyze(&ctx.query_text, &ctx.patient_id, ctx.reference_time);
        ctx.structured_query = Some(structured);
        finish_stage(ctx, Stage::QueryUnderstanding, stage_start, events);

        // Stage 2: retrieval.
        deadline
            .checkpoint()
            .map_err(|e| (Stage::Retrieval, e))?;
        let stage_start = Instant::now();
        let resources = RetrievalResources {
            store: &self.store,
            vector_index: &self.vector_index,
            embedder: &self.embedder,
            patient_index_cache: &self.patient_index_cache,
            breakers: &self.breakers,
        };
        let structured = ctx
            .structured_query
            .clone()
            .ok_or_else(|| (Stage::Retrieval, AppError::Internal("missing structured query".into())))?;
        ctx.candidates = retrieval_pipeline::retrieve(
            &resources,
            &structured,
            ctx.reference_time,
            deadline,
            RetrievalConfig::default(),
        )
        .await
        .map_err(|e| (Stage::Retrieval, e))?;
        finish_stage(ctx, Stage::Retrieval, stage_start, events);

        if ctx.candidates.is_empty() {
            info!(patient_id = %ctx.patient_id, "no candidates survived retrieval");
            return Ok(partial::no_results_response(ctx));
        }

        // Stage 3: generation plus citation validation (the gate on its
        // output).
        deadline
            .checkpoint()
            .map_err(|e| (Stage::Generation, e))?;
        let stage_start = Instant::now();
        let mode = if structured.intent == QueryIntent::Summary {
            PromptMode::Summarization
        } else {
            PromptMode::Extraction
        };
        let plan = build_prompt(&ctx.candidates, &ctx.query_text, mode);
        ctx.prompt_system = Some(plan.system_prompt.clone());
        ctx.prompt_user = Some(plan.user_prompt.clone());
        ctx.prompt_temperature = mode.temperature();
        ctx.prompt_max_tokens = mode.max_tokens();

        let request = GenerationRequest {
            system_prompt: plan.system_prompt,
            user_prompt: plan.user_prompt,
            temperature: mode.temperature(),
            max_tokens: mode.max_tokens(),
        };
        let generator = Arc::clone(&self.generator);
        let generator_breaker = self.breakers.get("generator");
        let output = deadline
            .race(generator_breaker.call(retry::with_retry("generator", || {
                generator.generate(&request)
            })))
            .await
            .map_err(|e| (Stage::Generation, e))?;

        let extractions =
            parse_extractions(&output.text).map_err(|e| (Stage::Generation, e))?;
        ctx.generation = Some(output);
        ctx.validated = validate_extractions(extractions, &ctx.candidates);
        finish_stage(ctx, Stage::Generation, stage_start, events);

        if !ctx.validated.is_empty() && ctx.valid_extractions().is_empty() {
            return Err((
                Stage::Generation,
                AppError::InvalidCitation(
                    "every extraction failed citation validation".to_string(),
                ),
            ));
        }

        // Stage 4: confidence scoring (pure).
        deadline
            .checkpoint()
            .map_err(|e| (Stage::ConfidenceScoring, e))?;
        let stage_start = Instant::now();
        ctx.confidence = Some(score_confidence(&ctx.validated, &ctx.candidates));
        finish_stage(ctx, Stage::ConfidenceScoring, stage_start, events);

        // Stage 5: provenance formatting (pure).
        deadline
            .checkpoint()
            .map_err(|e| (Stage::ProvenanceFormatting, e))?;
        let stage_start = Instant::now();
        ctx.provenance = generation_pipeline::format_provenance(
            &ctx.validated,
            &ctx.candidates,
            ctx.reference_time,
            SortOrder::Relevance,
        );
        if ctx.provenance.is_empty() {
            // Nothing cited (e.g. the model produced no extractions);
            // point at the retrieved evidence instead.
            ctx.provenance =
                provenance_from_candidates(&ctx.candidates, ctx.reference_time, 3);
        }
        finish_stage(ctx, Stage::ProvenanceFormatting, stage_start, events);

        // Stage 6: response building.
        let stage_start = Instant::now();
        let response = self.build_response(ctx);
        finish_stage(ctx, Stage::ResponseBuilding, stage_start, events);

        Ok(response)
    }

    fn build_response(&self, ctx: &QueryContext) -> UiResponse {
        let valid = ctx.valid_extractions();
        let lines: Vec<String> = valid
            .iter()
            .map(|v| v.extraction.content.display_line())
            .collect();

        let short_answer = lines.first().cloned().unwrap_or_else(|| {
            "No directly supported answer was found in the patient record.".to_string()
        });
        let detailed_summary = if lines.is_empty() {
            "The retrieved record excerpts are listed under provenance.".to_string()
        } else {
            lines
                .iter()
                .map(|line| format!("• {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let confidence = ctx.confidence.clone().unwrap_or_else(|| ConfidenceReport {
            score: 0.0,
            label: ConfidenceLabel::Low,
            reason: "confidence was not computed".to_string(),
        });

        UiResponse {
            query_id: ctx.query_id.clone(),
            short_answer,
            detailed_summary,
            structured_extractions: valid.iter().map(|v| v.extraction.clone()).collect(),
            provenance: ctx.provenance.clone(),
            confidence,
            metadata: ResponseMetadata {
                total_time_ms: ctx.total_time_ms(),
                per_stage_ms: ctx.per_stage_ms(),
                partial: false,
                error: None,
                retry_after_secs: None,
            },
        }
    }

    /// Stage 7: one audit entry per query, success or not.
    async fn write_audit(&self, ctx: &mut QueryContext, response: &UiResponse) {
        if ctx.options.audit_disabled {
            return;
        }
        let stage_start = Instant::now();

        let retrieval_time_ms = ctx
            .stage_timings
            .iter()
            .find(|(stage, _)| *stage == Stage::Retrieval)
            .map_or(0, |&(_, ms)| ms);
        let mut artifact_ids: Vec<String> = ctx
            .candidates
            .iter()
            .map(|c| c.chunk.artifact_id.clone())
            .collect();
        artifact_ids.dedup();

        let entry = AuditEntry {
            query_id: ctx.query_id.clone(),
            timestamp: Utc::now(),
            user_id: ctx.options.user_id.clone(),
            patient_id: ctx.patient_id.clone(),
            query_text: ctx.query_text.clone(),
            retrieval: RetrievalAudit {
                artifact_ids,
                chunk_ids: ctx.candidates.iter().map(|c| c.chunk.id.clone()).collect(),
                scores: ctx.candidates.iter().map(|c| c.score).collect(),
                method: "hybrid".to_string(),
                time_ms: retrieval_time_ms,
            },
            llm: ctx.generation.as_ref().map(|generation| LlmAudit {
                prompt: ctx.prompt_user.clone().unwrap_or_default(),
                response: generation.text.clone(),
                model: self.config.generator_model.clone(),
                model_version: generation.model_version.clone(),
                temperature: ctx.prompt_temperature,
                max_tokens: ctx.prompt_max_tokens,
                total_tokens: generation.total_tokens,
                latency_ms: generation.latency_ms,
            }),
            response_summary: response.short_answer.clone(),
            confidence: response.confidence.score,
            success: response.metadata.error.is_none(),
            error: response.metadata.error.clone(),
            total_time_ms: response.metadata.total_time_ms,
            session_id: ctx.options.session_id.clone(),
            ip: ctx.options.ip.clone(),
            user_agent: ctx.options.user_agent.clone(),
            pipeline_version: PIPELINE_VERSION.to_string(),
        };

        self.audit.log(entry).await;
        finish_stage(ctx, Stage::AuditLogging, stage_start, None);
    }

    /// Offline indexing entry point; drops the patient's caches and saves
    /// a fresh vector snapshot afterwards.
    pub async fn index_patient(&self, patient_id: &str) -> Result<IndexingReport, AppError> {
        let report = self.indexing.index_patient(patient_id).await?;
        self.patient_index_cache.remove(patient_id);
        self.query_cache.clear();
        if let Err(err) = self
            .vector_index
            .save(Path::new(&self.config.vector_index_path))
            .await
        {
            warn!(error = %err, "failed to persist vector index snapshot");
        }
        Ok(report)
    }

    /// Remove every trace of one patient from the index and caches.
    pub async fn clear_patient(&self, patient_id: &str) -> Result<usize, AppError> {
        let removed = self.indexing.clear_patient(patient_id).await?;
        self.patient_index_cache.remove(patient_id);
        self.query_cache.clear();
        if let Err(err) = self
            .vector_index
            .save(Path::new(&self.config.vector_index_path))
            .await
        {
            warn!(error = %err, "failed to persist vector index snapshot");
        }
        Ok(removed)
    }

    /// Normalized artifacts for the EMR passthrough endpoints.
    pub async fn patient_artifacts(
        &self,
        patient_id: &str,
        artifact_types: Option<Vec<ArtifactType>>,
        date_from: Option<chrono::DateTime<Utc>>,
        date_to: Option<chrono::DateTime<Utc>>,
        page: Page,
    ) -> Result<Vec<Artifact>, AppError> {
        self.breakers
            .get("metadata_store")
            .call(self.store.get_patient_artifacts(
                patient_id,
                artifact_types,
                date_from,
                date_to,
                page,
            ))
            .await
    }

    /// Readiness probe: a trivial round trip through the metadata store.
    pub async fn health_check(&self) -> Result<(), AppError> {
        self.store.count_patient_chunks("__readiness__").await.map(|_| ())
    }

    /// Background task sweeping expired entries out of all three caches.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let caches: Vec<Arc<dyn Sweep>> = vec![
            self.embedder.cache(),
            Arc::clone(&self.query_cache) as Arc<dyn Sweep>,
            Arc::clone(&self.patient_index_cache) as Arc<dyn Sweep>,
        ];
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                for cache in &caches {
                    cache.sweep();
                }
            }
        })
    }
}

fn finish_stage(
    ctx: &mut QueryContext,
    stage: Stage,
    started: Instant,
    events: Option<&UnboundedSender<StageEvent>>,
) {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    ctx.record_stage(stage, elapsed_ms);
    debug!(stage = stage.as_str(), elapsed_ms, "stage complete");
    if let Some(sender) = events {
        let _ = sender.send(StageEvent {
            stage: stage.as_str(),
            elapsed_ms,
        });
    }
}
