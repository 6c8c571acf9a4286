//! Offline indexing: fetch a patient's records, normalize them into
//! artifacts, chunk, embed and store. Indexing a patient always starts by
//! clearing the previous generation, so a re-run converges to the same
//! state instead of accumulating stale chunks.

pub mod chunker;
pub mod normalizer;
pub mod record_source;

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        metadata_store::MetadataStore,
        types::chunk::Chunk,
        vector_index::{VectorIndex, VectorMeta},
    },
    utils::{breaker::BreakerRegistry, embedding::EmbeddingProvider},
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{info, instrument};

use record_source::PatientRecordSource;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IndexingReport {
    pub indexed_artifacts: usize,
    pub indexed_chunks: usize,
    pub elapsed_ms: u64,
}

pub struct IndexingPipeline {
    store: MetadataStore,
    vector_index: Arc<VectorIndex>,
    embedder: EmbeddingProvider,
    record_source: Arc<dyn PatientRecordSource>,
    breakers: Arc<BreakerRegistry>,
}

impl IndexingPipeline {
    pub fn new(
        store: MetadataStore,
        vector_index: Arc<VectorIndex>,
        embedder: EmbeddingProvider,
        record_source: Arc<dyn PatientRecordSource>,
        breakers: Arc<BreakerRegistry>,
    ) -> Self {
        Self {
            store,
            vector_index,
            embedder,
            record_source,
            breakers,
        }
    }

    #[instrument(skip_all, fields(patient_id))]
    pub async fn index_patient(&self, patient_id: &str) -> Result<IndexingReport, AppError> {
        let started = Instant::now();

        // Previous generation out first; artifact ids are only unique
        // within one generation.
        self.clear_patient(patient_id).await?;

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        let bundle = self
            .breakers
            .get("record_source")
            .call(RetryIf::spawn(
                retry_strategy,
                || self.record_source.fetch_all(patient_id),
                |err: &AppError| err.is_retryable(),
            ))
            .await?;

        let artifacts = normalizer::normalize_bundle(&bundle, Utc::now());
        let chunks: Vec<Chunk> = artifacts.iter().flat_map(chunker::chunk_artifact).collect();
        info!(
            artifacts = artifacts.len(),
            chunks = chunks.len(),
            "normalized patient bundle"
        );

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
            let embeddings = self
                .breakers
                .get("embedder")
                .call(self.embedder.embed_batch(&texts))
                .await?;

            let entries: Vec<(String, Vec<f32>, VectorMeta)> = chunks
                .iter()
                .zip(embeddings)
                .map(|(chunk, vector)| {
                    (
                        chunk.id.clone(),
                        vector,
                        VectorMeta {
                            patient_id: patient_id.to_string(),
                        },
                    )
                })
                .collect();
            self.breakers
                .get("vector_index")
                .call(self.vector_index.add_vectors(entries))
                .await?;
        }

        let indexed_artifacts = artifacts.len();
        let indexed_chunks = chunks.len();
        let store_breaker = self.breakers.get("metadata_store");
        store_breaker.call(self.store.insert_artifacts(artifacts)).await?;
        store_breaker.call(self.store.insert_chunks(chunks)).await?;

        let report = IndexingReport {
            indexed_artifacts,
            indexed_chunks,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            artifacts = report.indexed_artifacts,
            chunks = report.indexed_chunks,
            elapsed_ms = report.elapsed_ms,
            "patient indexed"
        );
        Ok(report)
    }

    /// Remove every vector, chunk and artifact of one patient. Returns the
    /// number of vectors dropped. Idempotent.
    pub async fn clear_patient(&self, patient_id: &str) -> Result<usize, AppError> {
        let removed = self.vector_index.remove_patient(patient_id).await;
        self.breakers
            .get("metadata_store")
            .call(self.store.delete_patient(patient_id))
            .await?;
        Ok(removed)
    }
}
