//! Embedding provider with two backends: an OpenAI-compatible HTTP endpoint
//! (the locally hosted model) and a deterministic hashed backend used by
//! tests and offline tooling. Vectors are unit-normalized on the way out so
//! cosine similarity downstream reduces to a dot product.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use futures::{stream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::{
    error::AppError,
    utils::cache::{
        embedding_cache_key, TtlLruCache, EMBEDDING_CACHE_CAPACITY, EMBEDDING_CACHE_TTL,
    },
};

/// Upper bound on concurrently in-flight embedding requests per batch.
const MAX_BATCH_IN_FLIGHT: usize = 10;

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
    cache: Arc<TtlLruCache<Vec<f32>>>,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAiCompatible {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn new_openai(
        client: Arc<Client<OpenAIConfig>>,
        model: impl Into<String>,
        dimensions: u32,
    ) -> Self {
        Self {
            inner: EmbeddingInner::OpenAiCompatible {
                client,
                model: model.into(),
                dimensions,
            },
            cache: default_cache(),
        }
    }

    /// Deterministic token-bucket vectors; no external dependency.
    pub fn hashed(dimension: usize) -> Self {
        Self {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
            cache: default_cache(),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAiCompatible { .. } => "openai-compatible",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub fn model_version(&self) -> String {
        match &self.inner {
            EmbeddingInner::OpenAiCompatible { model, .. } => model.clone(),
            EmbeddingInner::Hashed { dimension } => format!("hashed-{dimension}"),
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAiCompatible { dimensions, .. } => *dimensions as usize,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    /// Cache handle for the background sweeper.
    pub fn cache(&self) -> Arc<TtlLruCache<Vec<f32>>> {
        Arc::clone(&self.cache)
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let key = embedding_cache_key(text);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let mut vector = match &self.inner {
            EmbeddingInner::Hashed { dimension } => hashed_embedding(text, *dimension),
            EmbeddingInner::OpenAiCompatible {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(*dimensions)
                    .input([text])
                    .build()
                    .map_err(|e| AppError::Embedder(e.to_string()))?;

                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|e| AppError::Embedder(e.to_string()))?;

                response
                    .data
                    .into_iter()
                    .next()
                    .map(|data| data.embedding)
                    .ok_or_else(|| {
                        AppError::Embedder("no embedding data received".to_string())
                    })?
            }
        };

        if vector.len() != self.dimension() {
            return Err(AppError::Embedder(format!(
                "embedding has dimension {} but {} was configured",
                vector.len(),
                self.dimension()
            )));
        }

        l2_normalize(&mut vector);
        self.cache.insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed a batch with bounded fan-out. The output order matches the
    /// input order regardless of completion order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let in_flight = MAX_BATCH_IN_FLIGHT.min(texts.len());
        debug!(
            backend = self.backend_label(),
            batch = texts.len(),
            in_flight,
            "embedding batch"
        );

        let futures: Vec<_> = texts.iter().map(|text| self.embed(text)).collect();
        stream::iter(futures).buffered(in_flight).try_collect().await
    }
}

fn default_cache() -> Arc<TtlLruCache<Vec<f32>>> {
    Arc::new(TtlLruCache::new(
        "embedding",
        EMBEDDING_CACHE_CAPACITY,
        EMBEDDING_CACHE_TTL,
    ))
}

/// Scale `vector` to unit length; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    for token in crate::utils::text::tokenize(text) {
        let idx = bucket(&token, dimension);
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }
    l2_normalize(&mut vector);
    vector
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension.max(1)
}
