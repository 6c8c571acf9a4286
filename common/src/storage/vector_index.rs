//! Flat in-process vector index. Vectors are stored unit-normalized, so
//! cosine similarity is the plain dot product. The index is shared-read,
//! single-writer: writes happen only during indexing, searches take the
//! read lock.
//!
//! Persistence is a snapshot pair: `<path>.vectors.json` holds the raw
//! vectors, the sidecar `<path>.meta.json` holds
//! `{dimension, next_index, id_map, metadata_map}` and is restored at
//! startup.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{error::AppError, utils::embedding::l2_normalize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorMeta {
    pub patient_id: String,
}

#[derive(Debug, Default)]
struct IndexInner {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
    slot_by_id: HashMap<String, usize>,
    meta: Vec<VectorMeta>,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    dimension: usize,
    next_index: usize,
    id_map: Vec<String>,
    metadata_map: Vec<VectorMeta>,
}

pub struct VectorIndex {
    inner: RwLock<IndexInner>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                dimension: dimension.max(1),
                ..IndexInner::default()
            }),
        }
    }

    pub async fn dimension(&self) -> usize {
        self.inner.read().await.dimension
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Add or replace vectors. Every vector is dimension-checked before any
    /// write happens; a single mismatch rejects the whole batch.
    pub async fn add_vectors(
        &self,
        entries: Vec<(String, Vec<f32>, VectorMeta)>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        for (id, vector, _) in &entries {
            if vector.len() != inner.dimension {
                return Err(AppError::Internal(format!(
                    "vector for chunk '{id}' has dimension {} but the index expects {}",
                    vector.len(),
                    inner.dimension
                )));
            }
        }

        for (id, mut vector, meta) in entries {
            l2_normalize(&mut vector);
            if let Some(&slot) = inner.slot_by_id.get(&id) {
                inner.vectors[slot] = vector;
                inner.meta[slot] = meta;
            } else {
                let slot = inner.ids.len();
                inner.ids.push(id.clone());
                inner.vectors.push(vector);
                inner.meta.push(meta);
                inner.slot_by_id.insert(id, slot);
            }
        }
        Ok(())
    }

    /// Top-`k` most similar stored vectors, optionally restricted to
    /// `candidate_ids`. Ties break on ascending id so results are
    /// deterministic.
    pub async fn search(
        &self,
        query: &[f32],
        candidate_ids: Option<&HashSet<String>>,
        k: usize,
    ) -> Result<Vec<(String, f32)>, AppError> {
        let inner = self.inner.read().await;
        if query.len() != inner.dimension {
            return Err(AppError::Internal(format!(
                "query vector has dimension {} but the index expects {}",
                query.len(),
                inner.dimension
            )));
        }

        let mut scored: Vec<(String, f32)> = inner
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| candidate_ids.is_none_or(|set| set.contains(*id)))
            .map(|(slot, id)| {
                let score: f32 = inner.vectors[slot]
                    .iter()
                    .zip(query)
                    .map(|(a, b)| a * b)
                    .sum();
                (id.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Drop every vector belonging to `patient_id`; returns how many were
    /// removed.
    pub async fn remove_patient(&self, patient_id: &str) -> usize {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        let keep: Vec<usize> = (0..inner.ids.len())
            .filter(|&slot| inner.meta[slot].patient_id != patient_id)
            .collect();
        let removed = inner.ids.len().saturating_sub(keep.len());
        if removed == 0 {
            return 0;
        }

        let mut compacted = IndexInner {
            dimension: inner.dimension,
            ..IndexInner::default()
        };
        for slot in keep {
            let new_slot = compacted.ids.len();
            compacted.ids.push(inner.ids[slot].clone());
            compacted.vectors.push(std::mem::take(&mut inner.vectors[slot]));
            compacted.meta.push(inner.meta[slot].clone());
            compacted
                .slot_by_id
                .insert(compacted.ids[new_slot].clone(), new_slot);
        }
        *inner = compacted;
        removed
    }

    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        let inner = self.inner.read().await;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let sidecar = Sidecar {
            dimension: inner.dimension,
            next_index: inner.ids.len(),
            id_map: inner.ids.clone(),
            metadata_map: inner.meta.clone(),
        };
        std::fs::write(
            sidecar_path(path),
            serde_json::to_vec(&sidecar)?,
        )?;
        std::fs::write(
            vectors_path(path),
            serde_json::to_vec(&inner.vectors)?,
        )?;
        info!(vectors = inner.ids.len(), path = %path.display(), "saved vector index snapshot");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let sidecar: Sidecar = serde_json::from_slice(&std::fs::read(sidecar_path(path))?)?;
        let vectors: Vec<Vec<f32>> = serde_json::from_slice(&std::fs::read(vectors_path(path))?)?;

        if sidecar.id_map.len() != vectors.len()
            || sidecar.metadata_map.len() != vectors.len()
            || sidecar.next_index != vectors.len()
        {
            return Err(AppError::Internal(
                "vector index snapshot and sidecar metadata disagree".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != sidecar.dimension) {
            return Err(AppError::Internal(format!(
                "snapshot vector has dimension {} but sidecar declares {}",
                bad.len(),
                sidecar.dimension
            )));
        }

        let slot_by_id = sidecar
            .id_map
            .iter()
            .enumerate()
            .map(|(slot, id)| (id.clone(), slot))
            .collect();

        info!(vectors = vectors.len(), path = %path.display(), "restored vector index snapshot");
        Ok(Self {
            inner: RwLock::new(IndexInner {
                dimension: sidecar.dimension,
                vectors,
                ids: sidecar.id_map,
                slot_by_id,
                meta: sidecar.metadata_map,
            }),
        })
    }

    /// Restore from a snapshot when one exists at `path`, otherwise start
    /// an empty index of `dimension`.
    pub fn load_or_new(path: &Path, dimension: usize) -> Result<Self, AppError> {
        if sidecar_path(path).exists() && vectors_path(path).exists() {
            let index = Self::load(path)?;
            Ok(index)
        } else {
            Ok(Self::new(dimension))
        }
    }
}

fn sidecar_path(path: &Path) -> std::path::PathBuf {
    with_suffix(path, ".meta.json")
}

fn vectors_path(path: &Path) -> std::path::PathBuf {
    with_suffix(path, ".vectors.json")
}

fn with_suffix(path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    std::path::PathBuf::from(name)
}
