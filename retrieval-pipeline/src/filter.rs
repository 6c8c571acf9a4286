//! Metadata pre-filter. The first query for a patient builds in-memory
//! inverted indexes over that patient's chunk listing (type, author, and a
//! date-sorted stripe); follow-up queries reuse them through the
//! patient-index cache. Filtering is pure set intersection plus a
//! binary-searched date slice and never touches chunk bodies.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        metadata_store::MetadataStore,
        types::{artifact::ArtifactType, chunk::ChunkListing},
    },
    utils::{breaker::BreakerRegistry, cache::TtlLruCache},
};
use query_understanding::{EntityType, StructuredQuery};
use tracing::debug;

/// Criteria for the pre-filter; `patient_id` is implicit in the index.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

impl FilterCriteria {
    pub fn from_query(query: &StructuredQuery) -> Self {
        let author = query
            .entities
            .iter()
            .find(|entity| entity.entity_type == EntityType::Person)
            .map(|entity| entity.normalized.clone());

        Self {
            artifact_types: query.filters.artifact_types.clone(),
            date_from: query.filters.date_from,
            date_to: query.filters.date_to,
            author,
        }
    }
}

/// Per-patient inverted indexes, built once per cache lifetime.
pub struct PatientIndex {
    pub patient_id: String,
    /// Chunk ids sorted by `occurred_at` ascending.
    by_date: Vec<(DateTime<Utc>, String)>,
    by_type: HashMap<ArtifactType, HashSet<String>>,
    by_author: HashMap<String, HashSet<String>>,
    pub chunk_count: usize,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub artifact_types: Vec<ArtifactType>,
}

impl PatientIndex {
    pub fn build(patient_id: &str, listing: &[ChunkListing]) -> Self {
        let mut by_date: Vec<(DateTime<Utc>, String)> = listing
            .iter()
            .map(|entry| (entry.occurred_at, entry.id.clone()))
            .collect();
        by_date.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut by_type: HashMap<ArtifactType, HashSet<String>> = HashMap::new();
        let mut by_author: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in listing {
            by_type
                .entry(entry.artifact_type)
                .or_default()
                .insert(entry.id.clone());
            if let Some(author) = &entry.author {
                by_author
                    .entry(author.clone())
                    .or_default()
                    .insert(entry.id.clone());
            }
        }

        let date_range = match (by_date.first(), by_date.last()) {
            (Some(first), Some(last)) => Some((first.0, last.0)),
            _ => None,
        };
        let mut artifact_types: Vec<ArtifactType> = by_type.keys().copied().collect();
        artifact_types.sort_by_key(|t| t.as_str());

        Self {
            patient_id: patient_id.to_string(),
            chunk_count: listing.len(),
            by_date,
            by_type,
            by_author,
            date_range,
            artifact_types,
        }
    }

    /// Apply the criteria, returning matching chunk ids in date order.
    pub fn filter(&self, criteria: &FilterCriteria) -> Vec<String> {
        // Date slice on the sorted stripe, inclusive on both sides.
        let start = criteria.date_from.map_or(0, |from| {
            self.by_date.partition_point(|(date, _)| *date < from)
        });
        let end = criteria.date_to.map_or(self.by_date.len(), |to| {
            self.by_date.partition_point(|(date, _)| *date <= to)
        });
        if start >= end {
            return Vec::new();
        }
        let dated = self.by_date.get(start..end).unwrap_or_default();

        let type_set: Option<HashSet<&String>> = criteria.artifact_types.as_ref().map(|types| {
            types
                .iter()
                .filter_map(|t| self.by_type.get(t))
                .flatten()
                .collect()
        });

        let author_set: Option<HashSet<&String>> = criteria.author.as_ref().map(|person| {
            let person = person.to_lowercase();
            self.by_author
                .iter()
                .filter(|(author, _)| author.to_lowercase().contains(&person))
                .flat_map(|(_, ids)| ids)
                .collect()
        });

        dated
            .iter()
            .filter(|(_, id)| type_set.as_ref().is_none_or(|set| set.contains(id)))
            .filter(|(_, id)| author_set.as_ref().is_none_or(|set| set.contains(id)))
            .map(|(_, id)| id.clone())
            .collect()
    }
}

/// Fetch or build the patient index. Concurrent builders are tolerated: the
/// loser of the race re-reads the published entry instead of clobbering it.
pub async fn load_patient_index(
    store: &MetadataStore,
    cache: &TtlLruCache<Arc<PatientIndex>>,
    breakers: &BreakerRegistry,
    patient_id: &str,
) -> Result<Arc<PatientIndex>, AppError> {
    if let Some(index) = cache.get(patient_id) {
        return Ok(index);
    }

    let listing = breakers
        .get("metadata_store")
        .call(store.patient_chunk_listing(patient_id))
        .await?;

    if let Some(index) = cache.get(patient_id) {
        return Ok(index);
    }

    let index = Arc::new(PatientIndex::build(patient_id, &listing));
    debug!(
        patient_id,
        chunks = index.chunk_count,
        "built patient index"
    );
    cache.insert(patient_id.to_string(), Arc::clone(&index));
    Ok(index)
}
