//! Query understanding: turns a clinician's free-text question into a
//! structured query. Everything in this crate is pure; the only inputs are
//! the query text, the patient id and a reference time, so identical inputs
//! always produce identical output.

pub mod entities;
pub mod expansion;
pub mod intent;
pub mod temporal;

use chrono::{DateTime, Utc};
use common::storage::types::artifact::ArtifactType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use entities::{Entity, EntityType};
pub use expansion::ExpansionTerm;
pub use intent::QueryIntent;
pub use temporal::TemporalFilter;

/// Hard filters applied before retrieval. Artifact types are only set when
/// the clinician scopes the question explicitly; intent preference is a
/// soft scoring signal so that, e.g., a medication mentioned inside a visit
/// note still surfaces for a medication question.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilters {
    pub artifact_types: Option<Vec<ArtifactType>>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub query_id: String,
    pub original_query: String,
    pub patient_id: String,
    pub intent: QueryIntent,
    pub entities: Vec<Entity>,
    pub temporal_filter: Option<TemporalFilter>,
    pub filters: QueryFilters,
    pub expansion_terms: Vec<ExpansionTerm>,
    pub detail_level: u8,
}

/// Analyze one query. `reference_time` anchors every relative date phrase.
pub fn analyze(
    original_query: &str,
    patient_id: &str,
    reference_time: DateTime<Utc>,
) -> StructuredQuery {
    let intent = intent::classify(original_query);
    let temporal_filter = temporal::parse(original_query, reference_time);
    let entities = entities::extract(original_query, temporal_filter.as_ref());
    let expansion_terms = expansion::expand(intent, &entities);

    let filters = QueryFilters {
        artifact_types: None,
        date_from: temporal_filter.as_ref().and_then(|t| t.date_from),
        date_to: temporal_filter.as_ref().and_then(|t| t.date_to),
    };

    StructuredQuery {
        query_id: Uuid::new_v4().to_string(),
        original_query: original_query.to_string(),
        patient_id: patient_id.to_string(),
        intent,
        entities,
        temporal_filter,
        filters,
        expansion_terms,
        detail_level: detail_level(original_query, intent),
    }
}

/// 1..=5; 3 is the default, summaries lean terse, explicit asks for detail
/// lean verbose.
fn detail_level(query: &str, intent: QueryIntent) -> u8 {
    let lowered = query.to_lowercase();
    if ["in detail", "detailed", "comprehensive", "everything about", "full history"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return 5;
    }
    if ["briefly", "quick", "short", "in a sentence"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return 2;
    }
    if intent == QueryIntent::Summary {
        return 2;
    }
    3
}
