//! Score helpers and the multi-signal scorer. The scorer blends the hybrid
//! score with intent-to-type affinity, entity coverage, keyword match and a
//! recency boost using fixed per-intent weights, producing scores in
//! `[0, 1]`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{storage::types::artifact::ArtifactType, utils::text::tokenize};
use query_understanding::{EntityType, QueryIntent, StructuredQuery};

use crate::RetrievalCandidate;

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Min-max normalization to `[0, 1]`. All-zero inputs stay zero; a flat
/// non-zero distribution maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() || max <= 0.0 {
        return vec![0.0; scores.len()];
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// How strongly an intent prefers chunks of a given artifact type.
pub fn intent_type_affinity(intent: QueryIntent, artifact_type: ArtifactType) -> f32 {
    match intent {
        QueryIntent::RetrieveMedications => match artifact_type {
            ArtifactType::MedicationOrder => 1.0,
            ArtifactType::Note => 0.6,
            ArtifactType::CarePlan => 0.4,
            _ => 0.3,
        },
        QueryIntent::RetrieveCarePlans => match artifact_type {
            ArtifactType::CarePlan => 1.0,
            ArtifactType::Note => 0.6,
            _ => 0.3,
        },
        QueryIntent::RetrieveNotes => match artifact_type {
            ArtifactType::Note => 1.0,
            ArtifactType::Document | ArtifactType::Message => 0.5,
            _ => 0.3,
        },
        QueryIntent::Summary | QueryIntent::Comparison | QueryIntent::RetrieveAll => 0.5,
        QueryIntent::Unknown => 0.4,
    }
}

/// Fraction of clinical entities whose normalized form appears in the
/// content. Date entities are skipped, they constrain the filter instead.
pub fn entity_coverage(query: &StructuredQuery, content_lower: &str) -> f32 {
    let relevant: Vec<&str> = query
        .entities
        .iter()
        .filter(|entity| entity.entity_type != EntityType::Date)
        .map(|entity| entity.normalized.as_str())
        .collect();
    if relevant.is_empty() {
        return 0.0;
    }
    let covered = relevant
        .iter()
        .filter(|normalized| content_lower.contains(*normalized))
        .count();
    covered as f32 / relevant.len() as f32
}

/// Fraction of query tokens present in the content token set.
pub fn keyword_match(query_tokens: &[String], content_tokens: &HashSet<String>) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let hits = query_tokens
        .iter()
        .filter(|token| content_tokens.contains(*token))
        .count();
    hits as f32 / query_tokens.len() as f32
}

/// Soft boost for newer chunks; halves roughly every month.
pub fn recency_boost(days_ago: i64) -> f32 {
    1.0 / (1.0 + days_ago.max(0) as f32 / 30.0)
}

#[derive(Debug, Clone, Copy)]
pub struct SignalWeights {
    pub hybrid: f32,
    pub affinity: f32,
    pub coverage: f32,
    pub keyword: f32,
    pub recency: f32,
}

/// Fixed per-intent blend weights; each row sums to 1.0.
pub fn weights_for_intent(intent: QueryIntent) -> SignalWeights {
    match intent {
        QueryIntent::RetrieveMedications
        | QueryIntent::RetrieveCarePlans
        | QueryIntent::RetrieveNotes => SignalWeights {
            hybrid: 0.5,
            affinity: 0.2,
            coverage: 0.15,
            keyword: 0.1,
            recency: 0.05,
        },
        QueryIntent::Summary | QueryIntent::Comparison => SignalWeights {
            hybrid: 0.45,
            affinity: 0.1,
            coverage: 0.15,
            keyword: 0.1,
            recency: 0.2,
        },
        QueryIntent::RetrieveAll | QueryIntent::Unknown => SignalWeights {
            hybrid: 0.55,
            affinity: 0.1,
            coverage: 0.15,
            keyword: 0.15,
            recency: 0.05,
        },
    }
}

/// Blend all signals into each candidate's score.
pub fn score_candidates(
    query: &StructuredQuery,
    candidates: &mut [RetrievalCandidate],
    reference_time: DateTime<Utc>,
) {
    let weights = weights_for_intent(query.intent);
    let query_tokens = tokenize(&query.original_query);

    for candidate in candidates.iter_mut() {
        let content_lower = candidate.chunk.content.to_lowercase();
        let content_tokens: HashSet<String> = tokenize(&content_lower).into_iter().collect();
        let days_ago = (reference_time - candidate.chunk.occurred_at).num_days().max(0);

        let blended = weights.hybrid * candidate.score
            + weights.affinity * intent_type_affinity(query.intent, candidate.chunk.artifact_type)
            + weights.coverage * entity_coverage(query, &content_lower)
            + weights.keyword * keyword_match(&query_tokens, &content_tokens)
            + weights.recency * recency_boost(days_ago);

        candidate.score = clamp_unit(blended);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::{artifact::Artifact, chunk::Chunk};
    use query_understanding::analyze;

    fn candidate(content: &str, artifact_type: ArtifactType, hybrid: f32) -> RetrievalCandidate {
        let artifact = Artifact::new(
            "a1",
            "p1",
            artifact_type,
            Utc::now(),
            None,
            content.to_string(),
            None,
            serde_json::Value::Null,
        );
        let chunk = Chunk::from_artifact(&artifact, 0, artifact.content.len());
        RetrievalCandidate::new(chunk, hybrid, hybrid, hybrid)
    }

    #[test]
    fn normalize_handles_flat_and_zero_inputs() {
        assert_eq!(min_max_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(min_max_normalize(&[2.0, 2.0]), vec![1.0, 1.0]);
        let normalized = min_max_normalize(&[1.0, 3.0]);
        assert_eq!(normalized, vec![0.0, 1.0]);
    }

    #[test]
    fn medication_intent_prefers_medication_orders() {
        assert!(
            intent_type_affinity(QueryIntent::RetrieveMedications, ArtifactType::MedicationOrder)
                > intent_type_affinity(QueryIntent::RetrieveMedications, ArtifactType::Vital)
        );
    }

    #[test]
    fn entity_coverage_counts_only_clinical_entities() {
        let query = analyze("metformin for diabetes yesterday", "p1", Utc::now());
        let full = entity_coverage(&query, "metformin and diabet management");
        assert!(full > 0.9, "both clinical entities covered: {full}");
        let none = entity_coverage(&query, "unrelated content");
        assert_eq!(none, 0.0);
    }

    #[test]
    fn recency_boost_decreases_with_age() {
        assert!(recency_boost(0) > recency_boost(30));
        assert!(recency_boost(30) > recency_boost(365));
        assert!((recency_boost(0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn scoring_stays_in_unit_interval_and_rewards_matches() {
        let query = analyze("what medications is the patient taking", "p1", Utc::now());
        let mut candidates = vec![
            candidate(
                "Patient prescribed Metformin 500mg twice daily.",
                ArtifactType::MedicationOrder,
                0.9,
            ),
            candidate("Discussed exercise routine.", ArtifactType::Note, 0.9),
        ];
        score_candidates(&query, &mut candidates, Utc::now());

        assert!(candidates.iter().all(|c| (0.0..=1.0).contains(&c.score)));
        assert!(
            candidates[0].score > candidates[1].score,
            "medication order with keyword overlap should outrank the note"
        );
    }

    #[test]
    fn weights_sum_to_one() {
        for intent in [
            QueryIntent::RetrieveMedications,
            QueryIntent::Summary,
            QueryIntent::Unknown,
        ] {
            let w = weights_for_intent(intent);
            let sum = w.hybrid + w.affinity + w.coverage + w.keyword + w.recency;
            assert!((sum - 1.0).abs() < 1e-6);
        }
    }
}
