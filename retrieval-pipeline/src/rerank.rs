//! Formula re-ranker. Operates on the top 20 candidates and leaves any
//! remainder untouched:
//!
//! `rerank = 0.70·original + 0.15·entity_coverage + 0.10·query_overlap
//!           + 0.05·type_match_bonus`

use std::collections::HashSet;

use common::{storage::types::artifact::ArtifactType, utils::text::tokenize};
use query_understanding::{QueryIntent, StructuredQuery};

use crate::{scoring, RetrievalCandidate};

const RERANK_WINDOW: usize = 20;

const WEIGHT_ORIGINAL: f32 = 0.70;
const WEIGHT_ENTITY_COVERAGE: f32 = 0.15;
const WEIGHT_QUERY_OVERLAP: f32 = 0.10;
const WEIGHT_TYPE_BONUS: f32 = 0.05;

/// Per-intent preferred-type bonus; unlisted combinations score 0.3.
pub fn type_match_bonus(intent: QueryIntent, artifact_type: ArtifactType) -> f32 {
    match (intent, artifact_type) {
        (QueryIntent::RetrieveMedications, ArtifactType::MedicationOrder)
        | (QueryIntent::RetrieveCarePlans, ArtifactType::CarePlan)
        | (QueryIntent::RetrieveNotes, ArtifactType::Note) => 1.0,
        (QueryIntent::RetrieveMedications, ArtifactType::Note)
        | (QueryIntent::RetrieveCarePlans, ArtifactType::Note) => 0.6,
        _ => 0.3,
    }
}

/// `|query_tokens ∩ content_tokens| / |query_tokens|`.
fn query_overlap(query_tokens: &[String], content_tokens: &HashSet<String>) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let unique_query: HashSet<&String> = query_tokens.iter().collect();
    let hits = unique_query
        .iter()
        .filter(|token| content_tokens.contains(token.as_str()))
        .count();
    hits as f32 / unique_query.len() as f32
}

pub fn rerank_candidates(query: &StructuredQuery, candidates: &mut [RetrievalCandidate]) {
    let query_tokens = tokenize(&query.original_query);
    let window = candidates.len().min(RERANK_WINDOW);

    for candidate in candidates.iter_mut().take(window) {
        let content_lower = candidate.chunk.content.to_lowercase();
        let content_tokens: HashSet<String> = tokenize(&content_lower).into_iter().collect();

        candidate.original_score = candidate.score;
        candidate.score = WEIGHT_ORIGINAL * candidate.score
            + WEIGHT_ENTITY_COVERAGE * scoring::entity_coverage(query, &content_lower)
            + WEIGHT_QUERY_OVERLAP * query_overlap(&query_tokens, &content_tokens)
            + WEIGHT_TYPE_BONUS * type_match_bonus(query.intent, candidate.chunk.artifact_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::{artifact::Artifact, chunk::Chunk};
    use query_understanding::analyze;

    fn candidate(id: &str, content: &str, artifact_type: ArtifactType, score: f32) -> RetrievalCandidate {
        let artifact = Artifact::new(
            id,
            "p1",
            artifact_type,
            Utc::now(),
            None,
            content.to_string(),
            None,
            serde_json::Value::Null,
        );
        let chunk = Chunk::from_artifact(&artifact, 0, artifact.content.len());
        let mut c = RetrievalCandidate::new(chunk, score, score, score);
        c.original_score = score;
        c
    }

    #[test]
    fn rerank_preserves_original_score_field() {
        let query = analyze("What medications?", "p1", Utc::now());
        let mut candidates = vec![candidate(
            "a",
            "Metformin prescribed",
            ArtifactType::MedicationOrder,
            0.8,
        )];
        rerank_candidates(&query, &mut candidates);
        assert!((candidates[0].original_score - 0.8).abs() < f32::EPSILON);
        assert!(candidates[0].score > 0.0);
    }

    #[test]
    fn preferred_type_gets_the_full_bonus() {
        assert!(
            (type_match_bonus(QueryIntent::RetrieveMedications, ArtifactType::MedicationOrder)
                - 1.0)
                .abs()
                < f32::EPSILON
        );
        assert!(
            (type_match_bonus(QueryIntent::RetrieveMedications, ArtifactType::Superbill) - 0.3)
                .abs()
                < f32::EPSILON
        );
    }

    #[test]
    fn equal_originals_separate_by_overlap_and_type() {
        let query = analyze("What medications is the patient taking?", "p1", Utc::now());
        let mut candidates = vec![
            candidate("a", "Exercise discussed at visit.", ArtifactType::Note, 0.5),
            candidate(
                "b",
                "Patient taking medications as prescribed.",
                ArtifactType::MedicationOrder,
                0.5,
            ),
        ];
        rerank_candidates(&query, &mut candidates);
        assert!(candidates[1].score > candidates[0].score);
    }

    #[test]
    fn candidates_beyond_the_window_are_untouched() {
        let query = analyze("medications", "p1", Utc::now());
        let mut candidates: Vec<RetrievalCandidate> = (0..25)
            .map(|i| {
                candidate(
                    &format!("a{i}"),
                    "some content",
                    ArtifactType::Note,
                    0.4,
                )
            })
            .collect();
        rerank_candidates(&query, &mut candidates);

        for candidate in candidates.iter().take(20) {
            assert!((candidate.score - 0.4).abs() > f32::EPSILON || candidate.score > 0.0);
        }
        for candidate in candidates.iter().skip(20) {
            assert!((candidate.score - 0.4).abs() < f32::EPSILON, "tail must be untouched");
        }
    }
}
