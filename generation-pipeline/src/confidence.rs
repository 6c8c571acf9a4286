//! Response confidence: how much of the generated answer survived citation
//! validation, how strong the cited chunks scored in retrieval, and how
//! many distinct artifacts back the answer.

use std::collections::HashSet;

use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};

use crate::citation::ValidatedExtraction;

const WEIGHT_COVERAGE: f32 = 0.70;
const WEIGHT_RETRIEVAL: f32 = 0.15;
const WEIGHT_DIVERSITY: f32 = 0.15;
/// Unique cited artifacts at which the diversity component saturates.
const DIVERSITY_CAP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub score: f32,
    pub label: ConfidenceLabel,
    pub reason: String,
}

impl ConfidenceReport {
    pub fn low(reason: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            label: ConfidenceLabel::Low,
            reason: reason.into(),
        }
    }
}

/// Score a validated answer. `validated` is every extraction the model
/// produced, including invalid ones.
pub fn score_confidence(
    validated: &[ValidatedExtraction],
    candidates: &[RetrievalCandidate],
) -> ConfidenceReport {
    if validated.is_empty() {
        return ConfidenceReport::low("the model produced no extractions");
    }

    let valid: Vec<&ValidatedExtraction> = validated.iter().filter(|v| v.valid).collect();
    let coverage = valid.len() as f32 / validated.len() as f32;

    let cited_chunk_ids: HashSet<&str> = valid
        .iter()
        .filter_map(|v| v.extraction.provenance.as_ref())
        .map(|p| p.chunk_id.as_str())
        .collect();
    let cited_scores: Vec<f32> = candidates
        .iter()
        .filter(|candidate| cited_chunk_ids.contains(candidate.chunk.id.as_str()))
        .map(|candidate| candidate.score.clamp(0.0, 1.0))
        .collect();
    let mean_retrieval = if cited_scores.is_empty() {
        0.0
    } else {
        cited_scores.iter().sum::<f32>() / cited_scores.len() as f32
    };

    let cited_artifacts: HashSet<&str> = valid
        .iter()
        .filter_map(|v| v.extraction.provenance.as_ref())
        .map(|p| p.artifact_id.as_str())
        .collect();
    let diversity = cited_artifacts.len().min(DIVERSITY_CAP) as f32 / DIVERSITY_CAP as f32;

    let score = (WEIGHT_COVERAGE * coverage
        + WEIGHT_RETRIEVAL * mean_retrieval
        + WEIGHT_DIVERSITY * diversity)
        .clamp(0.0, 1.0);

    let reason = format!(
        "{valid_count} of {produced} extractions verified against sources; citations span {artifacts} artifact(s)",
        valid_count = valid.len(),
        produced = validated.len(),
        artifacts = cited_artifacts.len(),
    );

    ConfidenceReport {
        score,
        label: ConfidenceLabel::from_score(score),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::CitationIssue;
    use crate::extraction::{Extraction, ExtractionContent, Provenance};
    use chrono::Utc;
    use common::storage::types::{
        artifact::{Artifact, ArtifactType},
        chunk::Chunk,
    };
    use std::collections::BTreeMap;

    fn candidate(chunk_id: &str, artifact_id: &str, score: f32) -> RetrievalCandidate {
        let artifact = Artifact::new(
            artifact_id,
            "p1",
            ArtifactType::Note,
            Utc::now(),
            None,
            "content".to_string(),
            None,
            serde_json::Value::Null,
        );
        let mut chunk = Chunk::from_artifact(&artifact, 0, 7);
        chunk.id = chunk_id.to_string();
        RetrievalCandidate::new(chunk, score, score, score)
    }

    fn validated(chunk_id: &str, artifact_id: &str, valid: bool) -> ValidatedExtraction {
        ValidatedExtraction {
            extraction: Extraction {
                content: ExtractionContent::GeneralNote(BTreeMap::new()),
                provenance: Some(Provenance {
                    artifact_id: artifact_id.into(),
                    chunk_id: chunk_id.into(),
                    char_offsets: [0, 7],
                    supporting_text: "content".into(),
                }),
            },
            issues: if valid {
                Vec::new()
            } else {
                vec![CitationIssue::TextMismatch]
            },
            valid,
        }
    }

    #[test]
    fn fully_verified_answer_scores_high() {
        let report = score_confidence(
            &[validated("c1", "a1", true)],
            &[candidate("c1", "a1", 0.8)],
        );
        assert_eq!(report.label, ConfidenceLabel::High);
        assert!(report.score >= 0.75);
        assert!(report.reason.contains("1 of 1"));
    }

    #[test]
    fn invalid_extractions_drag_confidence_down() {
        let all_invalid = score_confidence(
            &[validated("c1", "a1", false)],
            &[candidate("c1", "a1", 0.8)],
        );
        assert_eq!(all_invalid.label, ConfidenceLabel::Low);

        let half = score_confidence(
            &[validated("c1", "a1", true), validated("c2", "a1", false)],
            &[candidate("c1", "a1", 0.6), candidate("c2", "a1", 0.6)],
        );
        assert!(half.score < 0.75);
    }

    #[test]
    fn no_extractions_is_low_confidence() {
        let report = score_confidence(&[], &[candidate("c1", "a1", 0.9)]);
        assert_eq!(report.label, ConfidenceLabel::Low);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn multi_artifact_citations_score_higher_than_single() {
        let single = score_confidence(
            &[validated("c1", "a1", true), validated("c2", "a1", true)],
            &[candidate("c1", "a1", 0.7), candidate("c2", "a1", 0.7)],
        );
        let multi = score_confidence(
            &[validated("c1", "a1", true), validated("c2", "a2", true)],
            &[candidate("c1", "a1", 0.7), candidate("c2", "a2", 0.7)],
        );
        assert!(multi.score > single.score);
    }

    #[test]
    fn labels_follow_the_thresholds() {
        assert_eq!(ConfidenceLabel::from_score(0.75), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(0.74), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(0.5), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(0.49), ConfidenceLabel::Low);
    }
}
