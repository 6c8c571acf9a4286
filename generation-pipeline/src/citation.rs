//! Citation validation, the last gate before response assembly. Every
//! extraction's provenance is checked against the retrieved chunks; errors
//! exclude the extraction, warnings are logged and kept.

use common::storage::types::chunk::Chunk;
use retrieval_pipeline::RetrievalCandidate;
use serde::Serialize;
use tracing::warn;

use crate::extraction::Extraction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationIssue {
    MissingProvenance,
    InvalidArtifactId,
    InvalidOffsets,
    TextMismatch,
    WhitespaceMismatch,
    CaseMismatch,
}

impl CitationIssue {
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingProvenance => "missing_provenance",
            Self::InvalidArtifactId => "invalid_artifact_id",
            Self::InvalidOffsets => "invalid_offsets",
            Self::TextMismatch => "text_mismatch",
            Self::WhitespaceMismatch => "whitespace_mismatch",
            Self::CaseMismatch => "case_mismatch",
        }
    }

    pub fn severity(self) -> IssueSeverity {
        match self {
            Self::WhitespaceMismatch | Self::CaseMismatch => IssueSeverity::Warning,
            _ => IssueSeverity::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedExtraction {
    pub extraction: Extraction,
    pub issues: Vec<CitationIssue>,
    /// False when any error-severity issue is present; such extractions
    /// are dropped from the response.
    pub valid: bool,
}

fn validate_one(extraction: &Extraction, candidates: &[RetrievalCandidate]) -> Vec<CitationIssue> {
    let Some(provenance) = &extraction.provenance else {
        return vec![CitationIssue::MissingProvenance];
    };

    let chunk: Option<&Chunk> = candidates
        .iter()
        .map(|candidate| &candidate.chunk)
        .find(|chunk| chunk.id == provenance.chunk_id);
    let Some(chunk) = chunk else {
        return vec![CitationIssue::InvalidArtifactId];
    };
    if chunk.artifact_id != provenance.artifact_id {
        return vec![CitationIssue::InvalidArtifactId];
    }

    let [start, end] = provenance.char_offsets;
    if start < 0 || end <= start {
        return vec![CitationIssue::InvalidOffsets];
    }
    let (start, end) = (start as usize, end as usize);
    if end > chunk.content.len() {
        return vec![CitationIssue::InvalidOffsets];
    }
    let Some(cited_span) = chunk.content.get(start..end) else {
        // Offsets inside a multi-byte character.
        return vec![CitationIssue::InvalidOffsets];
    };

    if provenance.supporting_text == cited_span {
        return Vec::new();
    }
    if provenance.supporting_text.trim() == cited_span.trim() {
        return vec![CitationIssue::WhitespaceMismatch];
    }
    if provenance.supporting_text.to_lowercase() == cited_span.to_lowercase() {
        return vec![CitationIssue::CaseMismatch];
    }
    vec![CitationIssue::TextMismatch]
}

/// Validate every extraction against the candidate chunks. Warning-level
/// mismatches keep the extraction; anything error-level marks it invalid.
pub fn validate_extractions(
    extractions: Vec<Extraction>,
    candidates: &[RetrievalCandidate],
) -> Vec<ValidatedExtraction> {
    extractions
        .into_iter()
        .map(|extraction| {
            let issues = validate_one(&extraction, candidates);
            let valid = issues
                .iter()
                .all(|issue| issue.severity() != IssueSeverity::Error);

            for issue in &issues {
                match issue.severity() {
                    IssueSeverity::Error => warn!(
                        issue = issue.code(),
                        extraction_type = extraction.content.type_name(),
                        "citation validation failed, extraction dropped"
                    ),
                    IssueSeverity::Warning => warn!(
                        issue = issue.code(),
                        extraction_type = extraction.content.type_name(),
                        "citation validation warning"
                    ),
                }
            }

            ValidatedExtraction {
                extraction,
                issues,
                valid,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionContent, Provenance};
    use chrono::Utc;
    use common::storage::types::{
        artifact::{Artifact, ArtifactType},
        chunk::Chunk,
    };
    use std::collections::BTreeMap;

    const CONTENT: &str =
        "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management.";

    fn candidate() -> RetrievalCandidate {
        let artifact = Artifact::new(
            "note_123",
            "p1",
            ArtifactType::Note,
            Utc::now(),
            None,
            CONTENT.to_string(),
            None,
            serde_json::Value::Null,
        );
        let mut chunk = Chunk::from_artifact(&artifact, 0, CONTENT.len());
        chunk.id = "c1".to_string();
        RetrievalCandidate::new(chunk, 0.8, 0.8, 0.8)
    }

    fn extraction(provenance: Option<Provenance>) -> Extraction {
        Extraction {
            content: ExtractionContent::MedicationRecommendation {
                medication: "Metformin".into(),
                dosage: Some("500mg".into()),
                frequency: Some("twice daily".into()),
                reason: None,
            },
            provenance,
        }
    }

    fn provenance(offsets: [i64; 2], supporting_text: &str) -> Provenance {
        Provenance {
            artifact_id: "note_123".into(),
            chunk_id: "c1".into(),
            char_offsets: offsets,
            supporting_text: supporting_text.into(),
        }
    }

    #[test]
    fn exact_quote_passes_without_issues() {
        let span = &CONTENT[19..46];
        assert_eq!(span, "Metformin 500mg twice daily");
        let validated = validate_extractions(
            vec![extraction(Some(provenance([19, 46], span)))],
            &[candidate()],
        );
        assert!(validated[0].valid);
        assert!(validated[0].issues.is_empty());
    }

    #[test]
    fn missing_provenance_is_an_error() {
        let validated = validate_extractions(vec![extraction(None)], &[candidate()]);
        assert!(!validated[0].valid);
        assert_eq!(validated[0].issues, vec![CitationIssue::MissingProvenance]);
    }

    #[test]
    fn unknown_chunk_or_wrong_artifact_is_invalid_artifact_id() {
        let mut wrong_chunk = provenance([19, 46], "Metformin 500mg twice daily");
        wrong_chunk.chunk_id = "ghost".into();
        let validated =
            validate_extractions(vec![extraction(Some(wrong_chunk))], &[candidate()]);
        assert_eq!(validated[0].issues, vec![CitationIssue::InvalidArtifactId]);

        let mut wrong_artifact = provenance([19, 46], "Metformin 500mg twice daily");
        wrong_artifact.artifact_id = "other_note".into();
        let validated =
            validate_extractions(vec![extraction(Some(wrong_artifact))], &[candidate()]);
        assert_eq!(validated[0].issues, vec![CitationIssue::InvalidArtifactId]);
    }

    #[test]
    fn out_of_range_offsets_are_invalid() {
        for offsets in [[-1i64, 10], [10, 10], [46, 19], [0, 10_000]] {
            let validated = validate_extractions(
                vec![extraction(Some(provenance(offsets, "x")))],
                &[candidate()],
            );
            assert_eq!(
                validated[0].issues,
                vec![CitationIssue::InvalidOffsets],
                "offsets {offsets:?}"
            );
        }
    }

    #[test]
    fn tampered_supporting_text_is_a_text_mismatch() {
        let validated = validate_extractions(
            vec![extraction(Some(provenance([18, 47], "WRONG")))],
            &[candidate()],
        );
        assert!(!validated[0].valid);
        assert_eq!(validated[0].issues, vec![CitationIssue::TextMismatch]);
    }

    #[test]
    fn whitespace_and_case_mismatches_are_warnings_that_keep_the_extraction() {
        let padded = validate_extractions(
            vec![extraction(Some(provenance(
                [19, 46],
                " Metformin 500mg twice daily ",
            )))],
            &[candidate()],
        );
        assert!(padded[0].valid);
        assert_eq!(padded[0].issues, vec![CitationIssue::WhitespaceMismatch]);

        let shouty = validate_extractions(
            vec![extraction(Some(provenance(
                [19, 46],
                "METFORMIN 500MG TWICE DAILY",
            )))],
            &[candidate()],
        );
        assert!(shouty[0].valid);
        assert_eq!(shouty[0].issues, vec![CitationIssue::CaseMismatch]);
    }

    #[test]
    fn general_note_content_validates_the_same_way() {
        let mut fields = BTreeMap::new();
        fields.insert("summary".to_string(), "Diabetes managed with Metformin".to_string());
        let extraction = Extraction {
            content: ExtractionContent::GeneralNote(fields),
            provenance: Some(provenance([0, 7], "Patient")),
        };
        let validated = validate_extractions(vec![extraction], &[candidate()]);
        assert!(validated[0].valid);
    }
}
