//! Provenance formatting for the response: one entry per citation with a
//! sentence-aware snippet around the cited span and a display date.

use chrono::{DateTime, Utc};
use common::{
    storage::types::artifact::ArtifactType,
    utils::text::{ceil_char_boundary, floor_char_boundary, sentence_spans},
};
use retrieval_pipeline::RetrievalCandidate;
use serde::{Deserialize, Serialize};

use crate::{citation::ValidatedExtraction, dates::format_note_date};

const SNIPPET_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub artifact_id: String,
    pub artifact_type: ArtifactType,
    pub note_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub snippet: String,
    pub relevance_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Relevance,
    Date,
}

/// Snippet centered on the cited span, grown to its sentence when that
/// fits, clipped to 200 chars otherwise.
fn citation_snippet(content: &str, span_start: usize, span_end: usize) -> String {
    let span_start = span_start.min(content.len());
    let span_end = span_end.min(content.len()).max(span_start);

    let mut start = span_start;
    let mut end = span_end;
    for &(s_start, s_end) in &sentence_spans(content) {
        if s_start <= span_start && span_start < s_end.max(s_start.saturating_add(1)) {
            start = s_start;
            end = s_end.max(span_end);
            break;
        }
    }

    if end.saturating_sub(start) > SNIPPET_MAX_CHARS {
        let overflow = end.saturating_sub(start).saturating_sub(SNIPPET_MAX_CHARS);
        // Keep the cited span visible; trim the tail first.
        end = end.saturating_sub(overflow).max(span_end.min(start.saturating_add(SNIPPET_MAX_CHARS)));
        if end.saturating_sub(start) > SNIPPET_MAX_CHARS {
            start = end.saturating_sub(SNIPPET_MAX_CHARS);
        }
    }

    let start = floor_char_boundary(content, start);
    let end = ceil_char_boundary(content, end);
    let mut snippet = content.get(start..end).unwrap_or_default().trim().to_string();
    if start > 0 {
        snippet = format!("…{snippet}");
    }
    if end < content.len() {
        snippet = format!("{snippet}…");
    }
    snippet
}

fn sort_entries(entries: &mut [(DateTime<Utc>, ProvenanceEntry)], sort: SortOrder) {
    match sort {
        SortOrder::Relevance => entries.sort_by(|a, b| {
            b.1.relevance_score
                .partial_cmp(&a.1.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.artifact_id.cmp(&b.1.artifact_id))
        }),
        SortOrder::Date => entries.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.artifact_id.cmp(&b.1.artifact_id))
        }),
    }
}

/// Stable dedup on `(artifact_id, snippet)`, keeping the first occurrence.
fn dedup_entries(entries: Vec<ProvenanceEntry>) -> Vec<ProvenanceEntry> {
    let mut seen: Vec<(String, String)> = Vec::new();
    entries
        .into_iter()
        .filter(|entry| {
            let key = (entry.artifact_id.clone(), entry.snippet.clone());
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        })
        .collect()
}

/// Format provenance for every valid citation.
pub fn format_provenance(
    validated: &[ValidatedExtraction],
    candidates: &[RetrievalCandidate],
    reference_time: DateTime<Utc>,
    sort: SortOrder,
) -> Vec<ProvenanceEntry> {
    let mut dated: Vec<(DateTime<Utc>, ProvenanceEntry)> = Vec::new();

    for validated_extraction in validated.iter().filter(|v| v.valid) {
        let Some(provenance) = &validated_extraction.extraction.provenance else {
            continue;
        };
        let Some(candidate) = candidates
            .iter()
            .find(|candidate| candidate.chunk.id == provenance.chunk_id)
        else {
            continue;
        };

        let chunk = &candidate.chunk;
        let [start, end] = provenance.char_offsets;
        let snippet = citation_snippet(
            &chunk.content,
            usize::try_from(start).unwrap_or(0),
            usize::try_from(end).unwrap_or(0),
        );

        dated.push((
            chunk.occurred_at,
            ProvenanceEntry {
                artifact_id: chunk.artifact_id.clone(),
                artifact_type: chunk.artifact_type,
                note_date: format_note_date(chunk.occurred_at, reference_time),
                author: chunk.author.clone(),
                snippet,
                relevance_score: candidate.score,
                source_url: chunk.source_url.clone(),
            },
        ));
    }

    sort_entries(&mut dated, sort);
    dedup_entries(dated.into_iter().map(|(_, entry)| entry).collect())
}

/// Retrieval-only provenance, used when the answer fell back to snippets.
pub fn provenance_from_candidates(
    candidates: &[RetrievalCandidate],
    reference_time: DateTime<Utc>,
    limit: usize,
) -> Vec<ProvenanceEntry> {
    let entries: Vec<ProvenanceEntry> = candidates
        .iter()
        .take(limit)
        .map(|candidate| {
            let chunk = &candidate.chunk;
            ProvenanceEntry {
                artifact_id: chunk.artifact_id.clone(),
                artifact_type: chunk.artifact_type,
                note_date: format_note_date(chunk.occurred_at, reference_time),
                author: chunk.author.clone(),
                snippet: if candidate.snippet.is_empty() {
                    citation_snippet(&chunk.content, 0, 0)
                } else {
                    candidate.snippet.clone()
                },
                relevance_score: candidate.score,
                source_url: chunk.source_url.clone(),
            }
        })
        .collect();
    dedup_entries(entries)
}

/// Group formatted entries by artifact, preserving entry order.
pub fn group_by_artifact(entries: &[ProvenanceEntry]) -> Vec<(String, Vec<&ProvenanceEntry>)> {
    let mut groups: Vec<(String, Vec<&ProvenanceEntry>)> = Vec::new();
    for entry in entries {
        if let Some((_, group)) = groups
            .iter_mut()
            .find(|(artifact_id, _)| *artifact_id == entry.artifact_id)
        {
            group.push(entry);
        } else {
            groups.push((entry.artifact_id.clone(), vec![entry]));
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::validate_extractions;
    use crate::extraction::{Extraction, ExtractionContent, Provenance};
    use chrono::Duration;
    use common::storage::types::{artifact::Artifact, chunk::Chunk};
    use std::collections::BTreeMap;

    const CONTENT: &str =
        "Patient prescribed Metformin 500mg twice daily for Type 2 Diabetes management.";

    fn candidate(chunk_id: &str, artifact_id: &str, days_ago: i64, score: f32) -> RetrievalCandidate {
        let artifact = Artifact::new(
            artifact_id,
            "p1",
            ArtifactType::Note,
            Utc::now() - Duration::days(days_ago),
            Some("Dr. Chen".into()),
            CONTENT.to_string(),
            Some(format!("https://emr.local/{artifact_id}")),
            serde_json::Value::Null,
        );
        let mut chunk = Chunk::from_artifact(&artifact, 0, CONTENT.len());
        chunk.id = chunk_id.to_string();
        let mut candidate = RetrievalCandidate::new(chunk, score, score, score);
        candidate.snippet = String::new();
        candidate
    }

    fn valid_extraction(chunk_id: &str, artifact_id: &str) -> Extraction {
        Extraction {
            content: ExtractionContent::GeneralNote(BTreeMap::new()),
            provenance: Some(Provenance {
                artifact_id: artifact_id.into(),
                chunk_id: chunk_id.into(),
                char_offsets: [19, 46],
                supporting_text: "Metformin 500mg twice daily".into(),
            }),
        }
    }

    #[test]
    fn entries_carry_snippet_date_and_score() {
        let candidates = vec![candidate("c1", "note_123", 2, 0.8)];
        let validated = validate_extractions(vec![valid_extraction("c1", "note_123")], &candidates);
        let entries = format_provenance(&validated, &candidates, Utc::now(), SortOrder::Relevance);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.artifact_id, "note_123");
        assert_eq!(entry.note_date, "2 days ago");
        assert!(entry.snippet.contains("Metformin 500mg twice daily"));
        assert!(entry.snippet.len() <= 220);
        assert_eq!(entry.author.as_deref(), Some("Dr. Chen"));
        assert!((entry.relevance_score - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_extractions_produce_no_entries() {
        let candidates = vec![candidate("c1", "note_123", 2, 0.8)];
        let mut tampered = valid_extraction("c1", "note_123");
        if let Some(p) = tampered.provenance.as_mut() {
            p.supporting_text = "WRONG".into();
        }
        let validated = validate_extractions(vec![tampered], &candidates);
        let entries = format_provenance(&validated, &candidates, Utc::now(), SortOrder::Relevance);
        assert!(entries.is_empty());
    }

    #[test]
    fn sorting_by_date_puts_newest_first() {
        let candidates = vec![
            candidate("c1", "old_note", 30, 0.9),
            candidate("c2", "new_note", 1, 0.2),
        ];
        let validated = validate_extractions(
            vec![
                valid_extraction("c1", "old_note"),
                valid_extraction("c2", "new_note"),
            ],
            &candidates,
        );
        let by_date = format_provenance(&validated, &candidates, Utc::now(), SortOrder::Date);
        assert_eq!(by_date[0].artifact_id, "new_note");

        let by_relevance =
            format_provenance(&validated, &candidates, Utc::now(), SortOrder::Relevance);
        assert_eq!(by_relevance[0].artifact_id, "old_note");
    }

    #[test]
    fn duplicate_citations_are_deduplicated_stably() {
        let candidates = vec![candidate("c1", "note_123", 2, 0.8)];
        let validated = validate_extractions(
            vec![
                valid_extraction("c1", "note_123"),
                valid_extraction("c1", "note_123"),
            ],
            &candidates,
        );
        let entries = format_provenance(&validated, &candidates, Utc::now(), SortOrder::Relevance);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn fallback_provenance_uses_top_candidates() {
        let candidates = vec![
            candidate("c1", "a1", 1, 0.9),
            candidate("c2", "a2", 2, 0.8),
            candidate("c3", "a3", 3, 0.7),
            candidate("c4", "a4", 4, 0.6),
        ];
        let entries = provenance_from_candidates(&candidates, Utc::now(), 3);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].artifact_id, "a1");
        assert!(!entries[0].snippet.is_empty());
    }

    #[test]
    fn grouping_preserves_order_within_artifacts() {
        let entries = vec![
            ProvenanceEntry {
                artifact_id: "a1".into(),
                artifact_type: ArtifactType::Note,
                note_date: "yesterday".into(),
                author: None,
                snippet: "one".into(),
                relevance_score: 0.9,
                source_url: None,
            },
            ProvenanceEntry {
                artifact_id: "a2".into(),
                artifact_type: ArtifactType::Note,
                note_date: "yesterday".into(),
                author: None,
                snippet: "two".into(),
                relevance_score: 0.8,
                source_url: None,
            },
            ProvenanceEntry {
                artifact_id: "a1".into(),
                artifact_type: ArtifactType::Note,
                note_date: "yesterday".into(),
                author: None,
                snippet: "three".into(),
                relevance_score: 0.7,
                source_url: None,
            },
        ];
        let groups = group_by_artifact(&entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "a1");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].snippet, "three");
    }
}
