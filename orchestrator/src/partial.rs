//! Partial-results handling. When a stage fails or the deadline expires,
//! the richest artifact already on the context becomes the response:
//! validated extractions, then retrieved snippets, then the interpreted
//! query, then a bare failure message.

use common::error::AppError;
use generation_pipeline::{
    format_provenance, provenance_from_candidates, ConfidenceLabel, ConfidenceReport, SortOrder,
};

use crate::{
    context::{QueryContext, Stage},
    response::{ResponseMetadata, UiResponse},
};

/// Candidates surfaced in the retrieval-only fallback.
const FALLBACK_SNIPPETS: usize = 3;

/// Fixed user-visible messages keyed to the failed stage.
fn stage_message(stage: Stage, error: &AppError, has_candidates: bool) -> String {
    match error {
        AppError::DeadlineExceeded if has_candidates => {
            return "Query is taking longer than expected. Showing supporting snippets without full analysis."
                .to_string();
        }
        AppError::CircuitOpen { dependency, .. } => {
            return format!(
                "The {dependency} service is temporarily unavailable. Please retry shortly."
            );
        }
        AppError::InvalidCitation(_) => {
            return "The generated answer could not be verified against the record. Showing supporting snippets instead."
                .to_string();
        }
        _ => {}
    }

    match stage {
        Stage::QueryUnderstanding => {
            "We could not interpret the question. Please rephrase and try again.".to_string()
        }
        Stage::Retrieval => {
            "We could not search the patient record right now. Please try again.".to_string()
        }
        Stage::Generation => {
            "Analysis is unavailable right now. Showing supporting snippets from the record."
                .to_string()
        }
        Stage::ConfidenceScoring | Stage::ProvenanceFormatting | Stage::ResponseBuilding => {
            "Parts of the response could not be assembled.".to_string()
        }
        Stage::AuditLogging => "The query completed but could not be recorded.".to_string(),
    }
}

fn base_metadata(ctx: &QueryContext, error: &AppError) -> ResponseMetadata {
    ResponseMetadata {
        total_time_ms: ctx.total_time_ms(),
        per_stage_ms: ctx.per_stage_ms(),
        partial: true,
        error: Some(error.kind().to_string()),
        retry_after_secs: match error {
            AppError::CircuitOpen { retry_after, .. } => {
                Some(retry_after.as_secs().max(1))
            }
            _ => None,
        },
    }
}

/// Build the best available response after `failed_stage` failed with
/// `error`. Never panics, never errors.
pub fn fallback_response(ctx: &QueryContext, failed_stage: Stage, error: &AppError) -> UiResponse {
    let message = stage_message(failed_stage, error, !ctx.candidates.is_empty());
    let metadata = base_metadata(ctx, error);

    // Richest first: validated extractions survive even when a later
    // stage failed.
    let valid = ctx.valid_extractions();
    if !valid.is_empty() {
        let lines: Vec<String> = valid
            .iter()
            .map(|v| format!("• {}", v.extraction.content.display_line()))
            .collect();
        let provenance = if ctx.provenance.is_empty() {
            format_provenance(
                &ctx.validated,
                &ctx.candidates,
                ctx.reference_time,
                SortOrder::Relevance,
            )
        } else {
            ctx.provenance.clone()
        };
        return UiResponse {
            query_id: ctx.query_id.clone(),
            short_answer: message,
            detailed_summary: lines.join("\n"),
            structured_extractions: valid.iter().map(|v| v.extraction.clone()).collect(),
            provenance,
            confidence: ConfidenceReport {
                score: 0.0,
                label: ConfidenceLabel::Low,
                reason: "partial response assembled after a stage failure".to_string(),
            },
            metadata,
        };
    }

    // Retrieval-only: top snippets become the summary bullets.
    if !ctx.candidates.is_empty() {
        let bullets: Vec<String> = ctx
            .candidates
            .iter()
            .take(FALLBACK_SNIPPETS)
            .map(|candidate| {
                let snippet = if candidate.snippet.is_empty() {
                    candidate.chunk.content.chars().take(200).collect()
                } else {
                    candidate.snippet.clone()
                };
                format!("• {snippet}")
            })
            .collect();
        return UiResponse {
            query_id: ctx.query_id.clone(),
            short_answer: message,
            detailed_summary: bullets.join("\n"),
            structured_extractions: Vec::new(),
            provenance: provenance_from_candidates(
                &ctx.candidates,
                ctx.reference_time,
                FALLBACK_SNIPPETS,
            ),
            confidence: ConfidenceReport {
                score: 0.0,
                label: ConfidenceLabel::Low,
                reason: "retrieval completed but the answer could not be generated".to_string(),
            },
            metadata,
        };
    }

    // Interpreted query only.
    if let Some(structured) = &ctx.structured_query {
        return UiResponse {
            query_id: ctx.query_id.clone(),
            short_answer: message,
            detailed_summary: format!(
                "The question was interpreted as {} but no further progress was possible.",
                structured.intent.as_str()
            ),
            structured_extractions: Vec::new(),
            provenance: Vec::new(),
            confidence: ConfidenceReport {
                score: 0.0,
                label: ConfidenceLabel::Low,
                reason: "the pipeline failed before retrieval".to_string(),
            },
            metadata,
        };
    }

    UiResponse {
        query_id: ctx.query_id.clone(),
        short_answer: message,
        detailed_summary: String::new(),
        structured_extractions: Vec::new(),
        provenance: Vec::new(),
        confidence: ConfidenceReport {
            score: 0.0,
            label: ConfidenceLabel::Low,
            reason: "the pipeline failed before producing any output".to_string(),
        },
        metadata,
    }
}

/// Complete (non-partial) response for a query that matched nothing.
pub fn no_results_response(ctx: &QueryContext) -> UiResponse {
    UiResponse {
        query_id: ctx.query_id.clone(),
        short_answer: "No matching records.".to_string(),
        detailed_summary:
            "No records in the patient chart matched the question and its filters.".to_string(),
        structured_extractions: Vec::new(),
        provenance: Vec::new(),
        confidence: ConfidenceReport {
            score: 0.0,
            label: ConfidenceLabel::Low,
            reason: "no matching records were found".to_string(),
        },
        metadata: ResponseMetadata {
            total_time_ms: ctx.total_time_ms(),
            per_stage_ms: ctx.per_stage_ms(),
            partial: false,
            error: Some("no_results".to_string()),
            retry_after_secs: None,
        },
    }
}
