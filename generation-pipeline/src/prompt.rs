//! Prompt assembly for the generation model. The system prompt pins the
//! model to quoted, provenance-carrying extractions; the user prompt lists
//! the retrieved chunks followed by the clinician's question. When the
//! token estimate exceeds the budget, candidates are dropped greedily from
//! the tail.

use retrieval_pipeline::RetrievalCandidate;
use tracing::debug;

/// Crude `ceil(chars / 4)` token estimate, matching the truncation budget.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub const MAX_PROMPT_TOKENS: usize = 4000;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are a clinical information extraction engine. Only use information \
present in the provided chunks; never infer, guess, or add outside \
knowledge. Return strict JSON of the form \
{\"extractions\": [...]} and nothing else. Each extraction has a \"type\" \
(one of \"medication_recommendation\", \"care_plan_note\", \
\"general_note\"), a \"content\" object with the extracted fields, and a \
\"provenance\" object with \"artifact_id\", \"chunk_id\", \"char_offsets\" \
[start, end] into the chunk content, and \"supporting_text\" that is an \
exact quote of that span.";

pub const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a clinical summarization engine. Only use information present in \
the provided chunks; never infer or add outside knowledge. Return strict \
JSON of the form {\"extractions\": [...]} where each extraction has a \
\"type\" of \"general_note\", a \"content\" object with a \"summary\" \
field, and a \"provenance\" object with \"artifact_id\", \"chunk_id\", \
\"char_offsets\" [start, end] and an exact \"supporting_text\" quote.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    Extraction,
    Summarization,
}

impl PromptMode {
    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Extraction => EXTRACTION_SYSTEM_PROMPT,
            Self::Summarization => SUMMARIZATION_SYSTEM_PROMPT,
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            Self::Extraction => 0.0,
            Self::Summarization => 0.3,
        }
    }

    pub fn max_tokens(self) -> u32 {
        2000
    }
}

#[derive(Debug, Clone)]
pub struct PromptPlan {
    pub system_prompt: String,
    pub user_prompt: String,
    pub mode: PromptMode,
    /// Candidates that made it into the prompt after truncation.
    pub included_candidates: usize,
    pub estimated_tokens: usize,
}

fn format_candidate(candidate: &RetrievalCandidate) -> String {
    format!(
        "[chunk_id: {chunk_id} | artifact_id: {artifact_id} | type: {artifact_type} | date: {date}]\n{content}\n",
        chunk_id = candidate.chunk.id,
        artifact_id = candidate.chunk.artifact_id,
        artifact_type = candidate.chunk.artifact_type,
        date = candidate.chunk.occurred_at.format("%Y-%m-%d"),
        content = candidate.chunk.content,
    )
}

fn assemble_user_prompt(candidates: &[RetrievalCandidate], query: &str) -> String {
    let mut prompt = String::from("Patient record chunks:\n==================\n");
    for candidate in candidates {
        prompt.push_str(&format_candidate(candidate));
        prompt.push('\n');
    }
    prompt.push_str("Clinician question:\n==================\n");
    prompt.push_str(query);
    prompt
}

/// Build the prompt pair, dropping candidates from the tail until the
/// estimate fits the budget.
pub fn build_prompt(candidates: &[RetrievalCandidate], query: &str, mode: PromptMode) -> PromptPlan {
    let system_prompt = mode.system_prompt().to_string();

    let mut included = candidates.len();
    loop {
        let user_prompt = assemble_user_prompt(
            candidates.get(..included).unwrap_or_default(),
            query,
        );
        let estimated =
            estimate_tokens(&system_prompt).saturating_add(estimate_tokens(&user_prompt));

        if estimated <= MAX_PROMPT_TOKENS || included == 0 {
            if included < candidates.len() {
                debug!(
                    dropped = candidates.len().saturating_sub(included),
                    estimated, "truncated prompt candidates to fit token budget"
                );
            }
            return PromptPlan {
                system_prompt,
                user_prompt,
                mode,
                included_candidates: included,
                estimated_tokens: estimated,
            };
        }
        included = included.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::storage::types::{
        artifact::{Artifact, ArtifactType},
        chunk::Chunk,
    };

    fn candidate(id: &str, content: &str) -> RetrievalCandidate {
        let artifact = Artifact::new(
            id,
            "p1",
            ArtifactType::Note,
            Utc::now(),
            None,
            content.to_string(),
            None,
            serde_json::Value::Null,
        );
        let chunk = Chunk::from_artifact(&artifact, 0, artifact.content.len());
        RetrievalCandidate::new(chunk, 0.5, 0.5, 0.5)
    }

    #[test]
    fn token_estimate_is_ceiling_of_quarter_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn prompt_contains_chunks_and_question() {
        let candidates = vec![candidate("a1", "Metformin 500mg twice daily.")];
        let plan = build_prompt(&candidates, "What medications?", PromptMode::Extraction);

        assert!(plan.user_prompt.contains("Metformin 500mg"));
        assert!(plan.user_prompt.contains("What medications?"));
        assert!(plan.user_prompt.contains("chunk_id:"));
        assert_eq!(plan.included_candidates, 1);
        assert!((plan.mode.temperature() - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn oversized_prompts_drop_candidates_from_the_tail() {
        // Each candidate estimates to ~2500 tokens, so exactly one fits.
        let big_content = "word ".repeat(2000);
        let candidates: Vec<RetrievalCandidate> = (0..5)
            .map(|i| candidate(&format!("a{i}"), &big_content))
            .collect();
        let plan = build_prompt(&candidates, "question", PromptMode::Extraction);

        assert!(plan.included_candidates < 5);
        assert!(plan.estimated_tokens <= MAX_PROMPT_TOKENS || plan.included_candidates == 0);
        // The head candidate survives; the tail is dropped first.
        assert!(plan.user_prompt.contains("a0"));
    }

    #[test]
    fn summarization_mode_uses_warmer_temperature() {
        assert!((PromptMode::Summarization.temperature() - 0.3).abs() < f32::EPSILON);
        assert_eq!(PromptMode::Summarization.max_tokens(), 2000);
    }
}
