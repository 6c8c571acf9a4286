//! Diversification. The n-th candidate drawn from the same artifact pays a
//! multiplicative `base^(n-1)` penalty, and after re-sorting the top-K is
//! guaranteed to span at least two artifacts whenever the candidate set
//! does.

use std::collections::HashMap;

use crate::RetrievalCandidate;

/// Apply the per-artifact penalty in current rank order, then re-sort.
/// `candidates` must already be sorted by descending score.
pub fn diversify(candidates: &mut Vec<RetrievalCandidate>, top_k: usize, penalty_base: f32) {
    let mut seen_per_artifact: HashMap<String, u32> = HashMap::new();

    for candidate in candidates.iter_mut() {
        let position = seen_per_artifact
            .entry(candidate.chunk.artifact_id.clone())
            .or_insert(0);
        *position += 1;

        let penalty = penalty_base.powi(i32::try_from(*position - 1).unwrap_or(i32::MAX));
        candidate.artifact_position = *position as usize;
        candidate.diversity_penalty = penalty;
        candidate.score *= penalty;
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    ensure_top_k_diversity(candidates, top_k);

    for (position, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = position.saturating_add(1);
    }
}

/// Promote the best candidate from an unrepresented artifact into position
/// K when the head is single-artifact but the set is not.
fn ensure_top_k_diversity(candidates: &mut Vec<RetrievalCandidate>, top_k: usize) {
    if candidates.len() <= 1 || top_k == 0 {
        return;
    }

    let distinct_total = {
        let mut artifacts: Vec<&str> = candidates
            .iter()
            .map(|c| c.chunk.artifact_id.as_str())
            .collect();
        artifacts.sort_unstable();
        artifacts.dedup();
        artifacts.len()
    };
    if distinct_total < 2 {
        return;
    }

    let head = top_k.min(candidates.len());
    let head_distinct = {
        let mut artifacts: Vec<&str> = candidates
            .iter()
            .take(head)
            .map(|c| c.chunk.artifact_id.as_str())
            .collect();
        artifacts.sort_unstable();
        artifacts.dedup();
        artifacts.len()
    };
    if head_distinct >= 2 {
        return;
    }

    let head_artifact = candidates[0].chunk.artifact_id.clone();
    let promoted_index = candidates
        .iter()
        .position(|c| c.chunk.artifact_id != head_artifact);
    if let Some(promoted_index) = promoted_index {
        let promoted = candidates.remove(promoted_index);
        candidates.insert(head.saturating_sub(1), promoted);
    }
}
