//! Time decay: score × `exp(-rate · days_ago)` with `days_ago` measured
//! from the request's reference time. Future-dated chunks clamp to zero
//! days, so they decay like today's.

use chrono::{DateTime, Utc};

use crate::RetrievalCandidate;

pub fn apply_time_decay(
    candidates: &mut [RetrievalCandidate],
    reference_time: DateTime<Utc>,
    rate: f32,
) {
    for candidate in candidates.iter_mut() {
        let days_ago = (reference_time - candidate.chunk.occurred_at).num_days().max(0);
        let factor = (-rate * days_ago as f32).exp();

        candidate.days_ago = days_ago;
        candidate.time_decay_factor = factor;
        candidate.score *= factor;
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    for (position, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = position.saturating_add(1);
    }
}
