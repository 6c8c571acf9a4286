use serde::{Deserialize, Serialize};

/// Tuning knobs for the retrieval stages. The defaults are the production
/// values; tests narrow them where a scenario calls for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of the semantic leg in hybrid search; the lexical leg gets
    /// `1 - alpha`.
    pub hybrid_alpha: f32,
    /// Candidates kept after hybrid search.
    pub hybrid_top_n: usize,
    /// Size of the diversity-guaranteed head of the ranking.
    pub top_k: usize,
    /// Base of the per-artifact diversity penalty `base^(n-1)`.
    pub diversity_penalty_base: f32,
    /// Rate of the exponential time decay `exp(-rate * days_ago)`.
    pub time_decay_rate: f32,
    /// Target snippet width in characters.
    pub snippet_window: usize,
    /// Maximum edit distance for fuzzy highlight matches.
    pub fuzzy_max_distance: usize,
    /// Minimum term length considered for fuzzy matching.
    pub fuzzy_min_term_len: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.7,
            hybrid_top_n: 20,
            top_k: 5,
            diversity_penalty_base: 0.9,
            time_decay_rate: 0.01,
            snippet_window: 200,
            fuzzy_max_distance: 2,
            fuzzy_min_term_len: 4,
        }
    }
}
