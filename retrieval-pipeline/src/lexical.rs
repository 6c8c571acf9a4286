//! In-memory BM25 scoring for the lexical leg of hybrid search. The term
//! set is the union of the raw query tokens, normalized entity tokens and
//! weighted expansion terms; scores are min-max normalized to `[0, 1]` so
//! they blend with the semantic leg.

use std::collections::HashMap;

use common::utils::text::tokenize;
use query_understanding::StructuredQuery;

use crate::scoring::min_max_normalize;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTerm {
    pub term: String,
    pub weight: f32,
}

/// Union of query, entity and expansion tokens with per-term weights;
/// duplicates keep the highest weight.
pub fn collect_terms(query: &StructuredQuery) -> Vec<WeightedTerm> {
    let mut weights: HashMap<String, f32> = HashMap::new();

    for token in tokenize(&query.original_query) {
        weights.insert(token, 1.0);
    }
    for entity in &query.entities {
        for token in tokenize(&entity.normalized) {
            weights
                .entry(token)
                .and_modify(|w| *w = w.max(1.0))
                .or_insert(1.0);
        }
    }
    for expansion in &query.expansion_terms {
        for token in tokenize(&expansion.term) {
            let weight = expansion.weight.min(1.0);
            weights
                .entry(token)
                .and_modify(|w| *w = w.max(weight))
                .or_insert(weight);
        }
    }

    let mut terms: Vec<WeightedTerm> = weights
        .into_iter()
        .map(|(term, weight)| WeightedTerm { term, weight })
        .collect();
    terms.sort_by(|a, b| a.term.cmp(&b.term));
    terms
}

/// BM25 over tokenized documents, weighted per term and normalized to
/// `[0, 1]` across the document set.
pub fn bm25_scores(terms: &[WeightedTerm], documents: &[Vec<String>]) -> Vec<f32> {
    if documents.is_empty() || terms.is_empty() {
        return vec![0.0; documents.len()];
    }

    let doc_count = documents.len() as f32;
    let average_len = documents.iter().map(Vec::len).sum::<usize>() as f32 / doc_count;

    let mut term_frequencies: Vec<HashMap<&str, usize>> = Vec::with_capacity(documents.len());
    for tokens in documents {
        let mut frequencies: HashMap<&str, usize> = HashMap::new();
        for token in tokens {
            *frequencies.entry(token.as_str()).or_default() += 1;
        }
        term_frequencies.push(frequencies);
    }

    let raw: Vec<f32> = documents
        .iter()
        .enumerate()
        .map(|(doc_idx, tokens)| {
            let doc_len = tokens.len() as f32;
            terms
                .iter()
                .map(|weighted| {
                    let document_frequency = term_frequencies
                        .iter()
                        .filter(|frequencies| frequencies.contains_key(weighted.term.as_str()))
                        .count() as f32;
                    if document_frequency == 0.0 {
                        return 0.0;
                    }
                    let term_frequency = term_frequencies
                        .get(doc_idx)
                        .and_then(|frequencies| frequencies.get(weighted.term.as_str()))
                        .copied()
                        .unwrap_or(0) as f32;
                    if term_frequency == 0.0 {
                        return 0.0;
                    }

                    let idf = (1.0
                        + (doc_count - document_frequency + 0.5) / (document_frequency + 0.5))
                        .ln();
                    let length_norm = 1.0 - BM25_B + BM25_B * doc_len / average_len.max(1.0);
                    let tf_component = term_frequency * (BM25_K1 + 1.0)
                        / (term_frequency + BM25_K1 * length_norm);

                    weighted.weight * idf * tf_component
                })
                .sum()
        })
        .collect();

    min_max_normalize(&raw)
}
