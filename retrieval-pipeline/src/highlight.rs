//! Highlight generation for surviving candidates: exact token matches,
//! entity matches and fuzzy (edit distance ≤ 2) matches, merged into
//! non-overlapping spans, plus a sentence-aware snippet and an annotated
//! HTML fragment.

use std::collections::BTreeSet;

use common::utils::text::{
    ceil_char_boundary, floor_char_boundary, levenshtein, sentence_spans, tokenize, word_spans,
};
use query_understanding::{EntityType, StructuredQuery};

use crate::{pipeline::RetrievalConfig, MatchType, RetrievalCandidate, TermHighlight};

/// Minimum token length considered for exact highlighting; shorter tokens
/// are function words and only add noise.
const MIN_EXACT_TERM_LEN: usize = 3;

fn priority(match_type: MatchType) -> u8 {
    match match_type {
        MatchType::Exact => 0,
        MatchType::Entity => 1,
        MatchType::Fuzzy => 2,
    }
}

fn push_term_occurrences(
    content_lower: &str,
    term: &str,
    match_type: MatchType,
    out: &mut Vec<TermHighlight>,
) {
    if term.is_empty() {
        return;
    }
    let mut search_from = 0usize;
    while let Some(found) = content_lower
        .get(search_from..)
        .and_then(|rest| rest.find(term))
    {
        let start = search_from.saturating_add(found);
        let end = start.saturating_add(term.len());

        let boundary_before = start == 0
            || content_lower[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
        let boundary_after = content_lower[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if boundary_before && boundary_after {
            out.push(TermHighlight {
                start,
                end,
                term: term.to_string(),
                match_type,
            });
        }
        search_from = end;
    }
}

/// All matches for one candidate, merged so spans never overlap. On
/// overlap, exact beats entity beats fuzzy.
pub fn find_highlights(
    query: &StructuredQuery,
    content: &str,
    config: &RetrievalConfig,
) -> Vec<TermHighlight> {
    let content_lower = content.to_lowercase();
    let mut matches: Vec<TermHighlight> = Vec::new();

    let query_tokens: BTreeSet<String> = tokenize(&query.original_query)
        .into_iter()
        .filter(|token| token.chars().count() >= MIN_EXACT_TERM_LEN)
        .collect();
    for token in &query_tokens {
        push_term_occurrences(&content_lower, token, MatchType::Exact, &mut matches);
    }

    for entity in &query.entities {
        if entity.entity_type == EntityType::Date {
            continue;
        }
        let surface = entity.text.to_lowercase();
        push_term_occurrences(&content_lower, &surface, MatchType::Entity, &mut matches);
        if entity.normalized != surface {
            push_term_occurrences(
                &content_lower,
                &entity.normalized,
                MatchType::Entity,
                &mut matches,
            );
        }
    }

    // Fuzzy pass over content words for longer query tokens.
    for (start, end) in word_spans(&content_lower) {
        let word: String = content_lower
            .get(start..end)
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if word.chars().count() < config.fuzzy_min_term_len {
            continue;
        }
        for token in &query_tokens {
            if token.chars().count() < config.fuzzy_min_term_len || *token == word {
                continue;
            }
            if levenshtein(token, &word) <= config.fuzzy_max_distance {
                matches.push(TermHighlight {
                    start,
                    end,
                    term: token.clone(),
                    match_type: MatchType::Fuzzy,
                });
                break;
            }
        }
    }

    merge_overlapping(matches)
}

/// Union overlapping spans; the highest-priority constituent names the
/// merged span.
fn merge_overlapping(mut matches: Vec<TermHighlight>) -> Vec<TermHighlight> {
    matches.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| priority(a.match_type).cmp(&priority(b.match_type)))
    });

    let mut merged: Vec<TermHighlight> = Vec::new();
    for current in matches {
        match merged.last_mut() {
            Some(last) if current.start < last.end => {
                last.end = last.end.max(current.end);
                if priority(current.match_type) < priority(last.match_type) {
                    last.match_type = current.match_type;
                    last.term = current.term;
                }
            }
            _ => merged.push(current),
        }
    }
    merged
}

/// A window-sized snippet centered on the first highlight, grown to whole
/// sentences when they fit.
pub fn make_snippet(content: &str, highlights: &[TermHighlight], window: usize) -> String {
    if content.len() <= window {
        return content.trim().to_string();
    }

    let focus = highlights.first().map_or(0, |h| h.start);
    let half = window / 2;
    let raw_start = focus.saturating_sub(half);
    let raw_end = focus.saturating_add(half).min(content.len());

    // Prefer whole sentences covering the focus window.
    let sentences = sentence_spans(content);
    let mut start = raw_start;
    let mut end = raw_end;
    for &(s_start, s_end) in &sentences {
        if s_start <= focus && focus < s_end {
            start = s_start;
            end = s_end;
            break;
        }
    }
    if end.saturating_sub(start) > window {
        start = raw_start;
        end = raw_end;
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

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn mark_class(match_type: MatchType) -> &'static str {
    match match_type {
        MatchType::Exact => "match-exact",
        MatchType::Entity => "match-entity",
        MatchType::Fuzzy => "match-fuzzy",
    }
}

/// HTML fragment of `content` with every highlight wrapped in a `<mark>`.
pub fn annotate_html(content: &str, highlights: &[TermHighlight]) -> String {
    let mut html = String::with_capacity(content.len().saturating_add(highlights.len() * 32));
    let mut cursor = 0usize;
    for highlight in highlights {
        if highlight.start < cursor || highlight.end > content.len() {
            continue;
        }
        html.push_str(&escape_html(
            content.get(cursor..highlight.start).unwrap_or_default(),
        ));
        html.push_str(&format!(
            "<mark class=\"{}\">{}</mark>",
            mark_class(highlight.match_type),
            escape_html(content.get(highlight.start..highlight.end).unwrap_or_default())
        ));
        cursor = highlight.end;
    }
    html.push_str(&escape_html(content.get(cursor..).unwrap_or_default()));
    html
}

/// Fill snippet, highlights and HTML on every candidate.
pub fn highlight_candidates(
    query: &StructuredQuery,
    candidates: &mut [RetrievalCandidate],
    config: &RetrievalConfig,
) {
    for candidate in candidates.iter_mut() {
        let highlights = find_highlights(query, &candidate.chunk.content, config);
        candidate.snippet = make_snippet(&candidate.chunk.content, &highlights, config.snippet_window);
        candidate.highlighted_html = annotate_html(&candidate.chunk.content, &highlights);
        candidate.term_highlights = highlights;
    }
}
