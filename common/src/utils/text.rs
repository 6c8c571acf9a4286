//! Small text helpers shared by the chunker, the lexical scorer and the
//! highlighter. All offsets are byte offsets into the original string and
//! always fall on UTF-8 character boundaries.

/// Lowercased alphanumeric tokens of `text`, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Byte spans `[start, end)` of whitespace-separated words.
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(word_start) = start.take() {
                spans.push((word_start, idx));
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(word_start) = start {
        spans.push((word_start, text.len()));
    }

    spans
}

/// Byte spans `[start, end)` of sentences. A sentence ends after `.`, `!`,
/// `?` or a newline; trailing whitespace belongs to the preceding sentence
/// so the spans partition the text.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut sentence_start = 0usize;
    let mut terminator_seen = false;

    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            terminator_seen = true;
        } else if terminator_seen && !ch.is_whitespace() {
            spans.push((sentence_start, idx));
            sentence_start = idx;
            terminator_seen = false;
        }
    }
    if sentence_start < text.len() {
        spans.push((sentence_start, text.len()));
    }

    spans
}

/// Largest byte offset `<= target` that falls on a character boundary.
pub fn floor_char_boundary(text: &str, target: usize) -> usize {
    if target >= text.len() {
        return text.len();
    }
    let mut idx = target;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx = idx.saturating_sub(1);
    }
    idx
}

/// Smallest byte offset `>= target` that falls on a character boundary.
pub fn ceil_char_boundary(text: &str, target: usize) -> usize {
    if target >= text.len() {
        return text.len();
    }
    let mut idx = target;
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx = idx.saturating_add(1);
    }
    idx
}

/// Classic two-row Levenshtein distance over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len().saturating_add(1)];

    for (i, a_ch) in a_chars.iter().enumerate() {
        current[0] = i.saturating_add(1);
        for (j, b_ch) in b_chars.iter().enumerate() {
            let substitution_cost = usize::from(a_ch != b_ch);
            let deletion = previous[j.saturating_add(1)].saturating_add(1);
            let insertion = current[j].saturating_add(1);
            let substitution = previous[j].saturating_add(substitution_cost);
            current[j.saturating_add(1)] = deletion.min(insertion).min(substitution);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}
