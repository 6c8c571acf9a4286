//! Sentence-boundary chunking: 200–300 word chunks with a 50-word overlap.
//! Chunk offsets are byte offsets into the artifact content and each
//! chunk's text is the exact slice at those offsets, which is what the
//! citation validator later compares quotes against.

use common::{
    storage::types::{artifact::Artifact, chunk::Chunk},
    utils::text::sentence_spans,
};

pub const MIN_CHUNK_WORDS: usize = 200;
pub const MAX_CHUNK_WORDS: usize = 300;
/// Packing target between min and max; a chunk closes once it reaches it.
const TARGET_CHUNK_WORDS: usize = 250;
pub const OVERLAP_WORDS: usize = 50;

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Chunk one artifact's content. Short artifacts produce a single chunk
/// covering everything; long ones are packed sentence by sentence with a
/// sentence-aligned overlap.
pub fn chunk_artifact(artifact: &Artifact) -> Vec<Chunk> {
    let content = &artifact.content;
    if content.trim().is_empty() {
        return Vec::new();
    }

    let sentences = sentence_spans(content);
    let sentence_words: Vec<usize> = sentences
        .iter()
        .map(|&(start, end)| word_count(content.get(start..end).unwrap_or_default()))
        .collect();

    let mut chunks = Vec::new();
    let mut start_sentence = 0usize;

    while start_sentence < sentences.len() {
        let mut words = 0usize;
        let mut end_sentence = start_sentence;

        while end_sentence < sentences.len() {
            let next_words = sentence_words.get(end_sentence).copied().unwrap_or(0);
            if words > 0 && words.saturating_add(next_words) > MAX_CHUNK_WORDS {
                break;
            }
            words = words.saturating_add(next_words);
            end_sentence = end_sentence.saturating_add(1);
            if words >= TARGET_CHUNK_WORDS {
                break;
            }
        }

        let span_start = sentences.get(start_sentence).map_or(0, |&(s, _)| s);
        let span_end = sentences
            .get(end_sentence.saturating_sub(1))
            .map_or(content.len(), |&(_, e)| e);

        if content
            .get(span_start..span_end)
            .is_some_and(|slice| !slice.trim().is_empty())
        {
            chunks.push(Chunk::from_artifact(artifact, span_start, span_end));
        }

        if end_sentence >= sentences.len() {
            break;
        }

        // Back up whole sentences until roughly OVERLAP_WORDS are shared
        // with the chunk just emitted.
        let mut overlap = 0usize;
        let mut next_start = end_sentence;
        while next_start > start_sentence.saturating_add(1) && overlap < OVERLAP_WORDS {
            let previous = sentence_words
                .get(next_start.saturating_sub(1))
                .copied()
                .unwrap_or(0);
            overlap = overlap.saturating_add(previous);
            next_start = next_start.saturating_sub(1);
        }
        start_sentence = next_start.max(start_sentence.saturating_add(1));
    }

    chunks
}
