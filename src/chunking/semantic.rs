//! Topic-aware grouping of consecutive sentences by lexical similarity.

use super::text::{CharIndex, Span};
use std::collections::HashSet;

/// Similarity above which a sentence is considered on-topic for the group.
const SIMILARITY_THRESHOLD: f64 = 0.2;

/// Only alphabetic words longer than this carry topical signal.
const MIN_WORD_LEN: usize = 4;

/// Openers that tie a sentence to the one before it.
const CONTINUATION_MARKERS: &[&str] = &[
    "this", "that", "these", "those", "it", "its", "they", "them", "their", "he", "she", "his",
    "her", "however", "therefore", "moreover", "furthermore", "additionally", "also", "and",
    "but", "or", "so", "thus", "hence", "consequently", "meanwhile", "similarly", "likewise",
    "then",
];

/// Groups sentences while they stay on topic.
///
/// A sentence joins the current group when its word-set Jaccard similarity to
/// the group exceeds 0.2, when it opens with a continuation marker, or while
/// the group is still shorter than `chunk_size`. Otherwise it opens a new
/// group.
pub(crate) fn chunk_semantic(
    text: &str,
    index: &CharIndex,
    sentences: &[Span],
    chunk_size: usize,
) -> Vec<Span> {
    let mut chunks = Vec::new();
    let mut group: Option<(Span, HashSet<String>)> = None;

    for &sentence in sentences {
        let sentence_text = sentence.slice(text);
        let words = significant_words(sentence_text);

        match group.as_mut() {
            None => group = Some((sentence, words)),
            Some((span, group_words)) => {
                let joins = jaccard(group_words, &words) > SIMILARITY_THRESHOLD
                    || opens_with_continuation(sentence_text)
                    || index.len_of(*span) < chunk_size;

                if joins {
                    *span = span.to(&sentence);
                    group_words.extend(words);
                } else {
                    chunks.push(*span);
                    group = Some((sentence, words));
                }
            }
        }
    }

    if let Some((span, _)) = group {
        chunks.push(span);
    }

    chunks
}

/// Lowercased alphabetic words longer than four characters.
fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() > MIN_WORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn opens_with_continuation(sentence: &str) -> bool {
    sentence
        .split_whitespace()
        .next()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphabetic())
                .to_lowercase()
        })
        .is_some_and(|w| CONTINUATION_MARKERS.contains(&w.as_str()))
}
