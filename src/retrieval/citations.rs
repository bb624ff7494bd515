//! Match citations against a generated answer

use super::Citation;
use std::collections::HashSet;

/// Words taken from the start of each excerpt
const EXCERPT_WORDS: usize = 20;

/// Shared words needed before a citation counts as used
const MIN_SHARED_WORDS: usize = 3;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

/// Citations whose excerpt shares at least three of its first twenty words
/// with `answer` (case-insensitive). Input order is kept.
///
/// This is a heuristic: short excerpts and answers that paraphrase heavily
/// can slip through either way.
pub fn extract_citations(answer: &str, citations: &[Citation]) -> Vec<Citation> {
    let answer_words: HashSet<String> = words(answer).collect();
    if answer_words.is_empty() {
        return Vec::new();
    }

    citations
        .iter()
        .filter(|citation| {
            let head: HashSet<String> = words(&citation.excerpt).take(EXCERPT_WORDS).collect();
            head.iter().filter(|w| answer_words.contains(*w)).count() >= MIN_SHARED_WORDS
        })
        .cloned()
        .collect()
}
