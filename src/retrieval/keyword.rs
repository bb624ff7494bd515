//! Term-overlap rescoring over the vector candidate set

use super::SearchResult;
use std::collections::HashSet;

/// Lowercased whitespace tokens with surrounding punctuation trimmed
pub fn query_terms(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Fraction of distinct query terms present in each candidate
///
/// Candidates sharing no term with the query are left out of the returned
/// list. Order follows `candidates`.
pub fn keyword_scores(query: &str, candidates: &[SearchResult]) -> Vec<(String, f32)> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    candidates
        .iter()
        .filter_map(|candidate| {
            let chunk_terms = query_terms(&candidate.content);
            let shared = terms.iter().filter(|t| chunk_terms.contains(*t)).count();
            (shared > 0).then(|| {
                (
                    candidate.chunk_id.clone(),
                    shared as f32 / terms.len() as f32,
                )
            })
        })
        .collect()
}
