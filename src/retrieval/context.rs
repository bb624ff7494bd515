//! Token-bounded context assembly

use super::{Citation, RetrievalContext, SearchResult};
use crate::embedding::estimate_tokens;
use tracing::debug;

const CHUNK_SEPARATOR: &str = "\n\n";

/// Build a context block from ranked candidates
///
/// Candidates are grouped by document (documents ordered by their best
/// candidate) and each group is put back into reading order by
/// `chunk_index`. Chunks are then appended until the next one would push the
/// estimated token count past `max_tokens`; assembly stops there. A chunk id
/// is never placed twice.
pub fn assemble_context(
    query: &str,
    candidates: Vec<SearchResult>,
    max_tokens: usize,
    excerpt_chars: usize,
) -> RetrievalContext {
    let mut groups: Vec<(String, Vec<SearchResult>)> = Vec::new();
    for candidate in super::deduplicate_results(candidates) {
        match groups.iter_mut().find(|(doc, _)| *doc == candidate.document_id) {
            Some((_, members)) => members.push(candidate),
            None => groups.push((candidate.document_id.clone(), vec![candidate])),
        }
    }

    let mut ordered = Vec::new();
    for (_, mut members) in groups {
        members.sort_by_key(|m| m.chunk_index);
        ordered.extend(members);
    }

    let mut parts: Vec<&str> = Vec::new();
    let mut chunks = Vec::new();
    let mut citations = Vec::new();
    let mut total_tokens = 0usize;

    for chunk in &ordered {
        let tokens = estimate_tokens(&chunk.content);
        if total_tokens.saturating_add(tokens) > max_tokens {
            debug!(
                "Context budget reached at {} of {} tokens; {} chunks placed",
                total_tokens,
                max_tokens,
                chunks.len()
            );
            break;
        }
        total_tokens += tokens;
        parts.push(chunk.content.as_str());
        citations.push(citation_for(chunk, excerpt_chars));
        chunks.push(chunk.clone());
    }

    RetrievalContext {
        query: query.to_string(),
        context_text: parts.join(CHUNK_SEPARATOR),
        chunks,
        citations,
        total_tokens,
        strategy_tag: "hybrid".to_string(),
    }
}

fn citation_for(chunk: &SearchResult, excerpt_chars: usize) -> Citation {
    Citation {
        document_id: chunk.document_id.clone(),
        document_title: chunk
            .metadata
            .document_title
            .clone()
            .unwrap_or_else(|| chunk.document_id.clone()),
        chunk_id: chunk.chunk_id.clone(),
        chunk_index: chunk.chunk_index,
        relevance_score: chunk.score,
        excerpt: excerpt(&chunk.content, excerpt_chars),
    }
}

/// First `max_chars` characters of `text`, cut back to a word boundary
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len());
    let head = &text[..cut];

    // Only back off if the cut landed inside a word
    let mid_word = text[cut..].starts_with(|c: char| !c.is_whitespace());
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if mid_word => &head[..space],
        _ => head,
    };
    head.trim_end().to_string()
}
