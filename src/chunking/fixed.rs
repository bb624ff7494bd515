//! Fixed-size character windows that snap to sentence ends when one is close.

use super::text::{trim_span, CharIndex, Span};

/// Fraction of the window (from its start) after which a sentence terminator
/// may become the boundary.
const SNAP_FROM: f64 = 0.8;

pub(crate) fn chunk_fixed(
    text: &str,
    index: &CharIndex,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Span> {
    let total = index.char_len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < total {
        let mut end = (start + chunk_size).min(total);
        if end < total {
            if let Some(snapped) = snap_to_sentence_end(text, index, start, end, chunk_size) {
                end = snapped;
            }
        }

        if let Some(span) = trim_span(text, index.byte_at(start), index.byte_at(end)) {
            chunks.push(span);
        }

        if end >= total {
            break;
        }

        // Overlap at least as wide as the window would never move forward
        let next = end.saturating_sub(chunk_overlap);
        start = if next <= start { end } else { next };
    }

    chunks
}

/// Looks backward from `end` for `. ! ?` within the last 20% of the window and
/// returns the char position just past it.
fn snap_to_sentence_end(
    text: &str,
    index: &CharIndex,
    start: usize,
    end: usize,
    chunk_size: usize,
) -> Option<usize> {
    let floor = start + (chunk_size as f64 * SNAP_FROM) as usize;
    let window = &text[index.byte_at(floor.min(end))..index.byte_at(end)];

    window
        .char_indices()
        .rev()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(byte, c)| {
            let absolute = index.byte_at(floor.min(end)) + byte + c.len_utf8();
            index.char_at(absolute)
        })
        .filter(|&pos| pos > start)
}
