//! Paragraph-based chunking: blank-line separated blocks, with oversized
//! paragraphs broken down by sentence.

use super::sentence::chunk_sentences;
use super::text::{split_paragraphs, split_sentences, CharIndex, Span};

pub(crate) fn chunk_paragraphs(text: &str, index: &CharIndex, chunk_size: usize) -> Vec<Span> {
    let mut chunks = Vec::new();

    for paragraph in split_paragraphs(text) {
        if index.len_of(paragraph) <= chunk_size {
            chunks.push(paragraph);
            continue;
        }

        // Oversized paragraphs fall back to sentence packing without overlap
        let sentences = split_sentences(text, paragraph);
        chunks.extend(chunk_sentences(index, &sentences, chunk_size, 0));
    }

    chunks
}
