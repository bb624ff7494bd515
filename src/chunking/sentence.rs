//! Sentence-based chunking with backward sentence overlap.

use super::text::{CharIndex, Span};

/// Greedily packs sentences into chunks of at most `chunk_size` chars.
///
/// When the next sentence would overflow the current chunk, the chunk is
/// flushed and the next one is seeded with the longest run of trailing
/// sentences whose combined span fits in `chunk_overlap`. A single sentence
/// longer than `chunk_size` becomes its own chunk.
pub(crate) fn chunk_sentences(
    index: &CharIndex,
    sentences: &[Span],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<Span> {
    let mut chunks = Vec::new();
    let mut current: Vec<Span> = Vec::new();

    for &sentence in sentences {
        if let Some(first) = current.first() {
            if index.len_of(first.to(&sentence)) > chunk_size {
                chunks.push(covering(&current));

                let mut seed = overlap_tail(index, &current, chunk_overlap);
                // The seed must leave room for the sentence that triggered the flush
                while let Some(head) = seed.first() {
                    if index.len_of(head.to(&sentence)) <= chunk_size {
                        break;
                    }
                    seed.remove(0);
                }
                current = seed;
            }
        }
        current.push(sentence);
    }

    if !current.is_empty() {
        chunks.push(covering(&current));
    }

    chunks
}

/// Trailing sentences of a flushed chunk whose combined span stays within
/// `budget` chars, in reading order.
fn overlap_tail(index: &CharIndex, flushed: &[Span], budget: usize) -> Vec<Span> {
    let Some(last) = flushed.last() else {
        return Vec::new();
    };

    let mut taken = 0;
    for sentence in flushed.iter().rev() {
        if index.len_of(sentence.to(last)) > budget {
            break;
        }
        taken += 1;
    }

    flushed[flushed.len() - taken..].to_vec()
}

fn covering(sentences: &[Span]) -> Span {
    sentences[0].to(&sentences[sentences.len() - 1])
}
