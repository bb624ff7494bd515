//! Text primitives shared by the chunking strategies: byte spans, sentence and
//! paragraph detection, and byte/char offset conversion.

use once_cell::sync::Lazy;
use regex::Regex;

// `. ! ?` runs followed by whitespace or end of input.
static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("Invalid sentence regex pattern"));

// A blank line, possibly containing spaces or tabs.
static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("Invalid paragraph regex pattern"));

/// Half-open byte range into the source text. Both ends sit on char boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    /// Span covering `self` through `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span::new(self.start, other.end)
    }
}

/// Shrinks `[start, end)` so it neither starts nor ends with whitespace.
/// Returns `None` when nothing but whitespace remains.
pub(crate) fn trim_span(text: &str, start: usize, end: usize) -> Option<Span> {
    let raw = &text[start..end];
    let leading = raw.len() - raw.trim_start().len();
    let trailing = raw.len() - raw.trim_end().len();
    let (start, end) = (start + leading, end - trailing);
    (start < end).then(|| Span::new(start, end))
}

/// Splits `text[region]` into sentence spans (absolute byte offsets).
///
/// Text without terminal punctuation is returned as a single sentence.
pub(crate) fn split_sentences(text: &str, region: Span) -> Vec<Span> {
    let slice = region.slice(text);
    let mut sentences = Vec::new();
    let mut last_end = 0;

    for mat in SENTENCE_BOUNDARY.find_iter(slice) {
        // Keep the punctuation, drop the trailing whitespace
        let punct_end = mat.start() + mat.as_str().trim_end().len();
        if let Some(span) = trim_span(text, region.start + last_end, region.start + punct_end) {
            sentences.push(span);
        }
        last_end = mat.end();
    }

    if last_end < slice.len() {
        if let Some(span) = trim_span(text, region.start + last_end, region.end) {
            sentences.push(span);
        }
    }

    sentences
}

/// Splits text on blank lines into trimmed paragraph spans.
pub(crate) fn split_paragraphs(text: &str) -> Vec<Span> {
    let mut paragraphs = Vec::new();
    let mut last_end = 0;

    for mat in PARAGRAPH_BREAK.find_iter(text) {
        if let Some(span) = trim_span(text, last_end, mat.start()) {
            paragraphs.push(span);
        }
        last_end = mat.end();
    }

    if let Some(span) = trim_span(text, last_end, text.len()) {
        paragraphs.push(span);
    }

    paragraphs
}

/// Number of sentences in a piece of text (at least 1 for non-blank text).
pub(crate) fn sentence_count(text: &str) -> usize {
    split_sentences(text, Span::new(0, text.len())).len()
}

/// Maps between byte offsets and char positions of one text.
pub(crate) struct CharIndex {
    /// Byte offset of every char, followed by `text.len()`.
    offsets: Vec<usize>,
}

impl CharIndex {
    pub fn new(text: &str) -> Self {
        let mut offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        offsets.push(text.len());
        Self { offsets }
    }

    /// Total number of chars.
    pub fn char_len(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Byte offset of the char at `pos` (`pos == char_len()` maps to the end).
    pub fn byte_at(&self, pos: usize) -> usize {
        self.offsets[pos.min(self.char_len())]
    }

    /// Char position of a byte offset lying on a char boundary.
    pub fn char_at(&self, byte: usize) -> usize {
        self.offsets.partition_point(|&b| b < byte)
    }

    /// Length of a span in chars.
    pub fn len_of(&self, span: Span) -> usize {
        self.char_at(span.end) - self.char_at(span.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_keeps_punctuation() {
        let text = "First one. Second one! Third?";
        let spans = split_sentences(text, Span::new(0, text.len()));
        let sentences: Vec<&str> = spans.iter().map(|s| s.slice(text)).collect();
        assert_eq!(sentences, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn test_split_sentences_trailing_fragment() {
        let text = "Done. And then some";
        let spans = split_sentences(text, Span::new(0, text.len()));
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].slice(text), "And then some");
    }

    #[test]
    fn test_split_sentences_in_region() {
        let text = "Ignore me. Keep this. And this.";
        let region = Span::new(11, text.len());
        let spans = split_sentences(text, region);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].slice(text), "Keep this.");
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "Para one.\nStill one.\n\n  \nPara two.\n\nPara three.";
        let spans = split_paragraphs(text);
        let paragraphs: Vec<&str> = spans.iter().map(|s| s.slice(text)).collect();
        assert_eq!(
            paragraphs,
            vec!["Para one.\nStill one.", "Para two.", "Para three."]
        );
    }

    #[test]
    fn test_char_index_multibyte() {
        let text = "héllo wörld";
        let index = CharIndex::new(text);
        assert_eq!(index.char_len(), 11);
        assert_eq!(index.byte_at(2), 3);
        assert_eq!(index.char_at(3), 2);
        assert_eq!(index.len_of(Span::new(0, text.len())), 11);
    }

    #[test]
    fn test_trim_span_whitespace_only() {
        assert!(trim_span("   ", 0, 3).is_none());
        assert_eq!(trim_span("  ab ", 0, 5), Some(Span::new(2, 4)));
    }
}
