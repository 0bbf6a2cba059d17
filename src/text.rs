// Text helpers shared by the extractor and the vocabulary tables.
// All matching happens on normalized ASCII text, so byte offsets are char offsets.

use serde::{Deserialize, Serialize};

/// Byte range in normalized text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lowercase, drop everything but `[a-z0-9 $.,%<>=&'-]`, collapse whitespace
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "$.,%<>=&'-".contains(c) {
                c
            } else {
                ' '
            }
        })
        .collect();

    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
}

/// First whole-word occurrence of `phrase` at or after `from`
pub fn find_phrase_from(haystack: &str, phrase: &str, from: usize) -> Option<Span> {
    if phrase.is_empty() || from > haystack.len() {
        return None;
    }

    let bytes = haystack.as_bytes();
    let mut cursor = from;

    while let Some(offset) = haystack[cursor..].find(phrase) {
        let start = cursor + offset;
        let end = start + phrase.len();

        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if left_ok && right_ok {
            return Some(Span::new(start, end));
        }

        cursor = start + 1;
        if cursor >= haystack.len() {
            break;
        }
    }

    None
}

/// First whole-word occurrence of `phrase`
pub fn find_phrase(haystack: &str, phrase: &str) -> Option<Span> {
    find_phrase_from(haystack, phrase, 0)
}

/// Every non-overlapping whole-word occurrence of `phrase`
pub fn find_all_phrases(haystack: &str, phrase: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(span) = find_phrase_from(haystack, phrase, cursor) {
        spans.push(span);
        cursor = span.end;
    }

    spans
}

/// Replace the bytes of `span` with spaces, keeping every other offset stable
pub fn mask(text: &str, span: Span) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..span.start]);
    out.extend(std::iter::repeat(' ').take(span.len()));
    out.push_str(&text[span.end..]);
    out
}

/// Blank every span in one pass over the text
pub fn mask_all<I: IntoIterator<Item = Span>>(text: &str, spans: I) -> String {
    let mut bytes = text.as_bytes().to_vec();
    for span in spans {
        let end = span.end.min(bytes.len());
        let start = span.start.min(end);
        bytes[start..end].fill(b' ');
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
