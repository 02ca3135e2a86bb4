//! Paragraph segmenter: raw article text in, ordered speakable segments out.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Paragraphs longer than this are split at sentence ends.
pub const MAX_SEGMENT_CHARS: usize = 1_200;

#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    pub max_chars: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self { max_chars: MAX_SEGMENT_CHARS }
    }
}

impl Segmenter {
    /// Splits on blank lines; whitespace inside a paragraph collapses to
    /// single spaces and empty paragraphs are dropped.
    pub fn segment(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();

        for line in text.lines() {
            if line.trim().is_empty() {
                self.flush(&mut paragraph, &mut out);
            } else {
                paragraph.push(line);
            }
        }
        self.flush(&mut paragraph, &mut out);
        out
    }

    fn flush(&self, lines: &mut Vec<&str>, out: &mut Vec<String>) {
        if lines.is_empty() {
            return;
        }
        let joined = lines
            .iter()
            .flat_map(|l| l.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");
        lines.clear();

        if joined.chars().count() <= self.max_chars {
            out.push(joined);
        } else {
            out.extend(self.split_sentences(&joined));
        }
    }

    /// Greedily packs whole sentences up to `max_chars`. A single sentence
    /// longer than that is kept whole.
    fn split_sentences(&self, paragraph: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in sentences(paragraph) {
            let fits = current.chars().count() + 1 + sentence.chars().count() <= self.max_chars;
            if !current.is_empty() && !fits {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut chars = rest.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|(_, n)| n.is_whitespace()) {
                let end = i + c.len_utf8();
                let sentence = &rest[..end];
                rest = rest[end..].trim_start();
                return Some(sentence);
            }
        }
        let sentence = rest;
        rest = "";
        Some(sentence)
    })
}

pub fn segment(text: &str) -> Vec<String> {
    Segmenter::default().segment(text)
}

/// Re-segmentation key: a 64-bit hash over the segment texts, in order.
pub fn content_key(segments: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    segments.len().hash(&mut hasher);
    for s in segments {
        s.hash(&mut hasher);
    }
    hasher.finish()
}
