use std::collections::HashSet;

use ahash::RandomState;

use crate::vectorizer::term::TermFrequency;

/// Lowercased alphanumeric runs of `text`.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(str::to_lowercase)
}

/// Character offsets `[start, end)` of whitespace-separated tokens.
/// Offsets count chars, not bytes, matching fact spans.
pub fn token_spans(text: &str) -> Vec<[usize; 2]> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;
    for c in text.chars() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push([s, pos]);
            }
        } else if start.is_none() {
            start = Some(pos);
        }
        pos += 1;
    }
    if let Some(s) = start {
        spans.push([s, pos]);
    }
    spans
}

/// Tokenizer with a stop-word list
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    stop_words: HashSet<String, RandomState>,
}

impl Analyzer {
    pub fn new<T>(stop_words: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        Self {
            stop_words: stop_words.iter().map(|w| w.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    pub fn tokens(&self, text: &str) -> Vec<String> {
        tokenize(text).filter(|tok| !self.is_stop_word(tok)).collect()
    }

    pub fn term_frequency(&self, text: &str) -> TermFrequency {
        let mut freq = TermFrequency::new();
        freq.add_terms(&self.tokens(text));
        freq
    }
}
