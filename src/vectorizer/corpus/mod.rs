use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;

/// keep document count and per-term document frequency in a thread-safe way
#[derive(Debug, Default)]
pub struct Corpus {
    /// number of documents added
    pub doc_num: AtomicU64,
    /// documents containing each term
    pub term_counts: DashMap<Box<str>, u64, RandomState>,
}

impl Clone for Corpus {
    fn clone(&self) -> Self {
        Self {
            doc_num: AtomicU64::new(self.doc_num.load(Ordering::Acquire)),
            term_counts: self.term_counts.clone(),
        }
    }
}

impl Corpus {
    /// Create a new instance
    pub fn new() -> Self {
        Self {
            doc_num: AtomicU64::new(0),
            term_counts: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Add a document's distinct terms to the corpus
    pub fn add_set<T>(&self, terms: &[T])
    where
        T: AsRef<str>,
    {
        self.doc_num.fetch_add(1, Ordering::Relaxed);
        for term in terms {
            self.term_counts
                .entry(term.as_ref().into())
                .and_modify(|count| *count += 1)
                .or_insert(1);
        }
    }

    /// Get the number of documents in the corpus
    pub fn get_doc_num(&self) -> u64 {
        self.doc_num.load(Ordering::Relaxed)
    }

    /// Get the document frequency of a term
    pub fn get_term_count(&self, term: &str) -> u64 {
        self.term_counts.get(term).map_or(0, |count| *count)
    }

    /// Get the current vocabulary size (number of unique terms)
    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.term_counts.len()
    }

    /// The `limit` terms with the highest document frequency.
    /// Ties break alphabetically so the order does not depend on hashing.
    pub fn top_terms(&self, limit: usize) -> Vec<(Box<str>, u64)> {
        let mut terms: Vec<(Box<str>, u64)> = self
            .term_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        terms.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(limit);
        terms
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;

    #[test]
    fn document_frequency_counts_once_per_set() {
        let corpus = Corpus::new();
        corpus.add_set(&["rust", "fast"]);
        corpus.add_set(&["rust", "safe"]);
        assert_eq!(corpus.get_doc_num(), 2);
        assert_eq!(corpus.get_term_count("rust"), 2);
        assert_eq!(corpus.get_term_count("go"), 0);
        assert_eq!(corpus.vocab_size(), 3);
    }

    #[test]
    fn top_terms_is_deterministic() {
        let corpus = Corpus::new();
        corpus.add_set(&["b", "a", "c"]);
        corpus.add_set(&["c"]);
        let top: Vec<_> = corpus.top_terms(2).into_iter().map(|(t, _)| t.to_string()).collect();
        assert_eq!(top, vec!["c", "a"]);
    }

    #[test]
    fn concurrent_adds() {
        let corpus = Corpus::new();
        (0..1000).into_par_iter().for_each(|_| corpus.add_set(&["x"]));
        assert_eq!(corpus.get_doc_num(), 1000);
        assert_eq!(corpus.get_term_count("x"), 1000);
    }
}
