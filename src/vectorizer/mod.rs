pub mod analyzer;
pub mod corpus;
pub mod embedding;
pub mod term;
pub mod tfidf;

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ValidationError;
use crate::utils::math::vector::SparseVector;
use crate::vectorizer::{
    analyzer::Analyzer,
    corpus::Corpus,
    embedding::{average_embedding, Embedding},
    term::TermFrequency,
    tfidf::{CountEngine, DefaultTFIDFEngine, TFIDFEngine},
};

/// Turns raw text into feature vectors.
pub trait Vectorizer: Send + Sync {
    /// Learn the vocabulary from `texts` and return one unit-length vector per text.
    fn fit_transform(&mut self, texts: &[String]) -> Vec<SparseVector>;

    /// Terms in dimension order.
    fn vocabulary(&self) -> Vec<&str>;

    /// Number of fitted documents containing the term at dimension `index`.
    fn document_frequency(&self, index: usize) -> u64;

    /// Number of fitted documents.
    fn document_count(&self) -> u64;

    /// Tokens as the vectorizer sees them (stop words removed).
    fn tokens(&self, text: &str) -> Vec<String>;

    /// Averaged embedding of `tokens`.
    fn transform_with_embedding(&self, tokens: &[String], embedding: &dyn Embedding) -> Option<Vec<f64>> {
        average_embedding(tokens, embedding)
    }
}

/// Vectorizer backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorizerKind {
    #[serde(rename = "TfIdf Vectorizer")]
    TfIdf,
    #[serde(rename = "Count Vectorizer")]
    Count,
}

impl VectorizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorizerKind::TfIdf => "TfIdf Vectorizer",
            VectorizerKind::Count => "Count Vectorizer",
        }
    }
}

impl fmt::Display for VectorizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorizerKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tfidf vectorizer" | "tfidf" | "tf-idf" => Ok(VectorizerKind::TfIdf),
            "count vectorizer" | "count" => Ok(VectorizerKind::Count),
            _ => Err(ValidationError::UnknownVectorizer(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerParams {
    pub kind: VectorizerKind,
    pub stop_words: Vec<String>,
    /// Vocabulary cap, most frequent terms first
    pub max_features: usize,
}

impl VectorizerParams {
    pub fn new(kind: VectorizerKind) -> Self {
        Self {
            kind,
            stop_words: Vec::new(),
            max_features: 5_000,
        }
    }

    /// Construct the backend for `kind`.
    pub fn build(&self) -> Box<dyn Vectorizer> {
        let analyzer = Analyzer::new(&self.stop_words);
        match self.kind {
            VectorizerKind::TfIdf => Box::new(TextVectorizer::<DefaultTFIDFEngine>::new(analyzer, self.max_features)),
            VectorizerKind::Count => Box::new(TextVectorizer::<CountEngine>::new(analyzer, self.max_features)),
        }
    }
}

/// Bag-of-words vectorizer
/// `E` decides how term counts are weighted.
#[derive(Debug)]
pub struct TextVectorizer<E = DefaultTFIDFEngine>
where
    E: TFIDFEngine,
{
    analyzer: Analyzer,
    max_features: usize,
    /// Corpus reference
    pub corpus_ref: Arc<Corpus>,
    /// term -> document frequency, in dimension order
    vocabulary: IndexMap<Box<str>, u64>,
    /// IDF Vector
    idf_cache: Vec<f64>,
    _marker: PhantomData<E>,
}

impl<E> TextVectorizer<E>
where
    E: TFIDFEngine,
{
    pub fn new(analyzer: Analyzer, max_features: usize) -> Self {
        Self {
            analyzer,
            max_features: max_features.max(1),
            corpus_ref: Arc::new(Corpus::new()),
            vocabulary: IndexMap::new(),
            idf_cache: Vec::new(),
            _marker: PhantomData,
        }
    }

    fn weigh(&self, freq: &TermFrequency) -> SparseVector {
        let tf = E::tf_vec(freq, &self.vocabulary);
        let pairs = tf
            .iter()
            .map(|(idx, val)| (idx as u32, val * self.idf_cache[idx]))
            .collect();
        SparseVector::from_pairs(pairs).normalized()
    }
}

impl<E> Vectorizer for TextVectorizer<E>
where
    E: TFIDFEngine,
{
    fn fit_transform(&mut self, texts: &[String]) -> Vec<SparseVector> {
        let corpus = Arc::new(Corpus::new());
        let freqs: Vec<TermFrequency> = texts
            .par_iter()
            .map(|text| {
                let freq = self.analyzer.term_frequency(text);
                corpus.add_set(&freq.term_set_ref_str());
                freq
            })
            .collect();

        self.vocabulary = corpus.top_terms(self.max_features).into_iter().collect();
        self.idf_cache = E::idf_vec(&corpus, &self.vocabulary);
        self.corpus_ref = corpus;
        debug!(
            documents = texts.len(),
            corpus_terms = self.corpus_ref.vocab_size(),
            vocabulary = self.vocabulary.len(),
            "vectorizer fitted"
        );

        freqs.par_iter().map(|freq| self.weigh(freq)).collect()
    }

    fn vocabulary(&self) -> Vec<&str> {
        self.vocabulary.keys().map(|t| t.as_ref()).collect()
    }

    fn document_frequency(&self, index: usize) -> u64 {
        self.vocabulary.get_index(index).map_or(0, |(_, df)| *df)
    }

    fn document_count(&self) -> u64 {
        self.corpus_ref.get_doc_num()
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        self.analyzer.tokens(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Vec<String> {
        vec![
            "the cat sat on the mat".to_string(),
            "the dog sat on the log".to_string(),
            "cats and dogs".to_string(),
        ]
    }

    #[test]
    fn kind_parses_closed_set_of_names() {
        assert_eq!("TfIdf Vectorizer".parse::<VectorizerKind>().unwrap(), VectorizerKind::TfIdf);
        assert_eq!("count".parse::<VectorizerKind>().unwrap(), VectorizerKind::Count);
        assert_eq!(
            "Hashing Vectorizer".parse::<VectorizerKind>().unwrap_err(),
            ValidationError::UnknownVectorizer("Hashing Vectorizer".to_string())
        );
    }

    #[test]
    fn fit_transform_returns_unit_vectors() {
        let mut params = VectorizerParams::new(VectorizerKind::TfIdf);
        params.stop_words = vec!["the".to_string(), "on".to_string()];
        let mut vectorizer = params.build();
        let vectors = vectorizer.fit_transform(&texts());
        assert_eq!(vectors.len(), 3);
        for v in &vectors {
            assert!((v.norm() - 1.0).abs() < 1e-9);
        }
        assert!(!vectorizer.vocabulary().contains(&"the"));
        assert_eq!(vectorizer.document_count(), 3);
        let sat = vectorizer.vocabulary().iter().position(|t| *t == "sat").unwrap();
        assert_eq!(vectorizer.document_frequency(sat), 2);
    }

    #[test]
    fn max_features_caps_vocabulary() {
        let mut params = VectorizerParams::new(VectorizerKind::Count);
        params.max_features = 2;
        let mut vectorizer = params.build();
        vectorizer.fit_transform(&texts());
        let vocabulary = vectorizer.vocabulary();
        assert_eq!(vocabulary.len(), 2);
        // df=2 terms first, alphabetical among equals
        assert_eq!(vocabulary, vec!["on", "sat"]);
    }

    #[test]
    fn empty_text_gives_empty_vector() {
        let mut vectorizer = VectorizerParams::new(VectorizerKind::TfIdf).build();
        let vectors = vectorizer.fit_transform(&["".to_string(), "word".to_string()]);
        assert!(vectors[0].is_empty());
        assert_eq!(vectors[1].nnz(), 1);
    }
}
