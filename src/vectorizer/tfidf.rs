use indexmap::IndexMap;

use crate::utils::math::vector::SparseVector;
use crate::vectorizer::{corpus::Corpus, term::TermFrequency};

/// Term weighting strategy of a [`TextVectorizer`](super::TextVectorizer).
pub trait TFIDFEngine: Send + Sync {
    /// IDFベクトルを生成するメソッド
    /// # Arguments
    /// * `corpus` - コーパス
    /// * `vocabulary` - term -> document frequency, in dimension order
    /// # Returns
    /// * `Vec<f64>` - IDFベクトル
    fn idf_vec(corpus: &Corpus, vocabulary: &IndexMap<Box<str>, u64>) -> Vec<f64>;

    /// Raw term weights of one document over the vocabulary dimensions
    fn tf_vec(freq: &TermFrequency, vocabulary: &IndexMap<Box<str>, u64>) -> SparseVector {
        let pairs = freq
            .iter()
            .filter_map(|(term, count)| vocabulary.get_index_of(term).map(|idx| (idx as u32, count as f64)))
            .collect();
        SparseVector::from_pairs(pairs)
    }
}

/// Smoothed TF-IDF: idf = ln((1 + n) / (1 + df)) + 1
#[derive(Debug)]
pub struct DefaultTFIDFEngine;

impl TFIDFEngine for DefaultTFIDFEngine {
    fn idf_vec(corpus: &Corpus, vocabulary: &IndexMap<Box<str>, u64>) -> Vec<f64> {
        let doc_num = corpus.get_doc_num() as f64;
        vocabulary
            .keys()
            .map(|term| {
                let doc_freq = corpus.get_term_count(term) as f64;
                ((1.0 + doc_num) / (1.0 + doc_freq)).ln() + 1.0
            })
            .collect()
    }
}

/// Plain term counts, every dimension weighted 1
#[derive(Debug)]
pub struct CountEngine;

impl TFIDFEngine for CountEngine {
    fn idf_vec(_corpus: &Corpus, vocabulary: &IndexMap<Box<str>, u64>) -> Vec<f64> {
        vec![1.0; vocabulary.len()]
    }
}
