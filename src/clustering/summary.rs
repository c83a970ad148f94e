use std::collections::HashMap;

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::utils::math::vector::math::norm;
use crate::utils::math::vector::SparseVector;
use crate::vectorizer::Vectorizer;

/// A term over-represented in a cluster relative to the whole corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantTerm {
    pub term: String,
    pub score: f64,
    /// Cluster members containing the term
    pub doc_count: u64,
    /// Corpus documents containing the term
    pub bg_count: u64,
}

/// Rank vocabulary terms by how much more often they occur inside the cluster.
///
/// Uses the JLH score `(fg - bg) * (fg / bg)` where `fg` and `bg` are the
/// fractions of cluster and corpus documents containing the term. Terms that
/// are not over-represented are dropped.
///
/// # Arguments
/// * `members` - indices of the cluster's documents in `term_vectors`
/// * `term_vectors` - vocabulary-space vectors of every fitted document
/// * `vectorizer` - the fitted vectorizer, for terms and corpus frequencies
/// * `limit` - number of terms to keep
pub fn significant_terms(
    members: &[usize],
    term_vectors: &[SparseVector],
    vectorizer: &dyn Vectorizer,
    limit: usize,
) -> Vec<SignificantTerm> {
    let corpus_size = vectorizer.document_count() as f64;
    if members.is_empty() || corpus_size == 0.0 {
        return Vec::new();
    }
    let mut in_cluster: HashMap<u32, u64, RandomState> = HashMap::with_hasher(RandomState::new());
    for &m in members {
        for &idx in term_vectors[m].indices() {
            *in_cluster.entry(idx).or_insert(0) += 1;
        }
    }

    let vocabulary = vectorizer.vocabulary();
    let cluster_size = members.len() as f64;
    let mut terms: Vec<SignificantTerm> = in_cluster
        .into_iter()
        .filter_map(|(idx, doc_count)| {
            let idx = idx as usize;
            let bg_count = vectorizer.document_frequency(idx);
            if bg_count == 0 {
                return None;
            }
            let fg = doc_count as f64 / cluster_size;
            let bg = bg_count as f64 / corpus_size;
            if fg <= bg {
                return None;
            }
            Some(SignificantTerm {
                term: vocabulary.get(idx)?.to_string(),
                score: (fg - bg) * (fg / bg),
                doc_count,
                bg_count,
            })
        })
        .collect();

    terms.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.term.cmp(&b.term)));
    terms.truncate(limit);
    terms
}

/// Mean cosine similarity of the members to the centroid.
pub fn intracluster_similarity(members: &[usize], features: &[SparseVector], centroid: &[f64]) -> f64 {
    let centroid_norm = norm(centroid);
    if members.is_empty() || centroid_norm == 0.0 {
        return 0.0;
    }
    let total: f64 = members
        .iter()
        .map(|&m| {
            let point = &features[m];
            let norm = point.norm();
            if norm == 0.0 {
                0.0
            } else {
                point.dot_dense(centroid) / (norm * centroid_norm)
            }
        })
        .sum();
    total / members.len() as f64
}
