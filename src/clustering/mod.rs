//! Document clustering.
//!
//! [`ClusteringEngine`] turns a batch of texts into cluster drafts,
//! [`store::ClusterStore`] keeps the user-editable result and
//! [`service::ClusteringService`] wires both to a document source and a job
//! queue.

pub mod kmeans;
pub mod service;
pub mod store;
pub mod summary;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::source::DocumentId;
use crate::utils::math::vector::SparseVector;
use crate::vectorizer::{embedding::Embedding, Vectorizer, VectorizerParams};

use self::kmeans::{kmeans, KMeansParams};
use self::store::ClusterDraft;
use self::summary::{intracluster_similarity, significant_terms};

/// Vectorize-then-partition pipeline for one clustering run.
pub struct ClusteringEngine<'a> {
    vectorizer: VectorizerParams,
    embedding: Option<&'a dyn Embedding>,
    num_clusters: usize,
    config: &'a EngineConfig,
}

impl<'a> ClusteringEngine<'a> {
    pub fn new(vectorizer: VectorizerParams, num_clusters: usize, config: &'a EngineConfig) -> Self {
        Self {
            vectorizer,
            embedding: None,
            num_clusters: num_clusters.max(1),
            config,
        }
    }

    /// Cluster on averaged word vectors instead of term weights.
    pub fn with_embedding(mut self, embedding: &'a dyn Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Embedding features per document; documents without a known token get
    /// an empty vector.
    fn embedding_features(&self, vectorizer: &dyn Vectorizer, texts: &[String], embedding: &dyn Embedding) -> Vec<SparseVector> {
        texts
            .iter()
            .map(|text| {
                let tokens = vectorizer.tokens(text);
                vectorizer
                    .transform_with_embedding(&tokens, embedding)
                    .map(|dense| SparseVector::from_dense(&dense).normalized())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Partition `documents` into at most `num_clusters` non-empty groups.
    ///
    /// # Arguments
    /// * `documents` - `(id, text)` pairs in scroll order
    ///
    /// Fewer documents than clusters gives one cluster per document; no
    /// documents gives no clusters.
    pub fn cluster(&self, documents: &[(DocumentId, String)]) -> Vec<ClusterDraft> {
        if documents.is_empty() {
            info!("no documents to cluster");
            return Vec::new();
        }
        let texts: Vec<String> = documents.iter().map(|(_, text)| text.clone()).collect();
        let mut vectorizer = self.vectorizer.build();
        let term_vectors = vectorizer.fit_transform(&texts);

        let (features, dim) = match self.embedding {
            Some(embedding) => (
                self.embedding_features(vectorizer.as_ref(), &texts, embedding),
                embedding.dimensions(),
            ),
            None => (term_vectors.clone(), vectorizer.vocabulary().len()),
        };

        let (groups, centroids): (Vec<Vec<usize>>, Vec<Vec<f64>>) = if documents.len() <= self.num_clusters {
            debug!(
                documents = documents.len(),
                requested = self.num_clusters,
                "fewer documents than clusters; one cluster per document"
            );
            (0..documents.len())
                .map(|i| {
                    let mut centroid = vec![0.0; dim];
                    features[i].add_to_dense(&mut centroid);
                    (vec![i], centroid)
                })
                .unzip()
        } else {
            let params = KMeansParams {
                num_clusters: self.num_clusters,
                max_iterations: self.config.kmeans_max_iterations,
                tolerance: self.config.kmeans_tolerance,
                seed: self.config.random_seed,
            };
            let result = kmeans(&features, dim, &params);
            let mut groups = vec![Vec::new(); result.centroids.len()];
            for (doc, &cluster) in result.assignments.iter().enumerate() {
                groups[cluster].push(doc);
            }
            info!(
                documents = documents.len(),
                clusters = groups.len(),
                iterations = result.iterations,
                inertia = result.inertia,
                "k-means finished"
            );
            (groups, result.centroids)
        };

        groups
            .into_iter()
            .zip(centroids)
            .filter(|(members, _)| !members.is_empty())
            .map(|(members, centroid)| ClusterDraft {
                document_ids: members.iter().map(|&m| documents[m].0.clone()).collect(),
                significant_terms: significant_terms(
                    &members,
                    &term_vectors,
                    vectorizer.as_ref(),
                    self.config.significant_terms,
                ),
                intracluster_similarity: intracluster_similarity(&members, &features, &centroid),
            })
            .collect()
    }
}
