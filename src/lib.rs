/// This crate is a document clustering and classification evaluation engine.
pub mod clustering;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod jobs;
pub mod source;
pub mod utils;
pub mod vectorizer;

/// Clustering Service
/// Creates clustering runs and schedules their background jobs.
///
/// A run is stored first and then handed to a `JobQueue` explicitly.
/// The job samples documents from a `DocumentSource` (first-N in scroll order,
/// bounded by the document limit), vectorizes them, runs k-means and stores
/// the resulting clusters. Backend failures mark the run failed and roll
/// back any clusters.
pub use clustering::service::ClusteringService;

/// Clustering Engine
/// Vectorize-then-partition pipeline used by the clustering job.
///
/// - Fewer documents than clusters: one cluster per document
/// - No documents: no clusters
/// - With an embedding: clusters on averaged word vectors
pub use clustering::ClusteringEngine;

/// Cluster Store
/// Owns clustering runs and their clusters.
/// Every mutation (add / remove / transfer / merge / split / ignore) runs under
/// the run's entry lock, so a document never ends up in two clusters of one run.
///
/// # Thread Safety
/// Implemented using DashMap and atomics.
pub use clustering::store::{Cluster, ClusterStore, ClusteringParams, ClusteringRun, RunStatus};

/// Evaluation Service
/// Validates an evaluation against the selected documents, persists it and
/// schedules scoring.
///
/// Scoring holds every label in memory when the estimate fits the configured
/// buffer and falls back to batch-by-batch scoring otherwise.
pub use evaluator::{
    AverageFunction, EvaluationParams, EvaluationResult, EvaluationService, EvaluationStatus, EvaluationType, Metrics,
    ScoringMode,
};

/// Individual result filtering
/// Keeps the classes of a per-class breakdown that pass count and metric bounds,
/// and averages them.
pub use evaluator::{filter_by, FilteredAverage, MetricName, ResultFilter};

/// Document Source
/// The capability the engine reads documents through: a filtered count plus a
/// restartable, paginated scroll.
/// `InMemorySource` is the bundled implementation.
pub use source::{Document, DocumentId, DocumentSource, Fact, FactWriter, Filter, InMemorySource};

/// Vectorizer
/// Turns text into unit-length sparse vectors.
/// Backends are chosen by `VectorizerKind` (TF-IDF or raw counts).
pub use vectorizer::{Vectorizer, VectorizerKind, VectorizerParams};

/// Corpus
/// Document frequencies of the fitted texts, shared by the vectorizer.
///
/// # Thread Safety
/// Implemented using DashMap and atomics.
pub use vectorizer::corpus::Corpus;

/// TF IDF Calculation Engine Trait
/// Decides how raw term counts are weighted.
/// `DefaultTFIDFEngine` uses smoothed IDF, `CountEngine` keeps raw counts.
pub use vectorizer::tfidf::{CountEngine, DefaultTFIDFEngine, TFIDFEngine};

pub use config::{ConfigHandle, EngineConfig};
pub use error::{BackendError, ConfigError, Error, Result, ValidationError};
pub use jobs::{InlineQueue, JobQueue, RayonQueue};
