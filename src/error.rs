//! Error types for the clustering and evaluation engine.
//!
//! - [`ValidationError`]: client errors raised before any job is queued
//! - [`BackendError`]: document source failures, recorded on the run
//! - [`ConfigError`]: configuration loading/validation failures
//! - [`Error`]: top-level error wrapping all of the above

use thiserror::Error;

use crate::source::DocumentId;

/// Rejected input. Every variant names what was wrong.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("fact '{fact}' is not present in the selected documents")]
    UnknownFact { fact: String },

    #[error("binary evaluation requires a value for fact '{fact}'")]
    MissingFactValue { fact: String },

    #[error("value '{value}' is not a known value of fact '{fact}'")]
    UnknownFactValue { fact: String, value: String },

    #[error("averaging function '{average}' is not compatible with {evaluation_type} evaluation")]
    IncompatibleAverage {
        average: String,
        evaluation_type: String,
    },

    #[error("unknown averaging function '{0}'")]
    UnknownAverage(String),

    #[error("unknown evaluation type '{0}'")]
    UnknownEvaluationType(String),

    #[error("unknown vectorizer '{0}'")]
    UnknownVectorizer(String),

    #[error("fact '{fact}' occurs in several fields ({fields:?}); choose one explicitly")]
    AmbiguousFactField { fact: String, fields: Vec<String> },

    #[error("fact '{fact}' does not occur in field '{field}'")]
    FactNotInField { fact: String, field: String },

    #[error("fact '{fact}' has only zero-length spans and cannot be used as an entity")]
    NonEntityFact { fact: String },

    #[error("cluster {cluster} does not exist")]
    ClusterNotFound { cluster: u64 },

    #[error("cluster {cluster} does not belong to clustering run {run}")]
    ClusterNotInRun { cluster: u64, run: u64 },

    #[error("document {document} already belongs to cluster {cluster}")]
    DuplicateMembership { document: DocumentId, cluster: u64 },

    #[error("document {document} is ignored in this clustering run")]
    IgnoredDocument { document: DocumentId },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// Failure of the document source (unavailable, timeout mid-scroll, ...).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("document source error: {message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("{kind} {id} is {status}; {action} is not allowed")]
    InvalidState {
        kind: &'static str,
        id: u64,
        status: String,
        action: &'static str,
    },

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("cannot fold a {found}x{found} confusion matrix into a {expected}x{expected} one")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("{kind} {id}: job of generation {generation} was superseded by generation {current}")]
    Superseded {
        kind: &'static str,
        id: u64,
        generation: u64,
        current: u64,
    },

    #[error("job panicked: {0}")]
    JobPanicked(String),
}

impl Error {
    /// True for errors a client caused (HTTP 400/404 equivalents).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound { .. } | Error::InvalidState { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
