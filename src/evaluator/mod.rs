//! Classification evaluation.
//!
//! Compares a "true" fact against a "predicted" fact stored on the same
//! documents and derives confusion matrices, accuracy, precision, recall and
//! F1. Scoring runs either over all labels at once or batch by batch when the
//! labels would not fit in the configured memory buffer.

pub mod aggregator;
pub mod labels;
pub mod scoring;
pub mod service;
pub mod store;
pub mod validation;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EngineConfig;
use crate::error::ValidationError;
use crate::source::Filter;

pub use aggregator::{filter_by, FilteredAverage, MetricName, MetricRestriction, ResultFilter};
pub use service::EvaluationService;
pub use store::{EvaluationId, EvaluationStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationType {
    Binary,
    Multilabel,
    Entity,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Binary => "binary",
            EvaluationType::Multilabel => "multilabel",
            EvaluationType::Entity => "entity",
        }
    }

    /// Every unit carries exactly one class.
    pub fn is_one_hot(&self) -> bool {
        !matches!(self, EvaluationType::Multilabel)
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binary" => Ok(EvaluationType::Binary),
            "multilabel" => Ok(EvaluationType::Multilabel),
            "entity" => Ok(EvaluationType::Entity),
            _ => Err(ValidationError::UnknownEvaluationType(s.to_string())),
        }
    }
}

/// How per-class scores collapse into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageFunction {
    /// Scores of the positive class only
    Binary,
    /// Pooled counts over all classes
    Micro,
    /// Unweighted mean over classes
    Macro,
    /// Mean weighted by true-class support
    Weighted,
    /// Mean over units (multilabel only)
    Samples,
}

impl AverageFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AverageFunction::Binary => "binary",
            AverageFunction::Micro => "micro",
            AverageFunction::Macro => "macro",
            AverageFunction::Weighted => "weighted",
            AverageFunction::Samples => "samples",
        }
    }

    pub fn is_compatible_with(&self, evaluation_type: EvaluationType) -> bool {
        match self {
            AverageFunction::Binary => evaluation_type.is_one_hot(),
            AverageFunction::Samples => evaluation_type == EvaluationType::Multilabel,
            AverageFunction::Micro | AverageFunction::Macro | AverageFunction::Weighted => true,
        }
    }

    /// Can be computed exactly from summed per-class counts.
    pub fn is_decomposable(&self) -> bool {
        matches!(self, AverageFunction::Micro)
    }
}

impl fmt::Display for AverageFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AverageFunction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binary" => Ok(AverageFunction::Binary),
            "micro" => Ok(AverageFunction::Micro),
            "macro" => Ok(AverageFunction::Macro),
            "weighted" => Ok(AverageFunction::Weighted),
            "samples" => Ok(AverageFunction::Samples),
            _ => Err(ValidationError::UnknownAverage(s.to_string())),
        }
    }
}

/// Evaluation job description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationParams {
    pub description: String,
    pub true_fact: String,
    pub predicted_fact: String,
    /// Required for binary evaluation
    pub true_fact_value: Option<String>,
    /// Required for binary evaluation
    pub predicted_fact_value: Option<String>,
    pub evaluation_type: EvaluationType,
    pub average_function: AverageFunction,
    pub filter: Filter,
    pub add_individual_results: bool,
    /// Entity mode: compare tokens inside spans instead of whole spans
    pub token_based: bool,
    /// Entity mode: field the spans point into
    pub field: Option<String>,
}

impl EvaluationParams {
    pub fn binary(true_fact: &str, true_value: &str, predicted_fact: &str, predicted_value: &str) -> Self {
        Self {
            true_fact_value: Some(true_value.to_string()),
            predicted_fact_value: Some(predicted_value.to_string()),
            ..Self::new(EvaluationType::Binary, true_fact, predicted_fact, AverageFunction::Binary)
        }
    }

    pub fn multilabel(true_fact: &str, predicted_fact: &str, average: AverageFunction) -> Self {
        Self::new(EvaluationType::Multilabel, true_fact, predicted_fact, average)
    }

    pub fn entity(true_fact: &str, predicted_fact: &str, token_based: bool) -> Self {
        Self {
            token_based,
            ..Self::new(EvaluationType::Entity, true_fact, predicted_fact, AverageFunction::Binary)
        }
    }

    fn new(evaluation_type: EvaluationType, true_fact: &str, predicted_fact: &str, average: AverageFunction) -> Self {
        Self {
            description: String::new(),
            true_fact: true_fact.to_string(),
            predicted_fact: predicted_fact.to_string(),
            true_fact_value: None,
            predicted_fact_value: None,
            evaluation_type,
            average_function: average,
            filter: Filter::All,
            add_individual_results: true,
            token_based: true,
            field: None,
        }
    }

    pub fn with_average(mut self, average: AverageFunction) -> Self {
        self.average_function = average;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Created => "created",
            EvaluationStatus::Running => "running",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl Metrics {
    pub fn get(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::Accuracy => self.accuracy,
            MetricName::Precision => self.precision,
            MetricName::Recall => self.recall,
            MetricName::F1Score => self.f1_score,
        }
    }

    pub(crate) fn scaled(&self, factor: f64) -> Metrics {
        Metrics {
            accuracy: self.accuracy * factor,
            precision: self.precision * factor,
            recall: self.recall * factor,
            f1_score: self.f1_score * factor,
        }
    }

    pub(crate) fn plus(&self, other: &Metrics) -> Metrics {
        Metrics {
            accuracy: self.accuracy + other.accuracy,
            precision: self.precision + other.precision,
            recall: self.recall + other.recall,
            f1_score: self.f1_score + other.f1_score,
        }
    }
}

/// Scores of a single class, one-vs-rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualResult {
    #[serde(flatten)]
    pub metrics: Metrics,
    /// `[[tn, fp], [fn, tp]]`
    pub confusion_matrix: [[u64; 2]; 2],
    /// Units whose true label includes the class
    pub count: u64,
}

/// Strategy for holding labels while scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Collect every label, score once. Exact.
    FullMemory,
    /// Score each scroll batch and fold into running totals.
    Incremental,
}

impl ScoringMode {
    /// Pick the mode for a job whose labels need `estimated_bytes`.
    pub fn select(estimated_bytes: u64, config: &EngineConfig) -> ScoringMode {
        let mode = if estimated_bytes > config.memory_buffer_bytes {
            ScoringMode::Incremental
        } else {
            ScoringMode::FullMemory
        };
        info!(
            estimated_bytes,
            memory_buffer_bytes = config.memory_buffer_bytes,
            mode = ?mode,
            "scoring mode selected"
        );
        mode
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: EvaluationId,
    pub params: EvaluationParams,
    pub status: EvaluationStatus,
    pub error: Option<String>,
    pub document_count: u64,
    pub n_total_classes: usize,
    pub n_true_classes: usize,
    pub n_predicted_classes: usize,
    /// Sorted; also the row/column order of `confusion_matrix`
    pub classes: Vec<String>,
    pub confusion_matrix: Vec<Vec<u64>>,
    pub metrics: Metrics,
    pub individual_results: IndexMap<String, IndividualResult>,
    pub scores_imprecise: bool,
    pub scoring_mode: Option<ScoringMode>,
    /// Bumped on every reevaluation; jobs of older generations are discarded.
    pub generation: u64,
}

impl EvaluationResult {
    pub(crate) fn new(id: EvaluationId, params: EvaluationParams) -> Self {
        Self {
            id,
            params,
            status: EvaluationStatus::Created,
            error: None,
            document_count: 0,
            n_total_classes: 0,
            n_true_classes: 0,
            n_predicted_classes: 0,
            classes: Vec::new(),
            confusion_matrix: Vec::new(),
            metrics: Metrics::default(),
            individual_results: IndexMap::new(),
            scores_imprecise: false,
            scoring_mode: None,
            generation: 0,
        }
    }

    /// Drop every computed score.
    pub(crate) fn clear_scores(&mut self) {
        let mut cleared = EvaluationResult::new(self.id, self.params.clone());
        cleared.generation = self.generation;
        *self = cleared;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_sets_reject_unknown_names() {
        assert_eq!("Macro".parse::<AverageFunction>().unwrap(), AverageFunction::Macro);
        assert_eq!(
            "median".parse::<AverageFunction>().unwrap_err(),
            ValidationError::UnknownAverage("median".to_string())
        );
        assert_eq!("entity".parse::<EvaluationType>().unwrap(), EvaluationType::Entity);
        assert!("regression".parse::<EvaluationType>().is_err());
    }

    #[test]
    fn average_compatibility() {
        assert!(AverageFunction::Binary.is_compatible_with(EvaluationType::Entity));
        assert!(!AverageFunction::Binary.is_compatible_with(EvaluationType::Multilabel));
        assert!(AverageFunction::Samples.is_compatible_with(EvaluationType::Multilabel));
        assert!(!AverageFunction::Samples.is_compatible_with(EvaluationType::Binary));
        assert!(AverageFunction::Weighted.is_compatible_with(EvaluationType::Multilabel));
    }

    #[test]
    fn mode_follows_memory_buffer() {
        let config = EngineConfig {
            memory_buffer_bytes: 1_000,
            ..EngineConfig::default()
        };
        assert_eq!(ScoringMode::select(1_000, &config), ScoringMode::FullMemory);
        assert_eq!(ScoringMode::select(1_001, &config), ScoringMode::Incremental);
    }

    #[test]
    fn individual_result_serializes_flat() {
        let result = IndividualResult {
            metrics: Metrics {
                accuracy: 0.5,
                precision: 1.0,
                recall: 0.25,
                f1_score: 0.4,
            },
            confusion_matrix: [[1, 0], [3, 1]],
            count: 4,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["precision"], 1.0);
        assert_eq!(json["confusion_matrix"][1][0], 3);
    }
}
