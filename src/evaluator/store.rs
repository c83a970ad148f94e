use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::evaluator::aggregator::Scores;
use crate::evaluator::{EvaluationParams, EvaluationResult, EvaluationStatus, ScoringMode};

pub type EvaluationId = u64;

/// Evaluation records keyed by id.
#[derive(Debug)]
pub struct EvaluationStore {
    results: DashMap<EvaluationId, EvaluationResult, RandomState>,
    next_id: AtomicU64,
}

impl Default for EvaluationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationStore {
    pub fn new() -> Self {
        Self {
            results: DashMap::with_hasher(RandomState::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn with_result<T>(&self, id: EvaluationId, f: impl FnOnce(&mut EvaluationResult) -> Result<T>) -> Result<T> {
        let mut result = self
            .results
            .get_mut(&id)
            .ok_or(Error::NotFound { kind: "evaluation", id })?;
        f(&mut result)
    }

    /// Like `with_result`, for a job of `generation`. Superseded jobs are refused.
    fn with_job<T>(
        &self,
        id: EvaluationId,
        generation: u64,
        f: impl FnOnce(&mut EvaluationResult) -> Result<T>,
    ) -> Result<T> {
        self.with_result(id, |result| {
            if result.generation != generation {
                return Err(Error::Superseded {
                    kind: "evaluation",
                    id,
                    generation,
                    current: result.generation,
                });
            }
            f(result)
        })
    }

    /// Store a new evaluation at generation 0.
    pub(crate) fn create(&self, params: EvaluationParams, classes: &[String]) -> EvaluationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut result = EvaluationResult::new(id, params);
        result.classes = classes.to_vec();
        result.n_total_classes = classes.len();
        self.results.insert(id, result);
        info!(evaluation = id, classes = classes.len(), "evaluation created");
        id
    }

    pub fn get(&self, id: EvaluationId) -> Result<EvaluationResult> {
        self.results
            .get(&id)
            .map(|r| r.clone())
            .ok_or(Error::NotFound { kind: "evaluation", id })
    }

    pub fn list(&self) -> Vec<EvaluationResult> {
        let mut results: Vec<EvaluationResult> = self.results.iter().map(|r| r.clone()).collect();
        results.sort_by_key(|r| r.id);
        results
    }

    pub fn delete(&self, id: EvaluationId) -> Result<()> {
        self.results
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::NotFound { kind: "evaluation", id })
    }

    pub fn update_description(&self, id: EvaluationId, description: &str) -> Result<()> {
        self.with_result(id, |result| {
            result.params.description = description.to_string();
            Ok(())
        })
    }

    /// Back to `created` with a fresh class list; previous scores are dropped.
    /// Returns the new generation, which queued jobs of earlier ones no longer match.
    pub(crate) fn reset(&self, id: EvaluationId, params: EvaluationParams, classes: &[String]) -> Result<u64> {
        self.with_result(id, |result| {
            if result.status == EvaluationStatus::Running {
                return Err(Error::InvalidState {
                    kind: "evaluation",
                    id,
                    status: result.status.as_str().to_string(),
                    action: "reevaluation",
                });
            }
            result.params = params;
            result.clear_scores();
            result.classes = classes.to_vec();
            result.n_total_classes = classes.len();
            result.generation += 1;
            info!(evaluation = id, generation = result.generation, "evaluation reset");
            Ok(result.generation)
        })
    }

    pub(crate) fn mark_running(&self, id: EvaluationId, generation: u64, mode: ScoringMode) -> Result<()> {
        self.with_job(id, generation, |result| {
            if result.status == EvaluationStatus::Running {
                return Err(Error::InvalidState {
                    kind: "evaluation",
                    id,
                    status: result.status.as_str().to_string(),
                    action: "starting",
                });
            }
            result.status = EvaluationStatus::Running;
            result.scoring_mode = Some(mode);
            Ok(())
        })
    }

    pub(crate) fn complete(&self, id: EvaluationId, generation: u64, document_count: u64, scores: Scores) -> Result<()> {
        self.with_job(id, generation, |result| {
            if scores.confusion.size() != result.classes.len() {
                return Err(Error::ShapeMismatch {
                    expected: result.classes.len(),
                    found: scores.confusion.size(),
                });
            }
            result.document_count = document_count;
            result.n_total_classes = result.classes.len();
            result.n_true_classes = scores.n_true_classes();
            result.n_predicted_classes = scores.n_predicted_classes();
            result.confusion_matrix = scores.confusion.rows();
            result.metrics = scores.metrics;
            result.scores_imprecise = scores.imprecise;
            if result.params.add_individual_results {
                result.individual_results = scores.individual_results(&result.classes);
            }
            result.status = EvaluationStatus::Completed;
            info!(
                evaluation = id,
                documents = document_count,
                units = scores.units,
                imprecise = scores.imprecise,
                "evaluation completed"
            );
            Ok(())
        })
    }

    /// Mark failed; partial scores are never kept.
    pub(crate) fn fail(&self, id: EvaluationId, generation: u64, message: String) -> Result<()> {
        self.with_job(id, generation, |result| {
            warn!(evaluation = id, error = %message, "evaluation failed");
            result.clear_scores();
            result.status = EvaluationStatus::Failed;
            result.error = Some(message);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::labels::LabelUnit;
    use crate::evaluator::scoring::BatchScores;
    use crate::evaluator::{AverageFunction, EvaluationType};

    fn classes() -> Vec<String> {
        vec!["false".to_string(), "true".to_string()]
    }

    fn scores() -> Scores {
        let units = vec![LabelUnit::one_hot(true, true), LabelUnit::one_hot(false, true)];
        Scores::exact(
            BatchScores::from_units(2, &units),
            EvaluationType::Binary,
            AverageFunction::Binary,
        )
    }

    #[test]
    fn lifecycle() {
        let store = EvaluationStore::new();
        let id = store.create(EvaluationParams::binary("T", "a", "P", "a"), &classes());
        assert_eq!(store.get(id).unwrap().status, EvaluationStatus::Created);

        store.mark_running(id, 0, ScoringMode::FullMemory).unwrap();
        assert!(store.mark_running(id, 0, ScoringMode::FullMemory).is_err());
        store.complete(id, 0, 2, scores()).unwrap();

        let result = store.get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Completed);
        assert_eq!(result.confusion_matrix.len(), result.n_total_classes);
        assert_eq!(result.n_true_classes, 2);
        assert_eq!(result.n_predicted_classes, 1);
        assert_eq!(result.individual_results["true"].count, 1);
        assert!((result.metrics.precision - 0.5).abs() < 1e-12);
    }

    #[test]
    fn failure_drops_scores() {
        let store = EvaluationStore::new();
        let id = store.create(EvaluationParams::binary("T", "a", "P", "a"), &classes());
        store.mark_running(id, 0, ScoringMode::Incremental).unwrap();
        store.fail(id, 0, "backend unavailable".to_string()).unwrap();
        let result = store.get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Failed);
        assert!(result.confusion_matrix.is_empty());
        assert_eq!(result.error.as_deref(), Some("backend unavailable"));
    }

    #[test]
    fn reset_supersedes_queued_jobs() {
        let store = EvaluationStore::new();
        let params = EvaluationParams::binary("T", "a", "P", "a");
        let id = store.create(params.clone(), &classes());
        let generation = store.reset(id, params, &classes()).unwrap();
        assert_eq!(generation, 1);

        let stale = store.mark_running(id, 0, ScoringMode::FullMemory).unwrap_err();
        assert!(matches!(stale, Error::Superseded { generation: 0, current: 1, .. }));
        assert!(store.complete(id, 0, 2, scores()).is_err());
        assert!(store.fail(id, 0, "late".to_string()).is_err());
        assert_eq!(store.get(id).unwrap().status, EvaluationStatus::Created);

        store.mark_running(id, 1, ScoringMode::FullMemory).unwrap();
        store.complete(id, 1, 2, scores()).unwrap();
        let result = store.get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Completed);
        assert_eq!(result.generation, 1);
    }

    #[test]
    fn missing_result_is_not_found() {
        let store = EvaluationStore::new();
        assert!(matches!(store.get(42), Err(Error::NotFound { kind: "evaluation", id: 42 })));
        assert!(store.delete(42).is_err());
    }
}
