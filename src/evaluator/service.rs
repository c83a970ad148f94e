use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{ConfigHandle, EngineConfig};
use crate::error::{Error, Result};
use crate::evaluator::aggregator::{filter_by, FilteredAverage, ResultFilter, ScoreAccumulator, Scores};
use crate::evaluator::scoring::BatchScores;
use crate::evaluator::store::{EvaluationId, EvaluationStore};
use crate::evaluator::validation::{plan, survey, EvaluationPlan};
use crate::evaluator::{EvaluationParams, EvaluationStatus, ScoringMode};
use crate::jobs::{catch_panic, JobQueue};
use crate::source::{DocumentSource, Scroll};

/// Validates evaluations, persists them and schedules scoring.
pub struct EvaluationService {
    store: Arc<EvaluationStore>,
    source: Arc<dyn DocumentSource>,
    queue: Arc<dyn JobQueue>,
    config: ConfigHandle,
}

impl EvaluationService {
    pub fn new(source: Arc<dyn DocumentSource>, queue: Arc<dyn JobQueue>, config: ConfigHandle) -> Self {
        Self {
            store: Arc::new(EvaluationStore::new()),
            source,
            queue,
            config,
        }
    }

    pub fn store(&self) -> &EvaluationStore {
        &self.store
    }

    /// Survey the selected documents and check `params` against them.
    fn validate(&self, params: &EvaluationParams) -> Result<EvaluationPlan> {
        let batch_size = self.config.snapshot().scroll_size;
        let survey = survey(self.source.as_ref(), params, batch_size)?;
        Ok(plan(params, &survey)?)
    }

    /// Validate and persist an evaluation, then enqueue its scoring job.
    /// Validation errors are returned before anything is stored.
    pub fn submit(&self, params: EvaluationParams) -> Result<EvaluationId> {
        let plan = self.validate(&params)?;
        let id = self.store.create(params.clone(), plan.classes());
        self.enqueue(id, 0, params, plan);
        Ok(id)
    }

    /// Recompute an evaluation from scratch.
    /// A job still queued for the previous generation is discarded when it runs.
    pub fn reevaluate(&self, id: EvaluationId) -> Result<()> {
        let current = self.store.get(id)?;
        if current.status == EvaluationStatus::Running {
            return Err(Error::InvalidState {
                kind: "evaluation",
                id,
                status: current.status.as_str().to_string(),
                action: "reevaluation",
            });
        }
        let plan = self.validate(&current.params)?;
        let generation = self.store.reset(id, current.params.clone(), plan.classes())?;
        self.enqueue(id, generation, current.params, plan);
        Ok(())
    }

    /// Average of the per-class results that pass `filter`.
    pub fn filtered_average(&self, id: EvaluationId, filter: &ResultFilter) -> Result<FilteredAverage> {
        let result = self.store.get(id)?;
        if result.status != EvaluationStatus::Completed {
            return Err(Error::InvalidState {
                kind: "evaluation",
                id,
                status: result.status.as_str().to_string(),
                action: "filtering individual results",
            });
        }
        Ok(filter_by(&result.individual_results, filter))
    }

    fn enqueue(&self, id: EvaluationId, generation: u64, params: EvaluationParams, plan: EvaluationPlan) {
        let store = self.store.clone();
        let source = self.source.clone();
        let config = self.config.clone();
        self.queue.enqueue(
            "evaluation",
            Box::new(move || run_job(&store, source.as_ref(), &config.snapshot(), id, generation, &params, &plan)),
        );
    }
}

fn run_job(
    store: &EvaluationStore,
    source: &dyn DocumentSource,
    config: &EngineConfig,
    id: EvaluationId,
    generation: u64,
    params: &EvaluationParams,
    plan: &EvaluationPlan,
) {
    let mode = ScoringMode::select(plan.estimated_bytes(), config);
    match store.mark_running(id, generation, mode) {
        Ok(()) => {}
        Err(err @ Error::Superseded { .. }) => {
            info!(evaluation = id, generation, reason = %err, "evaluation job skipped");
            return;
        }
        Err(err) => {
            warn!(evaluation = id, error = %err, "evaluation job not started");
            return;
        }
    }
    info!(evaluation = id, generation, mode = ?mode, "evaluation job started");
    let outcome = catch_panic(|| score(source, params, plan, mode, config.scroll_size))
        .and_then(|(documents, scores)| store.complete(id, generation, documents, scores));
    if let Err(err) = outcome {
        error!(evaluation = id, error = %err, "evaluation job failed");
        if let Err(err) = store.fail(id, generation, err.to_string()) {
            warn!(evaluation = id, error = %err, "could not record failure");
        }
    }
}

/// Score every selected document. Returns the document count and the scores.
fn score(
    source: &dyn DocumentSource,
    params: &EvaluationParams,
    plan: &EvaluationPlan,
    mode: ScoringMode,
    batch_size: usize,
) -> Result<(u64, Scores)> {
    let fields = plan.extractor.required_fields();
    let num_classes = plan.classes().len();
    let (evaluation_type, average) = (params.evaluation_type, params.average_function);
    let mut documents = 0u64;
    let scroll = Scroll::new(source, &params.filter, &fields, batch_size);

    match mode {
        ScoringMode::FullMemory => {
            let mut units = Vec::with_capacity(plan.estimated_units.min(1 << 20) as usize);
            for batch in scroll {
                let batch = batch?;
                documents += batch.len() as u64;
                batch.iter().for_each(|doc| plan.extractor.extract_into(doc, &mut units));
            }
            let scores = BatchScores::from_units(num_classes, &units);
            Ok((documents, Scores::exact(scores, evaluation_type, average)))
        }
        ScoringMode::Incremental => {
            let mut accumulator = ScoreAccumulator::new(num_classes, evaluation_type, average);
            for batch in scroll {
                let batch = batch?;
                documents += batch.len() as u64;
                let units = plan.extractor.extract(&batch);
                accumulator.fold(&BatchScores::from_units(num_classes, &units))?;
            }
            Ok((documents, accumulator.finish()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ValidationError};
    use crate::evaluator::AverageFunction;
    use crate::jobs::{InlineQueue, Job};
    use crate::source::{Document, DocumentId, Fact, Filter, InMemorySource, ScrollPage, ScrollRequest, ScrollToken};

    /// tp=2 fn=1 fp=1 tn=1 for value "spam"
    fn source() -> Arc<InMemorySource> {
        let pairs = [("spam", "spam"), ("spam", "spam"), ("spam", "ham"), ("ham", "spam"), ("ham", "ham")];
        Arc::new(InMemorySource::new(pairs.iter().enumerate().map(|(i, (t, p))| {
            Document::new(DocumentId::new("mail", i.to_string()))
                .with_fact(Fact::new("TRUE_TAG", *t, "text"))
                .with_fact(Fact::new("PREDICTED_TAG", *p, "text"))
        })))
    }

    fn service(source: Arc<dyn DocumentSource>, memory_buffer_bytes: u64) -> EvaluationService {
        let config = EngineConfig {
            memory_buffer_bytes,
            scroll_size: 2,
            ..EngineConfig::default()
        };
        EvaluationService::new(source, Arc::new(InlineQueue), ConfigHandle::new(config))
    }

    #[test]
    fn binary_evaluation_completes() {
        let service = service(source(), 1 << 20);
        let id = service
            .submit(EvaluationParams::binary("TRUE_TAG", "spam", "PREDICTED_TAG", "spam"))
            .unwrap();
        let result = service.store().get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Completed);
        assert_eq!(result.scoring_mode, Some(ScoringMode::FullMemory));
        assert_eq!(result.document_count, 5);
        assert_eq!(result.confusion_matrix, vec![vec![1, 1], vec![1, 2]]);
        assert!((result.metrics.accuracy - 0.6).abs() < 1e-12);
        assert!((result.metrics.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!(!result.scores_imprecise);
    }

    #[test]
    fn small_buffer_switches_to_incremental() {
        let service = service(source(), 0);
        let params = EvaluationParams::binary("TRUE_TAG", "spam", "PREDICTED_TAG", "spam").with_average(AverageFunction::Micro);
        let id = service.submit(params).unwrap();
        let result = service.store().get(id).unwrap();
        assert_eq!(result.scoring_mode, Some(ScoringMode::Incremental));
        assert!(!result.scores_imprecise);
        assert!((result.metrics.precision - 0.6).abs() < 1e-12);
    }

    #[test]
    fn validation_errors_store_nothing() {
        let service = service(source(), 1 << 20);
        let err = service
            .submit(EvaluationParams::binary("TRUE_TAG", "eggs", "PREDICTED_TAG", "spam"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::UnknownFactValue { .. })));
        assert!(service.store().list().is_empty());
    }

    #[test]
    fn reevaluate_picks_up_new_documents() {
        let source = source();
        let service = service(source.clone(), 1 << 20);
        let id = service
            .submit(EvaluationParams::binary("TRUE_TAG", "spam", "PREDICTED_TAG", "spam"))
            .unwrap();
        source.push(
            Document::new(DocumentId::new("mail", "99"))
                .with_fact(Fact::new("TRUE_TAG", "spam", "text"))
                .with_fact(Fact::new("PREDICTED_TAG", "spam", "text")),
        );
        service.reevaluate(id).unwrap();
        let result = service.store().get(id).unwrap();
        assert_eq!(result.document_count, 6);
        assert_eq!(result.individual_results["true"].count, 4);
    }

    #[test]
    fn filtered_average_requires_completed_result() {
        let service = service(source(), 1 << 20);
        let id = service
            .submit(EvaluationParams::multilabel("TRUE_TAG", "PREDICTED_TAG", AverageFunction::Macro))
            .unwrap();
        let all = service.filtered_average(id, &ResultFilter::default()).unwrap();
        assert_eq!(all.classes, vec!["ham", "spam"]);
        let spam_only = service.filtered_average(id, &ResultFilter::count_range(Some(3), None)).unwrap();
        assert_eq!(spam_only.classes, vec!["spam"]);
        assert!(service.filtered_average(999, &ResultFilter::default()).is_err());
    }

    #[test]
    fn backend_failure_during_scoring_marks_failed() {
        struct Flaky {
            inner: Arc<InMemorySource>,
            calls: std::sync::atomic::AtomicUsize,
        }
        impl DocumentSource for Flaky {
            fn count(&self, filter: &Filter) -> std::result::Result<u64, BackendError> {
                self.inner.count(filter)
            }
            fn scroll(&self, request: &ScrollRequest<'_>, token: Option<&ScrollToken>) -> std::result::Result<ScrollPage, BackendError> {
                // survey takes 3 pages of 2; the fifth call is the scoring scan's second page
                let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if call == 4 {
                    return Err(BackendError::new("node left the cluster"));
                }
                self.inner.scroll(request, token)
            }
        }

        let flaky = Arc::new(Flaky {
            inner: source(),
            calls: Default::default(),
        });
        let service = service(flaky, 1 << 20);
        let id = service
            .submit(EvaluationParams::binary("TRUE_TAG", "spam", "PREDICTED_TAG", "spam"))
            .unwrap();
        let result = service.store().get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Failed);
        assert!(result.error.unwrap().contains("node left the cluster"));
        assert!(result.confusion_matrix.is_empty());
    }

    /// Holds jobs until drained.
    #[derive(Default)]
    struct DeferredQueue {
        jobs: parking_lot::Mutex<Vec<Job>>,
    }

    impl JobQueue for DeferredQueue {
        fn enqueue(&self, _name: &str, job: Job) {
            self.jobs.lock().push(job);
        }
    }

    impl DeferredQueue {
        fn len(&self) -> usize {
            self.jobs.lock().len()
        }

        fn drain(&self, newest_first: bool) {
            let mut jobs = std::mem::take(&mut *self.jobs.lock());
            if newest_first {
                jobs.reverse();
            }
            jobs.into_iter().for_each(|job| job());
        }
    }

    fn tagged(index: usize, truth: &str, predicted: &str) -> Document {
        Document::new(DocumentId::new("mail", index.to_string()))
            .with_fact(Fact::new("TRUE_TAG", truth, "text"))
            .with_fact(Fact::new("PREDICTED_TAG", predicted, "text"))
    }

    #[test]
    fn reevaluating_a_queued_evaluation_discards_the_older_job() {
        for newest_first in [true, false] {
            let source = Arc::new(InMemorySource::new(vec![tagged(0, "a", "a"), tagged(1, "a", "b"), tagged(2, "b", "b")]));
            let queue = Arc::new(DeferredQueue::default());
            let config = EngineConfig {
                scroll_size: 2,
                ..EngineConfig::default()
            };
            let service = EvaluationService::new(source.clone(), queue.clone(), ConfigHandle::new(config));

            let id = service
                .submit(EvaluationParams::multilabel("TRUE_TAG", "PREDICTED_TAG", AverageFunction::Macro))
                .unwrap();
            source.push(tagged(3, "c", "c"));
            service.reevaluate(id).unwrap();
            assert_eq!(queue.len(), 2);
            queue.drain(newest_first);

            let result = service.store().get(id).unwrap();
            assert_eq!(result.status, EvaluationStatus::Completed, "newest_first={newest_first}: {:?}", result.error);
            assert_eq!(result.generation, 1);
            assert_eq!(result.classes, vec!["a", "b", "c"]);
            assert_eq!(result.n_total_classes, 3);
            assert_eq!(result.confusion_matrix.len(), 3);
            assert_eq!(result.document_count, 4);
            assert_eq!(result.individual_results["c"].count, 1);
        }
    }

    #[test]
    fn panic_during_scoring_marks_failed() {
        struct Exploding {
            inner: Arc<InMemorySource>,
            calls: std::sync::atomic::AtomicUsize,
        }
        impl DocumentSource for Exploding {
            fn count(&self, filter: &Filter) -> std::result::Result<u64, BackendError> {
                self.inner.count(filter)
            }
            fn scroll(&self, request: &ScrollRequest<'_>, token: Option<&ScrollToken>) -> std::result::Result<ScrollPage, BackendError> {
                // survey takes calls 0..=2; call 4 is the scoring scan's second page
                if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 4 {
                    panic!("corrupt page");
                }
                self.inner.scroll(request, token)
            }
        }

        let service = service(
            Arc::new(Exploding {
                inner: source(),
                calls: Default::default(),
            }),
            1 << 20,
        );
        let id = service
            .submit(EvaluationParams::binary("TRUE_TAG", "spam", "PREDICTED_TAG", "spam"))
            .unwrap();
        let result = service.store().get(id).unwrap();
        assert_eq!(result.status, EvaluationStatus::Failed);
        assert!(result.error.unwrap().contains("corrupt page"));

        service.reevaluate(id).unwrap();
        assert_eq!(service.store().get(id).unwrap().status, EvaluationStatus::Completed);
    }
}
