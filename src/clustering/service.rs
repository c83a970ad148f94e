use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::clustering::store::{ClusterStore, ClusteringParams, ClusteringRun, RunId, RunStatus};
use crate::clustering::ClusteringEngine;
use crate::config::{ConfigHandle, EngineConfig};
use crate::error::{Error, Result, ValidationError};
use crate::jobs::{catch_panic, JobQueue};
use crate::source::{DocumentId, DocumentSource, Scroll};
use crate::vectorizer::embedding::Embedding;
use crate::vectorizer::VectorizerParams;

type EmbeddingRegistry = DashMap<String, Arc<dyn Embedding>, RandomState>;

/// Creates clustering runs and schedules their jobs.
pub struct ClusteringService {
    store: Arc<ClusterStore>,
    source: Arc<dyn DocumentSource>,
    queue: Arc<dyn JobQueue>,
    config: ConfigHandle,
    embeddings: Arc<EmbeddingRegistry>,
}

impl ClusteringService {
    pub fn new(source: Arc<dyn DocumentSource>, queue: Arc<dyn JobQueue>, config: ConfigHandle) -> Self {
        Self {
            store: Arc::new(ClusterStore::new()),
            source,
            queue,
            config,
            embeddings: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    /// Make an embedding selectable by name in [`ClusteringParams::embedding`].
    pub fn register_embedding(&self, name: &str, embedding: Arc<dyn Embedding>) {
        self.embeddings.insert(name.to_string(), embedding);
    }

    /// Validate, persist and enqueue a new run.
    /// Invalid parameters are rejected before anything is stored.
    pub fn submit(&self, params: ClusteringParams) -> Result<RunId> {
        params.validate()?;
        if let Some(name) = &params.embedding {
            if !self.embeddings.contains_key(name) {
                return Err(ValidationError::InvalidParameter {
                    name: "embedding".to_string(),
                    reason: format!("embedding '{}' is not registered", name),
                }
                .into());
            }
        }
        let run_id = self.store.create_run(params)?;
        self.enqueue(run_id);
        Ok(run_id)
    }

    /// Cluster the run again from scratch with its current parameters.
    /// Edits made to the previous clusters are discarded.
    pub fn retrain(&self, run_id: RunId) -> Result<()> {
        let run = self.store.run(run_id)?;
        if run.status == RunStatus::Running {
            return Err(Error::InvalidState {
                kind: "clustering run",
                id: run_id,
                status: run.status.as_str().to_string(),
                action: "retraining",
            });
        }
        self.enqueue(run_id);
        Ok(())
    }

    fn enqueue(&self, run_id: RunId) {
        let store = self.store.clone();
        let source = self.source.clone();
        let config = self.config.clone();
        let embeddings = self.embeddings.clone();
        self.queue.enqueue(
            "clustering",
            Box::new(move || run_job(&store, source.as_ref(), &config.snapshot(), &embeddings, run_id)),
        );
    }
}

fn run_job(
    store: &ClusterStore,
    source: &dyn DocumentSource,
    config: &EngineConfig,
    embeddings: &EmbeddingRegistry,
    run_id: RunId,
) {
    if let Err(err) = store.mark_running(run_id) {
        warn!(run = run_id, error = %err, "clustering job not started");
        return;
    }
    info!(run = run_id, "clustering job started");
    match catch_panic(|| execute(store, source, config, embeddings, run_id)) {
        Ok(clusters) => info!(run = run_id, clusters, "clustering job finished"),
        Err(err) => {
            error!(run = run_id, error = %err, "clustering job failed");
            if let Err(err) = store.fail(run_id, err.to_string()) {
                warn!(run = run_id, error = %err, "could not record failure");
            }
        }
    }
}

/// Sample documents, cluster them and store the result.
fn execute(
    store: &ClusterStore,
    source: &dyn DocumentSource,
    config: &EngineConfig,
    embeddings: &EmbeddingRegistry,
    run_id: RunId,
) -> Result<usize> {
    let run = store.run(run_id)?;
    let params = &run.params;
    let limit = params.document_limit.unwrap_or(config.default_document_limit);
    let selected = source.count(&params.filter)?;
    let documents = if selected == 0 {
        Vec::new()
    } else {
        sample(source, &run, limit, config.scroll_size)?
    };
    info!(run = run_id, selected, documents = documents.len(), limit, "documents sampled");

    let mut vectorizer = VectorizerParams::new(params.vectorizer);
    vectorizer.stop_words = params.stop_words.clone();
    vectorizer.max_features = params.max_features.unwrap_or(config.max_features);

    let embedding = match &params.embedding {
        Some(name) => Some(
            embeddings
                .get(name)
                .map(|e| e.value().clone())
                .ok_or_else(|| Error::Clustering(format!("embedding '{}' is no longer registered", name)))?,
        ),
        None => None,
    };

    let mut engine = ClusteringEngine::new(vectorizer, params.num_clusters, config);
    if let Some(embedding) = embedding.as_deref() {
        engine = engine.with_embedding(embedding);
    }
    let drafts = engine.cluster(&documents);
    let created = store.complete(run_id, drafts)?;
    Ok(created.len())
}

/// First `limit` documents of the run's selection in scroll order, ignored ids skipped.
fn sample(
    source: &dyn DocumentSource,
    run: &ClusteringRun,
    limit: usize,
    batch_size: usize,
) -> Result<Vec<(DocumentId, String)>> {
    let params = &run.params;
    let mut documents = Vec::new();
    for batch in Scroll::new(source, &params.filter, &params.fields, batch_size) {
        for document in batch? {
            if run.ignored_ids.contains(&document.id) {
                continue;
            }
            let text = document.text_of(&params.fields);
            documents.push((document.id, text));
            if documents.len() >= limit {
                return Ok(documents);
            }
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::jobs::InlineQueue;
    use crate::source::{Document, Filter, InMemorySource, ScrollPage, ScrollRequest, ScrollToken};
    use crate::vectorizer::embedding::InMemoryEmbedding;

    fn source() -> Arc<InMemorySource> {
        let texts = [
            "football match goal", "football goal keeper", "goal striker football",
            "election vote parliament", "parliament vote minister", "election minister vote",
        ];
        Arc::new(InMemorySource::new(texts.iter().enumerate().map(|(i, t)| {
            Document::new(DocumentId::new("news", i.to_string())).with_field("text", *t)
        })))
    }

    fn service(source: Arc<dyn DocumentSource>) -> ClusteringService {
        ClusteringService::new(source, Arc::new(InlineQueue), ConfigHandle::default())
    }

    #[test]
    fn submit_runs_to_completion() {
        let service = service(source());
        let run_id = service.submit(ClusteringParams::new("topics", &["text"], 2)).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.num_clusters(), 2);
        let total: usize = run.clusters().map(|c| c.document_ids.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn document_limit_takes_first_documents() {
        let service = service(source());
        let mut params = ClusteringParams::new("topics", &["text"], 2);
        params.document_limit = Some(4);
        let run_id = service.submit(params).unwrap();
        let run = service.store().run(run_id).unwrap();
        let mut ids: Vec<String> = run.clusters().flat_map(|c| c.document_ids.iter().map(|d| d.id.clone())).collect();
        ids.sort();
        assert_eq!(ids, vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn retrain_skips_ignored_documents() {
        let service = service(source());
        let run_id = service.submit(ClusteringParams::new("topics", &["text"], 2)).unwrap();
        service.store().ignore_documents(run_id, &[DocumentId::new("news", "0")]).unwrap();
        service.retrain(run_id).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.cluster_of(&DocumentId::new("news", "0")).is_none());
        assert_eq!(run.clusters().map(|c| c.document_ids.len()).sum::<usize>(), 5);
    }

    #[test]
    fn empty_filter_completes_with_no_clusters() {
        let service = service(source());
        let mut params = ClusteringParams::new("nothing", &["text"], 3);
        params.filter = Filter::term("text", "cricket");
        let run_id = service.submit(params).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.num_clusters(), 0);
    }

    #[test]
    fn unknown_embedding_is_rejected_synchronously() {
        let service = service(source());
        let mut params = ClusteringParams::new("emb", &["text"], 2);
        params.embedding = Some("glove".to_string());
        let err = service.submit(params.clone()).unwrap_err();
        assert!(err.is_client_error());
        assert!(service.store().runs().is_empty());

        let mut embedding = InMemoryEmbedding::new(2);
        embedding.insert("football", vec![1.0, 0.0]).unwrap();
        embedding.insert("vote", vec![0.0, 1.0]).unwrap();
        service.register_embedding("glove", Arc::new(embedding));
        let run_id = service.submit(params).unwrap();
        assert_eq!(service.store().run(run_id).unwrap().status, RunStatus::Completed);
    }

    struct FlakySource {
        inner: Arc<InMemorySource>,
    }

    impl DocumentSource for FlakySource {
        fn count(&self, filter: &Filter) -> std::result::Result<u64, BackendError> {
            self.inner.count(filter)
        }

        fn scroll(&self, request: &ScrollRequest<'_>, token: Option<&ScrollToken>) -> std::result::Result<ScrollPage, BackendError> {
            match token {
                None => self.inner.scroll(request, None),
                Some(_) => Err(BackendError::new("scroll context expired")),
            }
        }
    }

    #[test]
    fn backend_failure_marks_run_failed() {
        let flaky = Arc::new(FlakySource { inner: source() });
        let service = ClusteringService::new(
            flaky,
            Arc::new(InlineQueue),
            ConfigHandle::new(EngineConfig {
                scroll_size: 2,
                ..EngineConfig::default()
            }),
        );
        let run_id = service.submit(ClusteringParams::new("flaky", &["text"], 2)).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.num_clusters(), 0);
        assert!(run.error.unwrap().contains("scroll context expired"));
    }

    struct CorruptEmbedding;

    impl Embedding for CorruptEmbedding {
        fn dimensions(&self) -> usize {
            2
        }

        fn vector(&self, _token: &str) -> Option<&[f64]> {
            panic!("embedding table corrupted")
        }
    }

    #[test]
    fn panicking_embedding_marks_run_failed() {
        let service = service(source());
        service.register_embedding("broken", Arc::new(CorruptEmbedding));
        let mut params = ClusteringParams::new("emb", &["text"], 2);
        params.embedding = Some("broken".to_string());

        let run_id = service.submit(params).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.num_clusters(), 0);
        assert!(run.error.unwrap().contains("embedding table corrupted"));
        // not stuck in `running`
        service.retrain(run_id).unwrap();
    }

    /// Reports no matches and refuses to be scrolled.
    struct EmptySelection;

    impl DocumentSource for EmptySelection {
        fn count(&self, _filter: &Filter) -> std::result::Result<u64, BackendError> {
            Ok(0)
        }

        fn scroll(&self, _request: &ScrollRequest<'_>, _token: Option<&ScrollToken>) -> std::result::Result<ScrollPage, BackendError> {
            Err(BackendError::new("scroll opened for an empty selection"))
        }
    }

    #[test]
    fn empty_selection_is_not_scrolled() {
        let service = service(Arc::new(EmptySelection));
        let run_id = service.submit(ClusteringParams::new("nothing", &["text"], 3)).unwrap();
        let run = service.store().run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error);
        assert_eq!(run.num_clusters(), 0);
    }
}
