//! Clustering runs and their clusters.
//!
//! A [`ClusteringRun`] owns its clusters; deleting the run drops them with it.
//! Every mutation holds the run's map entry for its whole duration, so
//! concurrent add/remove/transfer calls on one run are serialized and can
//! never leave a document in two sibling clusters.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clustering::summary::SignificantTerm;
use crate::error::{Error, Result, ValidationError};
use crate::source::{DocumentId, Fact, FactWriter, Filter};
use crate::vectorizer::VectorizerKind;

pub type RunId = u64;
pub type ClusterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// What a clustering job should do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringParams {
    pub description: String,
    pub fields: Vec<String>,
    pub filter: Filter,
    pub vectorizer: VectorizerKind,
    pub num_clusters: usize,
    /// Falls back to the engine's default limit
    pub document_limit: Option<usize>,
    pub stop_words: Vec<String>,
    /// Registered embedding to average token vectors with
    pub embedding: Option<String>,
    pub max_features: Option<usize>,
}

impl ClusteringParams {
    pub fn new(description: &str, fields: &[&str], num_clusters: usize) -> Self {
        Self {
            description: description.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            filter: Filter::All,
            vectorizer: VectorizerKind::TfIdf,
            num_clusters,
            document_limit: None,
            stop_words: Vec::new(),
            embedding: None,
            max_features: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let invalid = |name: &str, reason: &str| ValidationError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.fields.is_empty() {
            return Err(invalid("fields", "at least one field is required"));
        }
        if self.num_clusters == 0 {
            return Err(invalid("num_clusters", "must be at least 1"));
        }
        if self.document_limit == Some(0) {
            return Err(invalid("document_limit", "must be at least 1"));
        }
        if self.max_features == Some(0) {
            return Err(invalid("max_features", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub run_id: RunId,
    pub document_ids: IndexSet<DocumentId>,
    pub significant_terms: Vec<SignificantTerm>,
    pub intracluster_similarity: f64,
}

/// Cluster produced by the engine, not yet stored
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDraft {
    pub document_ids: Vec<DocumentId>,
    pub significant_terms: Vec<SignificantTerm>,
    pub intracluster_similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringRun {
    pub id: RunId,
    pub params: ClusteringParams,
    pub ignored_ids: IndexSet<DocumentId>,
    pub status: RunStatus,
    pub error: Option<String>,
    clusters: IndexMap<ClusterId, Cluster>,
}

impl ClusteringRun {
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Cluster holding `doc`, if any
    pub fn cluster_of(&self, doc: &DocumentId) -> Option<ClusterId> {
        self.clusters
            .values()
            .find(|c| c.document_ids.contains(doc))
            .map(|c| c.id)
    }

    fn cluster_mut(&mut self, id: ClusterId) -> Result<&mut Cluster> {
        self.clusters.get_mut(&id).ok_or(Error::NotFound { kind: "cluster", id })
    }
}

fn dedup(ids: &[DocumentId]) -> IndexSet<DocumentId> {
    ids.iter().cloned().collect()
}

#[derive(Debug)]
pub struct ClusterStore {
    runs: DashMap<RunId, ClusteringRun, RandomState>,
    /// cluster -> owning run, to tell "foreign" from "missing" clusters
    owners: DashMap<ClusterId, RunId, RandomState>,
    next_run: AtomicU64,
    next_cluster: AtomicU64,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    pub fn new() -> Self {
        Self {
            runs: DashMap::with_hasher(RandomState::new()),
            owners: DashMap::with_hasher(RandomState::new()),
            next_run: AtomicU64::new(1),
            next_cluster: AtomicU64::new(1),
        }
    }

    /// Run `f` on the run while holding its entry.
    fn with_run<T>(&self, run_id: RunId, f: impl FnOnce(&mut ClusteringRun) -> Result<T>) -> Result<T> {
        let mut run = self.runs.get_mut(&run_id).ok_or(Error::NotFound {
            kind: "clustering run",
            id: run_id,
        })?;
        f(&mut run)
    }

    /// Transfer targets: missing and foreign clusters are client errors.
    fn check_target(&self, run: &ClusteringRun, cluster: ClusterId) -> std::result::Result<(), ValidationError> {
        if run.clusters.contains_key(&cluster) {
            return Ok(());
        }
        match self.owners.get(&cluster).map(|owner| *owner) {
            Some(_) => Err(ValidationError::ClusterNotInRun { cluster, run: run.id }),
            None => Err(ValidationError::ClusterNotFound { cluster }),
        }
    }

    fn next_cluster_id(&self) -> ClusterId {
        self.next_cluster.fetch_add(1, Ordering::Relaxed)
    }

    pub fn create_run(&self, params: ClusteringParams) -> Result<RunId> {
        params.validate()?;
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let run = ClusteringRun {
            id,
            params,
            ignored_ids: IndexSet::new(),
            status: RunStatus::Created,
            error: None,
            clusters: IndexMap::new(),
        };
        self.runs.insert(id, run);
        info!(run = id, "clustering run created");
        Ok(id)
    }

    pub fn run(&self, run_id: RunId) -> Result<ClusteringRun> {
        self.runs
            .get(&run_id)
            .map(|r| r.clone())
            .ok_or(Error::NotFound { kind: "clustering run", id: run_id })
    }

    pub fn runs(&self) -> Vec<ClusteringRun> {
        let mut runs: Vec<ClusteringRun> = self.runs.iter().map(|r| r.clone()).collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    /// Delete the run and all of its clusters.
    pub fn delete_run(&self, run_id: RunId) -> Result<()> {
        let (_, run) = self.runs.remove(&run_id).ok_or(Error::NotFound {
            kind: "clustering run",
            id: run_id,
        })?;
        for cluster in run.clusters.keys() {
            self.owners.remove(cluster);
        }
        info!(run = run_id, clusters = run.clusters.len(), "clustering run deleted");
        Ok(())
    }

    pub fn cluster(&self, run_id: RunId, cluster_id: ClusterId) -> Result<Cluster> {
        let run = self.runs.get(&run_id).ok_or(Error::NotFound {
            kind: "clustering run",
            id: run_id,
        })?;
        run.cluster(cluster_id)
            .cloned()
            .ok_or(Error::NotFound { kind: "cluster", id: cluster_id })
    }

    pub fn update_description(&self, run_id: RunId, description: &str) -> Result<()> {
        self.with_run(run_id, |run| {
            run.params.description = description.to_string();
            Ok(())
        })
    }

    pub fn update_stop_words(&self, run_id: RunId, stop_words: Vec<String>) -> Result<()> {
        self.with_run(run_id, |run| {
            run.params.stop_words = stop_words;
            Ok(())
        })
    }

    /// Add ids to the ignore list, dropping them from whatever cluster holds them.
    pub fn ignore_documents(&self, run_id: RunId, ids: &[DocumentId]) -> Result<()> {
        self.with_run(run_id, |run| {
            for id in dedup(ids) {
                for cluster in run.clusters.values_mut() {
                    cluster.document_ids.shift_remove(&id);
                }
                run.ignored_ids.insert(id);
            }
            Ok(())
        })
    }

    pub(crate) fn mark_running(&self, run_id: RunId) -> Result<()> {
        self.with_run(run_id, |run| {
            if run.status == RunStatus::Running {
                return Err(Error::InvalidState {
                    kind: "clustering run",
                    id: run_id,
                    status: run.status.as_str().to_string(),
                    action: "starting",
                });
            }
            run.status = RunStatus::Running;
            run.error = None;
            Ok(())
        })
    }

    /// Store the engine's clusters and mark the run completed.
    /// Replaces clusters of an earlier attempt; empty drafts are skipped.
    pub(crate) fn complete(&self, run_id: RunId, drafts: Vec<ClusterDraft>) -> Result<Vec<ClusterId>> {
        self.with_run(run_id, |run| {
            for old in run.clusters.keys() {
                self.owners.remove(old);
            }
            run.clusters.clear();
            let mut created = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let document_ids: IndexSet<DocumentId> = draft
                    .document_ids
                    .into_iter()
                    .filter(|id| !run.ignored_ids.contains(id))
                    .collect();
                if document_ids.is_empty() {
                    continue;
                }
                let id = self.next_cluster_id();
                run.clusters.insert(
                    id,
                    Cluster {
                        id,
                        run_id,
                        document_ids,
                        significant_terms: draft.significant_terms,
                        intracluster_similarity: draft.intracluster_similarity,
                    },
                );
                self.owners.insert(id, run_id);
                created.push(id);
            }
            run.status = RunStatus::Completed;
            info!(run = run_id, clusters = created.len(), "clustering run completed");
            Ok(created)
        })
    }

    /// Mark the run failed. Clusters are rolled back so a failed run never
    /// carries cluster data.
    pub(crate) fn fail(&self, run_id: RunId, message: String) -> Result<()> {
        self.with_run(run_id, |run| {
            for old in run.clusters.keys() {
                self.owners.remove(old);
            }
            run.clusters.clear();
            warn!(run = run_id, error = %message, "clustering run failed");
            run.status = RunStatus::Failed;
            run.error = Some(message);
            Ok(())
        })
    }

    /// Add documents to a cluster.
    /// Ids already in this cluster are skipped; ids in a sibling cluster or on
    /// the ignore list are rejected and nothing is added.
    pub fn add_documents(&self, run_id: RunId, cluster_id: ClusterId, ids: &[DocumentId]) -> Result<usize> {
        self.with_run(run_id, |run| {
            run.cluster_mut(cluster_id)?;
            let ids = dedup(ids);
            for id in &ids {
                if run.ignored_ids.contains(id) {
                    return Err(ValidationError::IgnoredDocument { document: id.clone() }.into());
                }
                if let Some(other) = run.clusters.values().find(|c| c.id != cluster_id && c.document_ids.contains(id)) {
                    return Err(ValidationError::DuplicateMembership {
                        document: id.clone(),
                        cluster: other.id,
                    }
                    .into());
                }
            }
            let cluster = run.cluster_mut(cluster_id)?;
            let before = cluster.document_ids.len();
            cluster.document_ids.extend(ids);
            let added = cluster.document_ids.len() - before;
            debug!(run = run_id, cluster = cluster_id, added, "documents added");
            Ok(added)
        })
    }

    /// Remove documents from a cluster; ids not in it are ignored.
    pub fn remove_documents(&self, run_id: RunId, cluster_id: ClusterId, ids: &[DocumentId]) -> Result<usize> {
        self.with_run(run_id, |run| {
            let cluster = run.cluster_mut(cluster_id)?;
            let removed = ids.iter().filter(|id| cluster.document_ids.shift_remove(*id)).count();
            debug!(run = run_id, cluster = cluster_id, removed, "documents removed");
            Ok(removed)
        })
    }

    /// Move the ids that are in `from` over to `to`; other ids are ignored.
    pub fn transfer_documents(&self, run_id: RunId, from: ClusterId, ids: &[DocumentId], to: ClusterId) -> Result<usize> {
        self.with_run(run_id, |run| {
            run.cluster_mut(from)?;
            self.check_target(run, to)?;
            if from == to {
                return Ok(0);
            }
            let source = run.cluster_mut(from)?;
            let moved: Vec<DocumentId> = dedup(ids)
                .into_iter()
                .filter(|id| source.document_ids.shift_remove(id))
                .collect();
            let count = moved.len();
            run.cluster_mut(to)?.document_ids.extend(moved);
            debug!(run = run_id, from, to, moved = count, "documents transferred");
            Ok(count)
        })
    }

    /// Move the cluster's documents to the ignore list and delete the cluster.
    pub fn ignore_and_delete(&self, run_id: RunId, cluster_id: ClusterId) -> Result<usize> {
        self.with_run(run_id, |run| {
            let cluster = run
                .clusters
                .shift_remove(&cluster_id)
                .ok_or(Error::NotFound { kind: "cluster", id: cluster_id })?;
            self.owners.remove(&cluster_id);
            let count = cluster.document_ids.len();
            run.ignored_ids.extend(cluster.document_ids);
            info!(run = run_id, cluster = cluster_id, ignored = count, "cluster ignored and deleted");
            Ok(count)
        })
    }

    pub fn delete_cluster(&self, run_id: RunId, cluster_id: ClusterId) -> Result<()> {
        self.with_run(run_id, |run| {
            run.clusters
                .shift_remove(&cluster_id)
                .ok_or(Error::NotFound { kind: "cluster", id: cluster_id })?;
            self.owners.remove(&cluster_id);
            Ok(())
        })
    }

    /// Move every document of `sources` into `target` and delete the sources.
    pub fn merge_clusters(&self, run_id: RunId, target: ClusterId, sources: &[ClusterId]) -> Result<usize> {
        self.with_run(run_id, |run| {
            run.cluster_mut(target)?;
            for &source in sources {
                self.check_target(run, source)?;
            }
            let mut moved = Vec::new();
            for &source in sources.iter().filter(|&&s| s != target) {
                if let Some(cluster) = run.clusters.shift_remove(&source) {
                    self.owners.remove(&source);
                    moved.extend(cluster.document_ids);
                }
            }
            let count = moved.len();
            run.cluster_mut(target)?.document_ids.extend(moved);
            info!(run = run_id, target, merged = sources.len(), "clusters merged");
            Ok(count)
        })
    }

    /// Move `ids` out of the cluster into a new sibling cluster.
    /// Ids not in the cluster are ignored.
    pub fn split_cluster(&self, run_id: RunId, cluster_id: ClusterId, ids: &[DocumentId]) -> Result<ClusterId> {
        self.with_run(run_id, |run| {
            let source = run.cluster_mut(cluster_id)?;
            let moved: IndexSet<DocumentId> = dedup(ids)
                .into_iter()
                .filter(|id| source.document_ids.shift_remove(id))
                .collect();
            if moved.is_empty() {
                return Err(ValidationError::InvalidParameter {
                    name: "ids".to_string(),
                    reason: format!("none of the ids belong to cluster {}", cluster_id),
                }
                .into());
            }
            let id = self.next_cluster_id();
            run.clusters.insert(
                id,
                Cluster {
                    id,
                    run_id,
                    document_ids: moved,
                    significant_terms: Vec::new(),
                    intracluster_similarity: 0.0,
                },
            );
            self.owners.insert(id, run_id);
            debug!(run = run_id, from = cluster_id, new = id, "cluster split");
            Ok(id)
        })
    }

    /// Attach `fact` to every document currently in the cluster.
    pub fn tag_cluster(&self, run_id: RunId, cluster_id: ClusterId, fact: &Fact, writer: &dyn FactWriter) -> Result<usize> {
        let cluster = self.cluster(run_id, cluster_id)?;
        for id in &cluster.document_ids {
            writer.attach_fact(id, fact.clone())?;
        }
        info!(
            run = run_id,
            cluster = cluster_id,
            fact = %fact.fact,
            value = %fact.str_val,
            tagged = cluster.document_ids.len(),
            "cluster tagged"
        );
        Ok(cluster.document_ids.len())
    }
}
