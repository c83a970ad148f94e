use parking_lot::RwLock;

use crate::error::BackendError;
use crate::source::{Document, DocumentId, DocumentSource, Fact, FactWriter, Filter, ScrollPage, ScrollRequest, ScrollToken};

/// In-process document source.
/// Scroll tokens encode the position in the filtered sequence, so a scroll
/// restarted from a token continues where it left off.
#[derive(Debug, Default)]
pub struct InMemorySource {
    documents: RwLock<Vec<Document>>,
}

impl InMemorySource {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        Self {
            documents: RwLock::new(documents.into_iter().collect()),
        }
    }

    pub fn push(&self, document: Document) {
        self.documents.write().push(document);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.documents.read().iter().find(|d| &d.id == id).cloned()
    }

    fn decode_token(token: &ScrollToken) -> Result<usize, BackendError> {
        token
            .0
            .strip_prefix("offset:")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| BackendError::new(format!("malformed scroll token '{}'", token.0)))
    }
}

impl DocumentSource for InMemorySource {
    fn count(&self, filter: &Filter) -> Result<u64, BackendError> {
        Ok(self.documents.read().iter().filter(|d| filter.matches(d)).count() as u64)
    }

    fn scroll(&self, request: &ScrollRequest<'_>, token: Option<&ScrollToken>) -> Result<ScrollPage, BackendError> {
        let offset = token.map(Self::decode_token).transpose()?.unwrap_or(0);
        let documents = self.documents.read();
        let mut matching = documents.iter().filter(|d| request.filter.matches(d)).skip(offset);
        let page: Vec<Document> = matching
            .by_ref()
            .take(request.batch_size)
            .map(|d| d.clone().project(request.fields))
            .collect();
        let has_more = matching.next().is_some();
        let next = has_more.then(|| ScrollToken(format!("offset:{}", offset + page.len())));
        Ok(ScrollPage { documents: page, next })
    }
}

impl FactWriter for InMemorySource {
    fn attach_fact(&self, id: &DocumentId, fact: Fact) -> Result<(), BackendError> {
        let mut documents = self.documents.write();
        let doc = documents
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| BackendError::new(format!("document {} not found", id)))?;
        if !doc.facts.contains(&fact) {
            doc.facts.push(fact);
        }
        Ok(())
    }
}
