//! Document source capability.
//!
//! The search backend is consumed through [`DocumentSource`]: a filtered
//! document count plus a restartable, paginated scroll. [`Scroll`] turns the
//! page-by-page contract into an iterator of batches.

pub mod filter;
pub mod memory;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub use filter::Filter;
pub use memory::InMemorySource;

/// `(index, id)`: the collection a document lives in and its id there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub index: String,
    pub id: String,
}

impl DocumentId {
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index, self.id)
    }
}

/// A named label attached to a document.
/// `spans` are character offsets into `doc_path`; `[[0, 0]]` means no location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub fact: String,
    pub str_val: String,
    pub spans: Vec<[usize; 2]>,
    pub doc_path: String,
}

impl Fact {
    /// Document-level fact without a location.
    pub fn new(fact: impl Into<String>, str_val: impl Into<String>, doc_path: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            str_val: str_val.into(),
            spans: vec![[0, 0]],
            doc_path: doc_path.into(),
        }
    }

    pub fn with_spans(mut self, spans: Vec<[usize; 2]>) -> Self {
        self.spans = spans;
        self
    }

    /// Spans with a positive length; the `[0, 0]` sentinel is dropped.
    pub fn entity_spans(&self) -> impl Iterator<Item = [usize; 2]> + '_ {
        self.spans.iter().copied().filter(|[start, end]| end > start)
    }

    pub fn has_entity_spans(&self) -> bool {
        self.entity_spans().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    /// Text fields keyed by dotted path.
    pub fields: IndexMap<String, String>,
    pub facts: Vec<Fact>,
}

impl Document {
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            fields: IndexMap::new(),
            facts: Vec::new(),
        }
    }

    pub fn with_field(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(path.into(), text.into());
        self
    }

    pub fn with_fact(mut self, fact: Fact) -> Self {
        self.facts.push(fact);
        self
    }

    /// Concatenated text of the given fields, in the given order.
    pub fn text_of(&self, fields: &[String]) -> String {
        fields
            .iter()
            .filter_map(|path| self.fields.get(path))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn facts_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Fact> + 'a {
        self.facts.iter().filter(move |f| f.fact == name)
    }

    /// Keep only the listed fields. An empty list keeps everything.
    pub fn project(mut self, fields: &[String]) -> Self {
        if !fields.is_empty() {
            self.fields.retain(|path, _| fields.iter().any(|f| f == path));
        }
        self
    }
}

/// Opaque continuation token handed out by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollToken(pub String);

#[derive(Debug, Clone, Copy)]
pub struct ScrollRequest<'a> {
    pub filter: &'a Filter,
    /// Field projection; empty means all fields.
    pub fields: &'a [String],
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub documents: Vec<Document>,
    /// `None` once the scroll is exhausted.
    pub next: Option<ScrollToken>,
}

pub trait DocumentSource: Send + Sync {
    /// Number of documents matching `filter` at evaluation time.
    fn count(&self, filter: &Filter) -> Result<u64, BackendError>;

    /// Fetch one page. `token` is `None` for the first page.
    fn scroll(&self, request: &ScrollRequest<'_>, token: Option<&ScrollToken>) -> Result<ScrollPage, BackendError>;
}

/// Persists facts on documents (used when tagging a cluster).
pub trait FactWriter: Send + Sync {
    fn attach_fact(&self, id: &DocumentId, fact: Fact) -> Result<(), BackendError>;
}

/// Iterator over scroll batches.
pub struct Scroll<'a> {
    source: &'a dyn DocumentSource,
    filter: &'a Filter,
    fields: &'a [String],
    batch_size: usize,
    token: Option<ScrollToken>,
    done: bool,
}

impl<'a> Scroll<'a> {
    pub fn new(source: &'a dyn DocumentSource, filter: &'a Filter, fields: &'a [String], batch_size: usize) -> Self {
        Self {
            source,
            filter,
            fields,
            batch_size: batch_size.max(1),
            token: None,
            done: false,
        }
    }
}

impl Iterator for Scroll<'_> {
    type Item = Result<Vec<Document>, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let request = ScrollRequest {
            filter: self.filter,
            fields: self.fields,
            batch_size: self.batch_size,
        };
        match self.source.scroll(&request, self.token.as_ref()) {
            Ok(page) => {
                self.token = page.next;
                if self.token.is_none() {
                    self.done = true;
                }
                if page.documents.is_empty() {
                    self.done = true;
                    return None;
                }
                Some(Ok(page.documents))
            }
            Err(err) => {
                // a failed page ends the scroll
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_spans_skip_sentinel() {
        let fact = Fact::new("PER", "Alice", "text").with_spans(vec![[0, 0], [3, 8]]);
        assert_eq!(fact.entity_spans().collect::<Vec<_>>(), vec![[3, 8]]);
        assert!(!Fact::new("TAG", "x", "text").has_entity_spans());
    }

    #[test]
    fn text_of_joins_fields_in_order() {
        let doc = Document::new(DocumentId::new("i", "1"))
            .with_field("title", "Hello")
            .with_field("body", "world");
        assert_eq!(doc.text_of(&["body".into(), "title".into()]), "world\nHello");
        assert_eq!(doc.text_of(&["missing".into()]), "");
    }

    #[test]
    fn scroll_walks_all_pages() {
        let source = InMemorySource::new(
            (0..7).map(|i| Document::new(DocumentId::new("i", i.to_string())).with_field("text", "a")),
        );
        let filter = Filter::All;
        let batches: Vec<_> = Scroll::new(&source, &filter, &[], 3).collect::<Result<_, _>>().unwrap();
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 3, 1]);
    }
}
