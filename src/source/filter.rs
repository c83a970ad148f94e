use serde::{Deserialize, Serialize};

use crate::source::{Document, DocumentId};
use crate::vectorizer::analyzer::tokenize;

/// Document filter.
/// Combines term, fact and id conditions with boolean operators.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Filter {
    /// Match every document
    #[default]
    All,
    /// Field text contains the term (case-insensitive, token match)
    Term { field: String, term: String },
    /// Document carries the fact, optionally with the given value
    HasFact { fact: String, value: Option<String> },
    Ids(Vec<DocumentId>),
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    pub fn term(field: &str, term: &str) -> Self {
        Filter::Term {
            field: field.to_string(),
            term: term.to_lowercase(),
        }
    }

    pub fn has_fact(fact: &str, value: Option<&str>) -> Self {
        Filter::HasFact {
            fact: fact.to_string(),
            value: value.map(str::to_string),
        }
    }

    pub fn not(inner: Filter) -> Self {
        Filter::Not(Box::new(inner))
    }

    pub fn and(left: Filter, right: Filter) -> Self {
        Filter::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Filter, right: Filter) -> Self {
        Filter::Or(Box::new(left), Box::new(right))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Term { field, term } => doc
                .fields
                .get(field)
                .map(|text| tokenize(text).any(|tok| tok == *term))
                .unwrap_or(false),
            Filter::HasFact { fact, value } => doc
                .facts_named(fact)
                .any(|f| value.as_ref().map_or(true, |v| &f.str_val == v)),
            Filter::Ids(ids) => ids.contains(&doc.id),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::And(left, right) => left.matches(doc) && right.matches(doc),
            Filter::Or(left, right) => left.matches(doc) || right.matches(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Fact;

    fn doc() -> Document {
        Document::new(DocumentId::new("news", "1"))
            .with_field("text", "Rust is Fast")
            .with_fact(Fact::new("TOPIC", "tech", "text"))
    }

    #[test]
    fn term_is_case_insensitive() {
        assert!(Filter::term("text", "FAST").matches(&doc()));
        assert!(!Filter::term("text", "slow").matches(&doc()));
        assert!(!Filter::term("title", "rust").matches(&doc()));
    }

    #[test]
    fn boolean_combinations() {
        let tech = Filter::has_fact("TOPIC", Some("tech"));
        let sport = Filter::has_fact("TOPIC", Some("sport"));
        assert!(Filter::and(tech.clone(), Filter::not(sport.clone())).matches(&doc()));
        assert!(Filter::or(sport.clone(), tech).matches(&doc()));
        assert!(!Filter::and(Filter::All, sport).matches(&doc()));
        assert!(Filter::has_fact("TOPIC", None).matches(&doc()));
    }
}
