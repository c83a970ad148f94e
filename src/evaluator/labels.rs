//! Turning document facts into comparable label units.
//!
//! A unit is whatever gets one true and one predicted label: the document in
//! binary and multilabel evaluation, a token or a span in entity evaluation.

use std::collections::BTreeSet;

use crate::evaluator::{EvaluationParams, EvaluationType};
use crate::source::Document;
use crate::vectorizer::analyzer::token_spans;

/// Class names of one-hot evaluations, in index order.
pub const ONE_HOT_CLASSES: [&str; 2] = ["false", "true"];
const NEGATIVE: usize = 0;
const POSITIVE: usize = 1;

/// Sorted, de-duplicated class indices on each side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelUnit {
    pub truth: Vec<usize>,
    pub predicted: Vec<usize>,
}

impl LabelUnit {
    pub fn one_hot(truth: bool, predicted: bool) -> Self {
        let class = |hit: bool| vec![if hit { POSITIVE } else { NEGATIVE }];
        Self {
            truth: class(truth),
            predicted: class(predicted),
        }
    }
}

fn overlaps(a: [usize; 2], b: [usize; 2]) -> bool {
    a[0] < b[1] && b[0] < a[1]
}

/// Reads label units off documents for one evaluation.
/// The class list is fixed when the extractor is built; values outside it are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelExtractor {
    evaluation_type: EvaluationType,
    true_fact: String,
    predicted_fact: String,
    true_value: Option<String>,
    predicted_value: Option<String>,
    classes: Vec<String>,
    field: Option<String>,
    token_based: bool,
}

impl LabelExtractor {
    /// # Arguments
    /// * `params` - evaluation being run
    /// * `classes` - class names; sorted before use
    /// * `field` - field the entity spans point into
    pub fn new(params: &EvaluationParams, mut classes: Vec<String>, field: Option<String>) -> Self {
        classes.sort();
        classes.dedup();
        Self {
            evaluation_type: params.evaluation_type,
            true_fact: params.true_fact.clone(),
            predicted_fact: params.predicted_fact.clone(),
            true_value: params.true_fact_value.clone(),
            predicted_value: params.predicted_fact_value.clone(),
            classes,
            field,
            token_based: params.token_based,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn evaluation_type(&self) -> EvaluationType {
        self.evaluation_type
    }

    /// Fields the source has to return. Facts come with every document.
    pub fn required_fields(&self) -> Vec<String> {
        match (&self.field, self.evaluation_type, self.token_based) {
            (Some(field), EvaluationType::Entity, true) => vec![field.clone()],
            _ => Vec::new(),
        }
    }

    fn class_index(&self, value: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(value)).ok()
    }

    fn has_value(doc: &Document, fact: &str, value: Option<&str>) -> bool {
        doc.facts_named(fact).any(|f| value.map_or(true, |v| f.str_val == v))
    }

    fn class_set(&self, doc: &Document, fact: &str) -> Vec<usize> {
        let set: BTreeSet<usize> = doc
            .facts_named(fact)
            .filter_map(|f| self.class_index(&f.str_val))
            .collect();
        set.into_iter().collect()
    }

    fn spans_in_field(&self, doc: &Document, fact: &str) -> BTreeSet<[usize; 2]> {
        doc.facts_named(fact)
            .filter(|f| self.field.as_deref().map_or(true, |field| f.doc_path == field))
            .flat_map(|f| f.entity_spans())
            .collect()
    }

    /// Append the units of `doc` to `out`.
    pub fn extract_into(&self, doc: &Document, out: &mut Vec<LabelUnit>) {
        match self.evaluation_type {
            EvaluationType::Binary => out.push(LabelUnit::one_hot(
                Self::has_value(doc, &self.true_fact, self.true_value.as_deref()),
                Self::has_value(doc, &self.predicted_fact, self.predicted_value.as_deref()),
            )),
            EvaluationType::Multilabel => out.push(LabelUnit {
                truth: self.class_set(doc, &self.true_fact),
                predicted: self.class_set(doc, &self.predicted_fact),
            }),
            EvaluationType::Entity => {
                let truth = self.spans_in_field(doc, &self.true_fact);
                let predicted = self.spans_in_field(doc, &self.predicted_fact);
                if self.token_based {
                    let text = self.field.as_ref().and_then(|field| doc.fields.get(field));
                    let Some(text) = text else { return };
                    for token in token_spans(text) {
                        out.push(LabelUnit::one_hot(
                            truth.iter().any(|&s| overlaps(s, token)),
                            predicted.iter().any(|&s| overlaps(s, token)),
                        ));
                    }
                } else {
                    for span in truth.union(&predicted) {
                        out.push(LabelUnit::one_hot(truth.contains(span), predicted.contains(span)));
                    }
                }
            }
        }
    }

    pub fn extract(&self, docs: &[Document]) -> Vec<LabelUnit> {
        let mut units = Vec::with_capacity(docs.len());
        for doc in docs {
            self.extract_into(doc, &mut units);
        }
        units
    }
}
