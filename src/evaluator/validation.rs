//! Pre-flight checks of an evaluation.
//!
//! [`survey`] scans the selected documents once, [`plan`] checks the request
//! against what was found and fixes the class list for the whole job.

use std::collections::{BTreeSet, HashMap};

use ahash::RandomState;
use tracing::debug;

use crate::error::{BackendError, ValidationError};
use crate::evaluator::labels::{LabelExtractor, ONE_HOT_CLASSES};
use crate::evaluator::{EvaluationParams, EvaluationType};
use crate::source::{DocumentSource, Scroll};

/// Bytes per unit and class of the indicator matrices
const BYTES_PER_LABEL: u64 = 2;

/// What the scan saw of one fact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSurvey {
    pub values: BTreeSet<String>,
    pub doc_paths: BTreeSet<String>,
    pub occurrences: u64,
    /// Spans with a positive length
    pub entity_spans: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Survey {
    pub document_count: u64,
    pub facts: HashMap<String, FactSurvey, RandomState>,
    /// Whitespace tokens per field, summed over documents
    pub field_tokens: HashMap<String, u64, RandomState>,
}

/// Scan the documents selected by `params.filter`, recording the two facts involved.
pub fn survey(source: &dyn DocumentSource, params: &EvaluationParams, batch_size: usize) -> Result<Survey, BackendError> {
    let mut survey = Survey::default();
    let fields: Vec<String> = params.field.iter().cloned().collect();
    let track_tokens = params.evaluation_type == EvaluationType::Entity && params.token_based;

    for batch in Scroll::new(source, &params.filter, &fields, batch_size) {
        for document in batch? {
            survey.document_count += 1;
            for fact in &document.facts {
                if fact.fact != params.true_fact && fact.fact != params.predicted_fact {
                    continue;
                }
                let entry = survey.facts.entry(fact.fact.clone()).or_default();
                entry.values.insert(fact.str_val.clone());
                entry.doc_paths.insert(fact.doc_path.clone());
                entry.occurrences += 1;
                entry.entity_spans += fact.entity_spans().count() as u64;
            }
            if track_tokens {
                for (path, text) in &document.fields {
                    *survey.field_tokens.entry(path.clone()).or_insert(0) += text.split_whitespace().count() as u64;
                }
            }
        }
    }
    debug!(documents = survey.document_count, facts = survey.facts.len(), "evaluation survey done");
    Ok(survey)
}

/// A validated evaluation, ready to score.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationPlan {
    pub extractor: LabelExtractor,
    pub document_count: u64,
    /// Upper estimate of label units
    pub estimated_units: u64,
}

impl EvaluationPlan {
    pub fn classes(&self) -> &[String] {
        self.extractor.classes()
    }

    /// Memory needed to hold true and predicted indicator matrices.
    pub fn estimated_bytes(&self) -> u64 {
        self.estimated_units
            .saturating_mul(self.classes().len() as u64)
            .saturating_mul(BYTES_PER_LABEL)
    }
}

fn fact_survey<'a>(survey: &'a Survey, fact: &str) -> Result<&'a FactSurvey, ValidationError> {
    survey.facts.get(fact).ok_or_else(|| ValidationError::UnknownFact { fact: fact.to_string() })
}

fn check_value(fact: &str, value: Option<&String>, found: &FactSurvey) -> Result<(), ValidationError> {
    let value = value.ok_or_else(|| ValidationError::MissingFactValue { fact: fact.to_string() })?;
    if !found.values.contains(value) {
        return Err(ValidationError::UnknownFactValue {
            fact: fact.to_string(),
            value: value.clone(),
        });
    }
    Ok(())
}

/// The one field both entity facts point into.
fn entity_field(params: &EvaluationParams, facts: [(&str, &FactSurvey); 2]) -> Result<String, ValidationError> {
    for (name, found) in facts {
        if found.entity_spans == 0 {
            return Err(ValidationError::NonEntityFact { fact: name.to_string() });
        }
    }
    if let Some(field) = &params.field {
        for (name, found) in facts {
            if !found.doc_paths.contains(field) {
                return Err(ValidationError::FactNotInField {
                    fact: name.to_string(),
                    field: field.clone(),
                });
            }
        }
        return Ok(field.clone());
    }
    for (name, found) in facts {
        if found.doc_paths.len() > 1 {
            return Err(ValidationError::AmbiguousFactField {
                fact: name.to_string(),
                fields: found.doc_paths.iter().cloned().collect(),
            });
        }
    }
    let [(_, truth), (predicted_name, predicted)] = facts;
    let field = truth.doc_paths.iter().next().cloned().unwrap_or_default();
    if !predicted.doc_paths.contains(&field) {
        return Err(ValidationError::FactNotInField {
            fact: predicted_name.to_string(),
            field,
        });
    }
    Ok(field)
}

/// Check `params` against the survey and fix the class list.
pub fn plan(params: &EvaluationParams, survey: &Survey) -> Result<EvaluationPlan, ValidationError> {
    if !params.average_function.is_compatible_with(params.evaluation_type) {
        return Err(ValidationError::IncompatibleAverage {
            average: params.average_function.to_string(),
            evaluation_type: params.evaluation_type.to_string(),
        });
    }
    let truth = fact_survey(survey, &params.true_fact)?;
    let predicted = fact_survey(survey, &params.predicted_fact)?;
    let one_hot = || ONE_HOT_CLASSES.iter().map(|c| c.to_string()).collect::<Vec<_>>();

    let (classes, field, estimated_units) = match params.evaluation_type {
        EvaluationType::Binary => {
            check_value(&params.true_fact, params.true_fact_value.as_ref(), truth)?;
            check_value(&params.predicted_fact, params.predicted_fact_value.as_ref(), predicted)?;
            (one_hot(), None, survey.document_count)
        }
        EvaluationType::Multilabel => {
            let classes: Vec<String> = truth.values.union(&predicted.values).cloned().collect();
            (classes, None, survey.document_count)
        }
        EvaluationType::Entity => {
            let field = entity_field(
                params,
                [(params.true_fact.as_str(), truth), (params.predicted_fact.as_str(), predicted)],
            )?;
            let units = if params.token_based {
                survey.field_tokens.get(&field).copied().unwrap_or(0)
            } else {
                truth.entity_spans + predicted.entity_spans
            };
            (one_hot(), Some(field), units)
        }
    };

    Ok(EvaluationPlan {
        extractor: LabelExtractor::new(params, classes, field),
        document_count: survey.document_count,
        estimated_units,
    })
}
