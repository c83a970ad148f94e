//! Folding batch scores into totals and querying per-class results.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result, ValidationError};
use crate::evaluator::scoring::{averaged, BatchScores, ClassCounts};
use crate::evaluator::{AverageFunction, EvaluationType, IndividualResult, Metrics};

/// Square matrix; rows are true classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    size: usize,
    cells: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![0; size * size],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> u64 {
        self.cells[row * self.size + col]
    }

    pub fn increment(&mut self, row: usize, col: usize) {
        self.cells[row * self.size + col] += 1;
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().sum()
    }

    /// Elementwise sum into `self`.
    pub fn fold_into(&mut self, other: &ConfusionMatrix) -> Result<()> {
        if self.size != other.size {
            return Err(Error::ShapeMismatch {
                expected: self.size,
                found: other.size,
            });
        }
        self.cells.iter_mut().zip(&other.cells).for_each(|(a, b)| *a += b);
        Ok(())
    }

    pub fn rows(&self) -> Vec<Vec<u64>> {
        if self.size == 0 {
            return Vec::new();
        }
        self.cells.chunks(self.size).map(<[u64]>::to_vec).collect()
    }
}

/// Elementwise sum of two matrices over the same class order.
pub fn fold(a: &ConfusionMatrix, b: &ConfusionMatrix) -> Result<ConfusionMatrix> {
    let mut out = a.clone();
    out.fold_into(b)?;
    Ok(out)
}

/// Final scores of an evaluation, whichever way they were computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Scores {
    pub metrics: Metrics,
    pub confusion: ConfusionMatrix,
    pub counts: Vec<ClassCounts>,
    pub units: u64,
    /// Averaged metrics are a running mean, not an exact value
    pub imprecise: bool,
}

impl Scores {
    /// Scores of a batch holding every unit.
    pub fn exact(batch: BatchScores, evaluation_type: EvaluationType, average: AverageFunction) -> Self {
        Self {
            metrics: batch.metrics(evaluation_type, average),
            confusion: batch.confusion,
            counts: batch.counts,
            units: batch.units,
            imprecise: false,
        }
    }

    pub fn n_true_classes(&self) -> usize {
        self.counts.iter().filter(|c| c.support() > 0).count()
    }

    pub fn n_predicted_classes(&self) -> usize {
        self.counts.iter().filter(|c| c.predicted() > 0).count()
    }

    /// Per-class results keyed by class name, in class order.
    pub fn individual_results(&self, classes: &[String]) -> IndexMap<String, IndividualResult> {
        classes
            .iter()
            .zip(&self.counts)
            .map(|(class, counts)| (class.clone(), counts.individual_result()))
            .collect()
    }
}

/// Running totals of an incremental evaluation.
///
/// Counts and the confusion matrix are summed exactly. Averages other than
/// `micro` are the mean of per-batch values weighted by batch size.
#[derive(Debug, Clone)]
pub struct ScoreAccumulator {
    evaluation_type: EvaluationType,
    average: AverageFunction,
    counts: Vec<ClassCounts>,
    confusion: ConfusionMatrix,
    units: u64,
    exact_matches: u64,
    weighted_sum: Metrics,
    batches: usize,
}

impl ScoreAccumulator {
    pub fn new(num_classes: usize, evaluation_type: EvaluationType, average: AverageFunction) -> Self {
        Self {
            evaluation_type,
            average,
            counts: vec![ClassCounts::default(); num_classes],
            confusion: ConfusionMatrix::new(num_classes),
            units: 0,
            exact_matches: 0,
            weighted_sum: Metrics::default(),
            batches: 0,
        }
    }

    pub fn fold(&mut self, batch: &BatchScores) -> Result<()> {
        if batch.num_classes() != self.counts.len() {
            return Err(Error::ShapeMismatch {
                expected: self.counts.len(),
                found: batch.num_classes(),
            });
        }
        self.confusion.fold_into(&batch.confusion)?;
        self.counts.iter_mut().zip(&batch.counts).for_each(|(a, b)| a.merge(b));
        self.units += batch.units;
        self.exact_matches += batch.exact_matches;
        let local = batch.metrics(self.evaluation_type, self.average);
        self.weighted_sum = self.weighted_sum.plus(&local.scaled(batch.units as f64));
        self.batches += 1;
        debug!(batch = self.batches, units = batch.units, total_units = self.units, "batch folded");
        Ok(())
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn finish(self) -> Scores {
        let accuracy = if self.evaluation_type.is_one_hot() && self.units > 0 {
            self.exact_matches as f64 / self.units as f64
        } else {
            0.0
        };
        let imprecise = !self.average.is_decomposable();
        let (precision, recall, f1_score) = if imprecise {
            let n = self.units as f64;
            if n == 0.0 {
                (0.0, 0.0, 0.0)
            } else {
                (
                    self.weighted_sum.precision / n,
                    self.weighted_sum.recall / n,
                    self.weighted_sum.f1_score / n,
                )
            }
        } else {
            averaged(&self.counts, self.average)
        };
        Scores {
            metrics: Metrics {
                accuracy,
                precision,
                recall,
                f1_score,
            },
            confusion: self.confusion,
            counts: self.counts,
            units: self.units,
            imprecise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Accuracy,
    Precision,
    Recall,
    F1Score,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricName::Accuracy => "accuracy",
            MetricName::Precision => "precision",
            MetricName::Recall => "recall",
            MetricName::F1Score => "f1_score",
        })
    }
}

impl FromStr for MetricName {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accuracy" => Ok(MetricName::Accuracy),
            "precision" => Ok(MetricName::Precision),
            "recall" => Ok(MetricName::Recall),
            "f1_score" | "f1" => Ok(MetricName::F1Score),
            _ => Err(ValidationError::InvalidParameter {
                name: "metric".to_string(),
                reason: format!("unknown metric '{}'", s),
            }),
        }
    }
}

/// Inclusive bounds on one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRestriction {
    pub metric: MetricName,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Which classes of an individual breakdown to keep. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub min_count: Option<u64>,
    pub max_count: Option<u64>,
    pub restrictions: Vec<MetricRestriction>,
}

impl ResultFilter {
    pub fn count_range(min_count: Option<u64>, max_count: Option<u64>) -> Self {
        Self {
            min_count,
            max_count,
            restrictions: Vec::new(),
        }
    }

    pub fn with_restriction(mut self, metric: MetricName, min: Option<f64>, max: Option<f64>) -> Self {
        self.restrictions.push(MetricRestriction { metric, min, max });
        self
    }

    pub fn matches(&self, result: &IndividualResult) -> bool {
        if self.min_count.is_some_and(|min| result.count < min) || self.max_count.is_some_and(|max| result.count > max) {
            return false;
        }
        self.restrictions.iter().all(|r| {
            let value = result.metrics.get(r.metric);
            r.min.map_or(true, |min| value >= min) && r.max.map_or(true, |max| value <= max)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredAverage {
    pub count: usize,
    pub classes: Vec<String>,
    /// Plain mean over the kept classes
    pub metrics: Metrics,
}

/// Keep the classes matching `filter` and average their metrics.
pub fn filter_by(results: &IndexMap<String, IndividualResult>, filter: &ResultFilter) -> FilteredAverage {
    let kept: Vec<(&String, &IndividualResult)> = results.iter().filter(|(_, r)| filter.matches(r)).collect();
    let sum = kept
        .iter()
        .fold(Metrics::default(), |acc, (_, r)| acc.plus(&r.metrics));
    let metrics = if kept.is_empty() {
        Metrics::default()
    } else {
        sum.scaled(1.0 / kept.len() as f64)
    };
    FilteredAverage {
        count: kept.len(),
        classes: kept.into_iter().map(|(class, _)| class.clone()).collect(),
        metrics,
    }
}
