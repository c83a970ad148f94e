//! Per-class counting and metric derivation.

use serde::{Deserialize, Serialize};

use crate::evaluator::aggregator::ConfusionMatrix;
use crate::evaluator::labels::LabelUnit;
use crate::evaluator::{AverageFunction, EvaluationType, IndividualResult, Metrics};

/// Positive class of one-hot evaluations
const POSITIVE: usize = 1;

#[inline]
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// One-vs-rest outcome counts of one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassCounts {
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub true_negatives: u64,
}

impl ClassCounts {
    /// Units whose true label includes the class
    pub fn support(&self) -> u64 {
        self.true_positives + self.false_negatives
    }

    /// Units whose predicted label includes the class
    pub fn predicted(&self) -> u64 {
        self.true_positives + self.false_positives
    }

    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.false_negatives + self.true_negatives
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives as f64, self.predicted() as f64)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives as f64, self.support() as f64)
    }

    pub fn f1_score(&self) -> f64 {
        let tp = self.true_positives as f64;
        ratio(2.0 * tp, 2.0 * tp + self.false_positives as f64 + self.false_negatives as f64)
    }

    pub fn accuracy(&self) -> f64 {
        ratio((self.true_positives + self.true_negatives) as f64, self.total() as f64)
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.true_negatives += other.true_negatives;
    }

    /// `[[tn, fp], [fn, tp]]`
    pub fn matrix(&self) -> [[u64; 2]; 2] {
        [
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives],
        ]
    }

    pub fn individual_result(&self) -> IndividualResult {
        IndividualResult {
            metrics: Metrics {
                accuracy: self.accuracy(),
                precision: self.precision(),
                recall: self.recall(),
                f1_score: self.f1_score(),
            },
            confusion_matrix: self.matrix(),
            count: self.support(),
        }
    }
}

/// `(precision, recall, f1)` averaged over per-class counts.
/// `Samples` needs per-unit data and yields zeros here.
pub fn averaged(counts: &[ClassCounts], average: AverageFunction) -> (f64, f64, f64) {
    match average {
        AverageFunction::Micro => {
            let mut pooled = ClassCounts::default();
            counts.iter().for_each(|c| pooled.merge(c));
            (pooled.precision(), pooled.recall(), pooled.f1_score())
        }
        AverageFunction::Macro => {
            let n = counts.len() as f64;
            let sum = counts
                .iter()
                .fold((0.0, 0.0, 0.0), |acc, c| (acc.0 + c.precision(), acc.1 + c.recall(), acc.2 + c.f1_score()));
            (ratio(sum.0, n), ratio(sum.1, n), ratio(sum.2, n))
        }
        AverageFunction::Weighted => {
            let total = counts.iter().map(ClassCounts::support).sum::<u64>() as f64;
            let sum = counts.iter().fold((0.0, 0.0, 0.0), |acc, c| {
                let w = c.support() as f64;
                (acc.0 + w * c.precision(), acc.1 + w * c.recall(), acc.2 + w * c.f1_score())
            });
            (ratio(sum.0, total), ratio(sum.1, total), ratio(sum.2, total))
        }
        AverageFunction::Binary => counts
            .get(POSITIVE)
            .map_or((0.0, 0.0, 0.0), |c| (c.precision(), c.recall(), c.f1_score())),
        AverageFunction::Samples => (0.0, 0.0, 0.0),
    }
}

/// Scores of one set of label units.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScores {
    pub counts: Vec<ClassCounts>,
    pub confusion: ConfusionMatrix,
    pub units: u64,
    /// Units whose predicted label set equals the true one
    pub exact_matches: u64,
    /// Summed per-unit precision/recall/f1, for `samples`
    sample_sums: (f64, f64, f64),
}

impl BatchScores {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![ClassCounts::default(); num_classes],
            confusion: ConfusionMatrix::new(num_classes),
            units: 0,
            exact_matches: 0,
            sample_sums: (0.0, 0.0, 0.0),
        }
    }

    pub fn from_units(num_classes: usize, units: &[LabelUnit]) -> Self {
        let mut scores = Self::new(num_classes);
        units.iter().for_each(|u| scores.record(u));
        scores
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn record(&mut self, unit: &LabelUnit) {
        for (class, counts) in self.counts.iter_mut().enumerate() {
            match (unit.truth.contains(&class), unit.predicted.contains(&class)) {
                (true, true) => counts.true_positives += 1,
                (false, true) => counts.false_positives += 1,
                (true, false) => counts.false_negatives += 1,
                (false, false) => counts.true_negatives += 1,
            }
        }
        // co-occurrence; the usual confusion matrix when both sides are one-hot
        for &t in &unit.truth {
            for &p in &unit.predicted {
                self.confusion.increment(t, p);
            }
        }

        let shared = unit.truth.iter().filter(|c| unit.predicted.contains(c)).count() as f64;
        let (n_true, n_pred) = (unit.truth.len() as f64, unit.predicted.len() as f64);
        self.sample_sums.0 += ratio(shared, n_pred);
        self.sample_sums.1 += ratio(shared, n_true);
        self.sample_sums.2 += ratio(2.0 * shared, n_true + n_pred);

        if unit.truth == unit.predicted {
            self.exact_matches += 1;
        }
        self.units += 1;
    }

    /// Subset accuracy; multilabel evaluations report 0.
    pub fn accuracy(&self, evaluation_type: EvaluationType) -> f64 {
        if evaluation_type.is_one_hot() {
            ratio(self.exact_matches as f64, self.units as f64)
        } else {
            0.0
        }
    }

    pub fn metrics(&self, evaluation_type: EvaluationType, average: AverageFunction) -> Metrics {
        let (precision, recall, f1_score) = match average {
            AverageFunction::Samples => {
                let n = self.units as f64;
                (
                    ratio(self.sample_sums.0, n),
                    ratio(self.sample_sums.1, n),
                    ratio(self.sample_sums.2, n),
                )
            }
            _ => averaged(&self.counts, average),
        };
        Metrics {
            accuracy: self.accuracy(evaluation_type),
            precision,
            recall,
            f1_score,
        }
    }
}
