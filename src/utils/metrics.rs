//! Metrics Module for Model Evaluation
//!
//! Classification metrics computed from predicted and actual label indices:
//! - Confusion matrix
//! - Per-class precision, recall, F1-score and support
//! - Macro and support-weighted averages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Nested rows, the layout written to the evaluation report
    pub fn to_rows(&self) -> Vec<Vec<usize>> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).collect())
            .collect()
    }
}

/// Precision / recall / F1 for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Precision = TP / (TP + FP)
    pub precision: f64,
    /// Recall = TP / (TP + FN)
    pub recall: f64,
    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1_score: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            precision,
            recall,
            f1_score,
            support: true_positives + false_negatives,
        }
    }
}

/// Macro and support-weighted averages over all classes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    /// Fraction of samples on the diagonal
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1_score: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1_score: f64,
}

/// Full classification report written alongside the score record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub class_labels: Vec<String>,
    pub confusion_matrix: Vec<Vec<usize>>,
    pub per_class_metrics: BTreeMap<String, ClassMetrics>,
    pub overall_metrics: OverallMetrics,
}

impl ClassificationReport {
    /// Build a report; `class_labels[i]` names class index `i`
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        class_labels: &[String],
    ) -> Self {
        let num_classes = class_labels.len();
        let cm = ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|idx| ClassMetrics::from_confusion_matrix(&cm, idx))
            .collect();

        let n = num_classes.max(1) as f64;
        let total_support: usize = per_class.iter().map(|m| m.support).sum();
        let weighted = |f: fn(&ClassMetrics) -> f64| -> f64 {
            if total_support == 0 {
                return 0.0;
            }
            per_class
                .iter()
                .map(|m| f(m) * m.support as f64)
                .sum::<f64>()
                / total_support as f64
        };

        let overall_metrics = OverallMetrics {
            accuracy: cm.accuracy(),
            macro_precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
            macro_recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
            macro_f1_score: per_class.iter().map(|m| m.f1_score).sum::<f64>() / n,
            weighted_precision: weighted(|m| m.precision),
            weighted_recall: weighted(|m| m.recall),
            weighted_f1_score: weighted(|m| m.f1_score),
        };

        let per_class_metrics = class_labels
            .iter()
            .cloned()
            .zip(per_class)
            .collect();

        Self {
            class_labels: class_labels.to_vec(),
            confusion_matrix: cm.to_rows(),
            per_class_metrics,
            overall_metrics,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator > 0 {
        numerator as f64 / denominator as f64
    } else {
        0.0
    }
}
