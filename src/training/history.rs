//! Per-epoch training record

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;
use crate::utils::save_json;

/// Metrics of one completed pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
    /// Wall-clock duration of the pass
    pub seconds: f64,
}

/// All passes of one fit call, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Pass with the highest validation accuracy (earliest on ties)
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().fold(None, |best, m| match best {
            Some(b) if b.val_accuracy >= m.val_accuracy => Some(b),
            _ => Some(m),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::load_json;

    fn metrics(epoch: usize, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0 / epoch as f64,
            train_accuracy: 0.5,
            val_loss: 0.9,
            val_accuracy,
            learning_rate: 0.01,
            seconds: 1.5,
        }
    }

    #[test]
    fn test_best_prefers_earliest_maximum() {
        let mut history = TrainingHistory::default();
        assert!(history.best().is_none());

        for (i, acc) in [0.5, 0.8, 0.6, 0.8].into_iter().enumerate() {
            history.push(metrics(i + 1, acc));
        }
        assert_eq!(history.best().map(|m| m.epoch), Some(2));
        assert_eq!(history.last().map(|m| m.epoch), Some(4));
    }

    #[test]
    fn test_history_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("history.json");

        let mut history = TrainingHistory::default();
        history.push(metrics(1, 0.7));
        history.save(&path).unwrap();

        let loaded: TrainingHistory = load_json(&path).unwrap();
        assert_eq!(loaded, history);
    }
}
