//! Train/validation partitioning
//!
//! Stratified and seeded: each class is shuffled with its own ChaCha8 stream
//! and `floor(fraction * n)` of its images go to validation. The same seed
//! over an unchanged directory always yields the same partition.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::loader::ImageSample;
use crate::utils::error::{PipelineError, Result};

/// Configuration for the validation split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of each class held out, in (0, 1)
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "validation split must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

/// Disjoint train and validation partitions
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSplit {
    pub train: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
}

impl DatasetSplit {
    /// Partition `samples` (labels in `0..num_classes`)
    ///
    /// Both outputs keep the input order within each class after shuffling,
    /// grouped by ascending label.
    pub fn from_samples(
        samples: &[ImageSample],
        num_classes: usize,
        config: &SplitConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut by_class: Vec<Vec<ImageSample>> = vec![Vec::new(); num_classes];
        for sample in samples {
            let bucket = by_class.get_mut(sample.label).ok_or_else(|| {
                PipelineError::DataIntegrity(format!(
                    "sample {} has label {} but only {} classes exist",
                    sample.path.display(),
                    sample.label,
                    num_classes
                ))
            })?;
            bucket.push(sample.clone());
        }

        let mut train = Vec::new();
        let mut validation = Vec::new();

        for (label, mut class_samples) in by_class.into_iter().enumerate() {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(label as u64));
            class_samples.shuffle(&mut rng);

            let n_val = (config.validation_fraction * class_samples.len() as f64).floor() as usize;
            let train_part = class_samples.split_off(n_val);

            debug!(
                label,
                train = train_part.len(),
                validation = class_samples.len(),
                "class split"
            );
            validation.extend(class_samples);
            train.extend(train_part);
        }

        Ok(Self { train, validation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn samples(per_class: usize, classes: usize) -> Vec<ImageSample> {
        (0..classes)
            .flat_map(|label| {
                (0..per_class).map(move |i| ImageSample {
                    path: PathBuf::from(format!("c{}/img_{}.png", label, i)),
                    label,
                })
            })
            .collect()
    }

    #[test]
    fn test_split_sizes_are_stratified() {
        let config = SplitConfig {
            validation_fraction: 0.3,
            seed: 7,
        };
        let split = DatasetSplit::from_samples(&samples(10, 2), 2, &config).unwrap();

        assert_eq!(split.validation.len(), 6);
        assert_eq!(split.train.len(), 14);
        for label in 0..2 {
            assert_eq!(split.validation.iter().filter(|s| s.label == label).count(), 3);
        }
    }

    #[test]
    fn test_split_is_disjoint() {
        let split =
            DatasetSplit::from_samples(&samples(25, 3), 3, &SplitConfig::default()).unwrap();

        let train: HashSet<_> = split.train.iter().map(|s| s.path.clone()).collect();
        let validation: HashSet<_> = split.validation.iter().map(|s| s.path.clone()).collect();
        assert!(train.is_disjoint(&validation));
        assert_eq!(train.len() + validation.len(), 75);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let config = SplitConfig {
            validation_fraction: 0.25,
            seed: 1234,
        };
        let data = samples(40, 4);

        let a = DatasetSplit::from_samples(&data, 4, &config).unwrap();
        let b = DatasetSplit::from_samples(&data, 4, &config).unwrap();
        assert_eq!(a, b);

        let other = SplitConfig { seed: 99, ..config };
        let c = DatasetSplit::from_samples(&data, 4, &other).unwrap();
        assert_ne!(a.validation, c.validation);
    }

    #[test]
    fn test_invalid_fraction() {
        let config = SplitConfig {
            validation_fraction: 0.0,
            seed: 1,
        };
        assert!(matches!(
            DatasetSplit::from_samples(&samples(4, 2), 2, &config),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_out_of_range_label() {
        let data = samples(2, 3);
        assert!(matches!(
            DatasetSplit::from_samples(&data, 2, &SplitConfig::default()),
            Err(PipelineError::DataIntegrity(_))
        ));
    }
}
