//! Data Generator Factory
//!
//! Builds the train/validation batch iterators for one image directory.
//! A [`DataGenerator`] owns one partition; every call to
//! [`DataGenerator::epoch`] yields a fresh, finite, lazily loaded sequence of
//! batches covering the partition once. The last batch of an epoch may be
//! partial.

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::loader::{load_image, ImageFolder, ImageSample};
use crate::dataset::split::{DatasetSplit, SplitConfig};
use crate::utils::error::{PipelineError, Result};

/// Inputs of the generator factory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Dataset root, one subdirectory per class
    pub data_dir: PathBuf,
    /// Target (height, width)
    pub target_size: (usize, usize),
    pub batch_size: usize,
    /// Fraction of every class held out for validation, in (0, 1)
    pub validation_split: f64,
    /// Seed for the partition and the epoch shuffle order
    pub seed: u64,
    /// Training-side augmentation, `None` for rescale only
    pub augmentation: Option<AugmentationConfig>,
}

impl GeneratorConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        let (height, width) = self.target_size;
        if height == 0 || width == 0 {
            return Err(PipelineError::Configuration(format!(
                "target size must be non-zero, got {}x{}",
                height, width
            )));
        }
        if let Some(aug) = &self.augmentation {
            aug.validate()?;
        }
        self.split_config().validate()
    }

    fn split_config(&self) -> SplitConfig {
        SplitConfig {
            validation_fraction: self.validation_split,
            seed: self.seed,
        }
    }
}

/// Which partition a generator serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    Training,
    Validation,
}

/// A decoded image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    /// Class label index
    pub label: usize,
}

/// Stateful, restartable batch source over one partition
#[derive(Debug)]
pub struct DataGenerator {
    subset: Subset,
    samples: Vec<ImageSample>,
    class_indices: BTreeMap<String, usize>,
    batch_size: usize,
    target_size: (usize, usize),
    order_rng: ChaCha8Rng,
    augmenter: Augmenter,
    augment: bool,
}

impl DataGenerator {
    fn new(
        subset: Subset,
        samples: Vec<ImageSample>,
        folder: &ImageFolder,
        config: &GeneratorConfig,
        augmentation: Option<AugmentationConfig>,
    ) -> Self {
        let augment = augmentation.is_some();
        let augmenter = match augmentation {
            Some(aug) => Augmenter::new(aug, config.target_size),
            None => Augmenter::no_augmentation(config.target_size),
        };

        Self {
            subset,
            samples,
            class_indices: folder.class_to_idx.clone(),
            batch_size: config.batch_size,
            target_size: config.target_size,
            order_rng: ChaCha8Rng::seed_from_u64(config.seed),
            augmenter,
            augment,
        }
    }

    /// Number of samples in this partition
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Target (height, width) of every produced image
    pub fn target_size(&self) -> (usize, usize) {
        self.target_size
    }

    /// Batches per epoch, rounded up so partial batches are included
    pub fn steps_per_epoch(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    /// Class name → label index
    pub fn class_indices(&self) -> &BTreeMap<String, usize> {
        &self.class_indices
    }

    /// Class names ordered by label index
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<(usize, String)> = self
            .class_indices
            .iter()
            .map(|(name, idx)| (*idx, name.clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn num_classes(&self) -> usize {
        self.class_indices.len()
    }

    /// Partition members in their stored order
    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn is_augmenting(&self) -> bool {
        self.augment
    }

    /// Start a new pass over the partition
    ///
    /// Training partitions are reshuffled on every call; validation keeps
    /// its stored order.
    pub fn epoch(&mut self) -> EpochBatches<'_> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.subset == Subset::Training {
            order.shuffle(&mut self.order_rng);
        }

        EpochBatches {
            generator: self,
            order,
            cursor: 0,
        }
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Vec<ImageItem>> {
        // One fresh seed per batch draw when augmenting
        let sample_seeds: Vec<Option<u64>> = if self.augment {
            let mut batch_rng = ChaCha8Rng::seed_from_u64(rand::random::<u64>());
            indices
                .iter()
                .map(|_| Some(rand::Rng::gen(&mut batch_rng)))
                .collect()
        } else {
            vec![None; indices.len()]
        };

        indices
            .par_iter()
            .zip(sample_seeds.par_iter())
            .map(|(&i, seed)| {
                let sample = &self.samples[i];
                let img = load_image(&sample.path)?;
                let image = match seed {
                    Some(seed) => {
                        let mut rng = ChaCha8Rng::seed_from_u64(*seed);
                        self.augmenter.preprocess(&img, Some(&mut rng))
                    }
                    None => self.augmenter.preprocess(&img, None),
                };
                Ok(ImageItem {
                    image,
                    label: sample.label,
                })
            })
            .collect()
    }
}

/// One epoch's lazy batch sequence
pub struct EpochBatches<'a> {
    generator: &'a DataGenerator,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Vec<ImageItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.generator.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;
        Some(self.generator.load_batch(indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.generator.batch_size);
        (remaining, Some(remaining))
    }
}

/// Train and validation generators over disjoint partitions
#[derive(Debug)]
pub struct GeneratorPair {
    pub train: DataGenerator,
    pub validation: DataGenerator,
}

fn scan_classified(config: &GeneratorConfig) -> Result<ImageFolder> {
    config.validate()?;
    let folder = ImageFolder::scan(&config.data_dir)?;

    if folder.num_classes() < 2 {
        return Err(PipelineError::DataIntegrity(format!(
            "{} contains {} class director{}; at least two are required",
            folder.root_dir.display(),
            folder.num_classes(),
            if folder.num_classes() == 1 { "y" } else { "ies" }
        )));
    }
    if folder.is_empty() {
        return Err(PipelineError::DataIntegrity(format!(
            "{} contains no images",
            folder.root_dir.display()
        )));
    }
    Ok(folder)
}

/// Build the train/validation generator pair
///
/// The validation side only rescales and never shuffles. The train side is
/// shuffled every epoch and augmented when `config.augmentation` is set.
pub fn build_generators(config: &GeneratorConfig) -> Result<GeneratorPair> {
    let folder = scan_classified(config)?;
    let split =
        DatasetSplit::from_samples(&folder.samples, folder.num_classes(), &config.split_config())?;

    if split.train.is_empty() {
        return Err(PipelineError::DataIntegrity(
            "training partition is empty".to_string(),
        ));
    }
    if split.validation.is_empty() {
        return Err(PipelineError::DataIntegrity(format!(
            "validation partition is empty; validation_split {} is too small for {} images",
            config.validation_split,
            folder.len()
        )));
    }

    let validation = DataGenerator::new(
        Subset::Validation,
        split.validation,
        &folder,
        config,
        None,
    );
    let train = DataGenerator::new(
        Subset::Training,
        split.train,
        &folder,
        config,
        config.augmentation.clone(),
    );

    info!(
        train = train.len(),
        validation = validation.len(),
        classes = folder.num_classes(),
        augmentation = train.is_augmenting(),
        "generators ready"
    );

    Ok(GeneratorPair { train, validation })
}

/// Build only the validation generator (rescale only, fixed order)
pub fn build_validation_generator(config: &GeneratorConfig) -> Result<DataGenerator> {
    let folder = scan_classified(config)?;
    let split =
        DatasetSplit::from_samples(&folder.samples, folder.num_classes(), &config.split_config())?;

    Ok(DataGenerator::new(
        Subset::Validation,
        split.validation,
        &folder,
        config,
        None,
    ))
}

/// A batch of images for training or scoring
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`ImageItem`]s into tensors
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    height: usize,
    width: usize,
}

impl ImageBatcher {
    pub fn new(target_size: (usize, usize)) -> Self {
        Self {
            height: target_size.0,
            width: target_size.1,
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, self.height, self.width]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_support::create_image_tree;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    type TestBackend = burn_ndarray::NdArray;

    fn config(dir: &std::path::Path, augmentation: Option<AugmentationConfig>) -> GeneratorConfig {
        GeneratorConfig {
            data_dir: dir.to_path_buf(),
            target_size: (8, 6),
            batch_size: 4,
            validation_split: 0.3,
            seed: 42,
            augmentation,
        }
    }

    #[test]
    fn test_partitions_are_reproducible() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["a", "b", "c"], 10);

        let first = build_generators(&config(dir.path(), None)).unwrap();
        let second = build_generators(&config(dir.path(), None)).unwrap();

        assert_eq!(first.train.samples(), second.train.samples());
        assert_eq!(first.validation.samples(), second.validation.samples());
    }

    #[test]
    fn test_class_indices_match_and_partitions_disjoint() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["normal", "tumor"], 10);

        let pair =
            build_generators(&config(dir.path(), Some(AugmentationConfig::default()))).unwrap();

        assert_eq!(pair.train.class_indices(), pair.validation.class_indices());
        assert_eq!(pair.train.class_names(), vec!["normal", "tumor"]);

        let train: HashSet<_> = pair.train.samples().iter().map(|s| &s.path).collect();
        let val: HashSet<_> = pair.validation.samples().iter().map(|s| &s.path).collect();
        assert!(train.is_disjoint(&val));
        assert_eq!(pair.train.len(), 14);
        assert_eq!(pair.validation.len(), 6);
        assert!(pair.train.is_augmenting());
        assert!(!pair.validation.is_augmenting());
    }

    #[test]
    fn test_steps_round_up_and_cover_all_samples() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["a", "b"], 10);

        let mut pair = build_generators(&config(dir.path(), None)).unwrap();
        assert_eq!(pair.train.steps_per_epoch(), 4);
        assert_eq!(pair.validation.steps_per_epoch(), 2);

        // two passes: generator restarts and covers every sample each time
        for _ in 0..2 {
            let sizes: Vec<usize> = pair
                .train
                .epoch()
                .map(|batch| batch.unwrap().len())
                .collect();
            assert_eq!(sizes, vec![4, 4, 4, 2]);
        }
    }

    #[test]
    fn test_validation_order_is_fixed() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["a", "b"], 10);

        let mut generator = build_validation_generator(&config(dir.path(), None)).unwrap();
        let first: Vec<usize> = generator
            .epoch()
            .flat_map(|b| b.unwrap().into_iter().map(|item| item.label))
            .collect();
        let second: Vec<usize> = generator
            .epoch()
            .flat_map(|b| b.unwrap().into_iter().map(|item| item.label))
            .collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_fewer_than_two_classes_fails_fast() {
        let empty = TempDir::new().unwrap();
        let err = build_generators(&config(empty.path(), None)).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));

        let single = TempDir::new().unwrap();
        create_image_tree(single.path(), &["only"], 5);
        let err = build_generators(&config(single.path(), None)).unwrap_err();
        assert!(matches!(err, PipelineError::DataIntegrity(_)));
    }

    #[test]
    fn test_corrupt_image_surfaces_in_batch() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["a", "b"], 3);
        fs::write(dir.path().join("a/zzz_broken.png"), b"garbage").unwrap();

        let mut cfg = config(dir.path(), None);
        cfg.batch_size = 16;
        cfg.validation_split = 0.5;
        let mut pair = build_generators(&cfg).unwrap();

        let train_fails = pair.train.epoch().any(|b| b.is_err());
        let val_fails = pair.validation.epoch().any(|b| b.is_err());
        assert!(train_fails || val_fails);
    }

    #[test]
    fn test_batcher_shapes() {
        let items = vec![
            ImageItem {
                image: vec![0.5; 3 * 8 * 6],
                label: 1,
            },
            ImageItem {
                image: vec![0.25; 3 * 8 * 6],
                label: 0,
            },
        ];
        let device = <TestBackend as Backend>::Device::default();
        let batcher = ImageBatcher::new((8, 6));
        let batch: ImageBatch<TestBackend> =
            Batcher::<TestBackend, _, _>::batch(&batcher, items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 6]);
        let targets = batch.targets.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn test_224_images_keep_both_dimensions() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["a", "b"], 2);

        let mut cfg = config(dir.path(), None);
        cfg.target_size = (224, 224);
        cfg.validation_split = 0.5;
        let mut generator = build_validation_generator(&cfg).unwrap();

        let batch = generator.epoch().next().unwrap().unwrap();
        assert_eq!(batch[0].image.len(), 3 * 224 * 224);
    }
}
