//! Stage configuration records
//!
//! One record per pipeline stage. Records are built once by
//! [`ConfigurationManager`](super::ConfigurationManager) and handed to the
//! stage by value; stages never mutate them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::generator::GeneratorConfig;
use crate::model::BackboneConfig;
use crate::utils::error::{PipelineError, Result};

/// Target image resolution, `[height, width, channels]` in the params file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageSize {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Parse the rank-3 list form used in the params file
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match dims {
            [height, width, channels] => Ok(Self::new(*height, *width, *channels)),
            other => Err(PipelineError::Configuration(format!(
                "image_size must be [height, width, channels], got {} dimension(s): {:?}",
                other.len(),
                other
            ))),
        }
    }

    /// Both spatial dimensions, `(height, width)`
    pub fn spatial(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Which backbone layers stay trainable after head replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "trainable_top", rename_all = "snake_case")]
pub enum FreezePolicy {
    /// Every backbone layer frozen, only the head trains
    All,
    /// All backbone layers frozen except the top N convolutions
    AllButTop(usize),
    /// Nothing frozen
    None,
}

impl FreezePolicy {
    /// Map the `freeze_all` / `freeze_till` params pair onto a policy
    pub fn from_params(freeze_all: bool, freeze_till: Option<usize>) -> Self {
        match (freeze_all, freeze_till) {
            (true, _) => FreezePolicy::All,
            (false, Some(n)) if n > 0 => FreezePolicy::AllButTop(n),
            _ => FreezePolicy::None,
        }
    }
}

/// Loss identifiers accepted when compiling the prepared network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    CategoricalCrossentropy,
}

impl std::str::FromStr for LossKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "categorical_crossentropy" | "cross_entropy" => Ok(LossKind::CategoricalCrossentropy),
            other => Err(PipelineError::Configuration(format!(
                "unknown loss function '{}'",
                other
            ))),
        }
    }
}

/// Optimizer and loss settings stored with the prepared network
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub loss: LossKind,
}

#[derive(Debug, Clone)]
pub struct DataIngestionConfig {
    pub root_dir: PathBuf,
    pub source_url: String,
    pub local_data_file: PathBuf,
    pub unzip_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PrepareBaseModelConfig {
    pub root_dir: PathBuf,
    /// Where the untouched backbone is written
    pub base_model_path: PathBuf,
    /// Where the head-replaced, frozen network is written
    pub updated_base_model_path: PathBuf,
    /// Optional record with pretrained backbone weights
    pub pretrained_weights: Option<PathBuf>,
    pub backbone: BackboneConfig,
    pub image_size: ImageSize,
    pub num_classes: usize,
    pub freeze: FreezePolicy,
    pub compile: CompileConfig,
}

#[derive(Debug, Clone)]
pub struct PrepareCallbacksConfig {
    pub root_dir: PathBuf,
    pub tensorboard_root_log_dir: PathBuf,
    pub checkpoint_model_filepath: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    pub training_data: PathBuf,
    pub history_path: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub augmentation: bool,
    pub augmentation_params: AugmentationConfig,
    pub image_size: ImageSize,
    pub validation_split: f64,
    pub seed: u64,
}

impl TrainingConfig {
    /// Generator settings for the train/validation pair
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            data_dir: self.training_data.clone(),
            target_size: self.image_size.spatial(),
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            seed: self.seed,
            augmentation: self
                .augmentation
                .then(|| self.augmentation_params.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    pub path_of_model: PathBuf,
    pub training_data: PathBuf,
    pub score_path: PathBuf,
    pub report_path: PathBuf,
    pub image_size: ImageSize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub seed: u64,
}

impl EvaluationConfig {
    /// Resolution requested from the validation generator
    pub fn target_size(&self) -> (usize, usize) {
        self.image_size.spatial()
    }

    /// Validation-only generator settings, never augmented
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            data_dir: self.training_data.clone(),
            target_size: self.target_size(),
            batch_size: self.batch_size,
            validation_split: self.validation_split,
            seed: self.seed,
            augmentation: None,
        }
    }
}
