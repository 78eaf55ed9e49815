//! Configuration loading
//!
//! Two TOML documents drive a pipeline run: `config/config.toml` holds
//! artifact paths per stage, `params.toml` holds hyperparameters. The
//! [`ConfigurationManager`] parses both once and hands each stage its own
//! immutable record.

pub mod entity;

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::BackboneConfig;
use crate::utils::create_directories;
use crate::utils::error::{PipelineError, Result};

pub use entity::{
    CompileConfig, DataIngestionConfig, EvaluationConfig, FreezePolicy, ImageSize, LossKind,
    PrepareBaseModelConfig, PrepareCallbacksConfig, TrainingConfig,
};

/// Default location of the paths file
pub const CONFIG_FILE_PATH: &str = "config/config.toml";

/// Default location of the hyperparameter file
pub const PARAMS_FILE_PATH: &str = "params.toml";

/// Parse a TOML file into `T`
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::Configuration(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        PipelineError::Configuration(format!("Failed to parse config {}: {e}", path.display()))
    })
}

/// `config/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub artifacts_root: PathBuf,
    pub data_ingestion: DataIngestionSection,
    pub prepare_base_model: PrepareBaseModelSection,
    pub prepare_callbacks: PrepareCallbacksSection,
    pub training: TrainingSection,
    pub evaluation: EvaluationSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIngestionSection {
    pub root_dir: PathBuf,
    pub source_url: String,
    pub local_data_file: PathBuf,
    pub unzip_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareBaseModelSection {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    #[serde(default)]
    pub pretrained_weights: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareCallbacksSection {
    pub root_dir: PathBuf,
    pub tensorboard_root_log_dir: PathBuf,
    pub checkpoint_model_filepath: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSection {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
    pub training_data: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSection {
    pub path_of_model: PathBuf,
    pub training_data: PathBuf,
    pub score_path: PathBuf,
    pub report_path: PathBuf,
}

/// `params.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// `[height, width, channels]`
    pub image_size: Vec<usize>,
    pub batch_size: usize,
    pub epochs: usize,
    /// Label count of the new head
    pub classes: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Loss identifier, only `categorical_crossentropy` is known
    pub loss: String,
    pub augmentation: bool,
    pub freeze_all: bool,
    /// Leave the top N backbone convolutions trainable (ignored when `freeze_all`)
    pub freeze_till: Option<usize>,
    /// Fraction of every class held out for validation
    pub validation_split: f64,
    /// Seed for the train/validation partition and epoch shuffling
    pub seed: u64,
    pub augmentation_params: AugmentationConfig,
    pub backbone: BackboneParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            image_size: vec![224, 224, 3],
            batch_size: 16,
            epochs: 10,
            classes: 2,
            learning_rate: 0.01,
            momentum: 0.9,
            loss: "categorical_crossentropy".to_string(),
            augmentation: true,
            freeze_all: true,
            freeze_till: None,
            validation_split: 0.2,
            seed: 42,
            augmentation_params: AugmentationConfig::default(),
            backbone: BackboneParams::default(),
        }
    }
}

/// Backbone shape; the default is the VGG16 convolutional stack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneParams {
    /// Output channels of each pooling block
    pub filters: Vec<usize>,
    /// Convolutions per pooling block
    pub convs_per_block: Vec<usize>,
}

impl Default for BackboneParams {
    fn default() -> Self {
        Self {
            filters: vec![64, 128, 256, 512, 512],
            convs_per_block: vec![2, 2, 3, 3, 3],
        }
    }
}

impl BackboneParams {
    fn to_config(&self) -> Result<BackboneConfig> {
        if self.filters.is_empty() || self.filters.len() != self.convs_per_block.len() {
            return Err(PipelineError::Configuration(format!(
                "backbone.filters ({}) and backbone.convs_per_block ({}) must be non-empty and the same length",
                self.filters.len(),
                self.convs_per_block.len()
            )));
        }
        if self.filters.contains(&0) || self.convs_per_block.contains(&0) {
            return Err(PipelineError::Configuration(
                "backbone filters and convolution counts must be positive".to_string(),
            ));
        }
        Ok(BackboneConfig::new(
            self.filters.clone(),
            self.convs_per_block.clone(),
        ))
    }
}

/// Builds the per-stage records from the parsed files
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: PipelineConfig,
    params: Params,
}

impl ConfigurationManager {
    /// Load both files and create the artifacts root
    pub fn new(config_path: &Path, params_path: &Path) -> Result<Self> {
        let config: PipelineConfig = load_toml_config(config_path)?;
        let params: Params = load_toml_config(params_path)?;
        Self::from_parts(config, params)
    }

    /// Build from already parsed documents
    pub fn from_parts(config: PipelineConfig, params: Params) -> Result<Self> {
        validate_params(&params)?;
        create_directories(&[&config.artifacts_root])?;
        debug!(root = %config.artifacts_root.display(), "configuration loaded");
        Ok(Self { config, params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn get_data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let section = &self.config.data_ingestion;
        create_directories(&[&section.root_dir])?;

        Ok(DataIngestionConfig {
            root_dir: section.root_dir.clone(),
            source_url: section.source_url.clone(),
            local_data_file: section.local_data_file.clone(),
            unzip_dir: section.unzip_dir.clone(),
        })
    }

    pub fn get_prepare_base_model_config(&self) -> Result<PrepareBaseModelConfig> {
        let section = &self.config.prepare_base_model;
        create_directories(&[&section.root_dir])?;

        Ok(PrepareBaseModelConfig {
            root_dir: section.root_dir.clone(),
            base_model_path: section.base_model_path.clone(),
            updated_base_model_path: section.updated_base_model_path.clone(),
            pretrained_weights: section.pretrained_weights.clone(),
            backbone: self.params.backbone.to_config()?,
            image_size: ImageSize::from_dims(&self.params.image_size)?,
            num_classes: self.params.classes,
            freeze: FreezePolicy::from_params(self.params.freeze_all, self.params.freeze_till),
            compile: CompileConfig {
                learning_rate: self.params.learning_rate,
                momentum: self.params.momentum,
                loss: self.params.loss.parse()?,
            },
        })
    }

    pub fn get_prepare_callbacks_config(&self) -> Result<PrepareCallbacksConfig> {
        let section = &self.config.prepare_callbacks;
        let checkpoint_dir = section
            .checkpoint_model_filepath
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| section.root_dir.clone());
        create_directories(&[&section.tensorboard_root_log_dir, &checkpoint_dir])?;

        Ok(PrepareCallbacksConfig {
            root_dir: section.root_dir.clone(),
            tensorboard_root_log_dir: section.tensorboard_root_log_dir.clone(),
            checkpoint_model_filepath: section.checkpoint_model_filepath.clone(),
        })
    }

    pub fn get_training_config(&self) -> Result<TrainingConfig> {
        let section = &self.config.training;
        create_directories(&[&section.root_dir])?;

        Ok(TrainingConfig {
            root_dir: section.root_dir.clone(),
            trained_model_path: section.trained_model_path.clone(),
            updated_base_model_path: self.config.prepare_base_model.updated_base_model_path.clone(),
            training_data: section.training_data.clone(),
            history_path: section.root_dir.join("history.json"),
            epochs: self.params.epochs,
            batch_size: self.params.batch_size,
            augmentation: self.params.augmentation,
            augmentation_params: self.params.augmentation_params.clone(),
            image_size: ImageSize::from_dims(&self.params.image_size)?,
            validation_split: self.params.validation_split,
            seed: self.params.seed,
        })
    }

    pub fn get_evaluation_config(&self) -> Result<EvaluationConfig> {
        let section = &self.config.evaluation;

        Ok(EvaluationConfig {
            path_of_model: section.path_of_model.clone(),
            training_data: section.training_data.clone(),
            score_path: section.score_path.clone(),
            report_path: section.report_path.clone(),
            image_size: ImageSize::from_dims(&self.params.image_size)?,
            batch_size: self.params.batch_size,
            validation_split: self.params.validation_split,
            seed: self.params.seed,
        })
    }
}

fn validate_params(params: &Params) -> Result<()> {
    let fail = |msg: String| Err(PipelineError::Configuration(msg));

    if params.batch_size == 0 {
        return fail("batch_size must be greater than 0".to_string());
    }
    if params.epochs == 0 {
        return fail("epochs must be greater than 0".to_string());
    }
    if params.classes == 0 {
        return fail("classes must be at least 1".to_string());
    }
    if !(params.learning_rate.is_finite() && params.learning_rate > 0.0) {
        return fail(format!(
            "learning_rate must be a positive number, got {}",
            params.learning_rate
        ));
    }
    if !(0.0..1.0).contains(&params.momentum) {
        return fail(format!("momentum must be in [0, 1), got {}", params.momentum));
    }
    if !(params.validation_split > 0.0 && params.validation_split < 1.0) {
        return fail(format!(
            "validation_split must be in (0, 1), got {}",
            params.validation_split
        ));
    }
    params.augmentation_params.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_files(dir: &Path, params: &str) -> (PathBuf, PathBuf) {
        let root = dir.join("artifacts");
        let config = format!(
            r#"
artifacts_root = "{root}"

[data_ingestion]
root_dir = "{root}/data_ingestion"
source_url = "https://example.com/data.zip"
local_data_file = "{root}/data_ingestion/data.zip"
unzip_dir = "{root}/data_ingestion"

[prepare_base_model]
root_dir = "{root}/prepare_base_model"
base_model_path = "{root}/prepare_base_model/base_model"
updated_base_model_path = "{root}/prepare_base_model/base_model_updated"

[prepare_callbacks]
root_dir = "{root}/prepare_callbacks"
tensorboard_root_log_dir = "{root}/prepare_callbacks/tensorboard_log_dir"
checkpoint_model_filepath = "{root}/prepare_callbacks/checkpoint_dir/model"

[training]
root_dir = "{root}/training"
trained_model_path = "{root}/training/model"
training_data = "{root}/data_ingestion/images"

[evaluation]
path_of_model = "{root}/training/model"
training_data = "{root}/data_ingestion/images"
score_path = "{root}/scores.json"
report_path = "{root}/evaluation/report.json"
"#,
            root = root.display()
        );

        let config_path = dir.join("config.toml");
        let params_path = dir.join("params.toml");
        fs::write(&config_path, config).unwrap();
        fs::write(&params_path, params).unwrap();
        (config_path, params_path)
    }

    #[test]
    fn test_manager_builds_stage_records() {
        let dir = TempDir::new().unwrap();
        let (config_path, params_path) = write_files(
            dir.path(),
            r#"
image_size = [224, 224, 3]
batch_size = 4
epochs = 2
classes = 2
augmentation = false
freeze_all = false
freeze_till = 2
validation_split = 0.3
"#,
        );

        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();

        let prepare = manager.get_prepare_base_model_config().unwrap();
        assert_eq!(prepare.freeze, FreezePolicy::AllButTop(2));
        assert_eq!(prepare.image_size.spatial(), (224, 224));
        assert_eq!(prepare.compile.loss, LossKind::CategoricalCrossentropy);
        assert!(prepare.root_dir.is_dir());

        let training = manager.get_training_config().unwrap();
        assert_eq!(training.batch_size, 4);
        assert_eq!(training.epochs, 2);
        assert_eq!(training.updated_base_model_path, prepare.updated_base_model_path);
        assert!(training.generator_config().augmentation.is_none());

        let callbacks = manager.get_prepare_callbacks_config().unwrap();
        assert!(callbacks.tensorboard_root_log_dir.is_dir());
        assert!(callbacks
            .checkpoint_model_filepath
            .parent()
            .unwrap()
            .is_dir());

        let evaluation = manager.get_evaluation_config().unwrap();
        assert_eq!(evaluation.target_size(), (224, 224));
    }

    #[test]
    fn test_invalid_split_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let (config_path, params_path) = write_files(dir.path(), "validation_split = 1.5\n");

        let err = ConfigurationManager::new(&config_path, &params_path).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_zero_classes_rejected() {
        let mut params = Params::default();
        params.classes = 0;
        assert!(validate_params(&params).is_err());
    }

    #[test]
    fn test_bad_image_rank_rejected() {
        let dir = TempDir::new().unwrap();
        let (config_path, params_path) = write_files(dir.path(), "image_size = [224]\n");

        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();
        assert!(matches!(
            manager.get_prepare_base_model_config(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_loss_rejected() {
        let dir = TempDir::new().unwrap();
        let (config_path, params_path) = write_files(dir.path(), "loss = \"hinge\"\n");

        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();
        assert!(manager.get_prepare_base_model_config().is_err());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let result: Result<Params> = load_toml_config(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
