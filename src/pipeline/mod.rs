//! Stage runner
//!
//! Stages run strictly in order, each gated on the artifact of the previous
//! one. Every stage is wrapped by [`run_stage`], which logs its start and
//! completion and logs failures before handing them back unchanged.

use tracing::{error, info};

use crate::backend::{pipeline_device, DefaultBackend, PipelineDevice, TrainingBackend};
use crate::config::ConfigurationManager;
use crate::dataset::ingestion::{download_file, extract_zip_file};
use crate::evaluation::{evaluate, Evaluation};
use crate::model::prepare_base_model;
use crate::training::{train, TrainingHistory};
use crate::utils::error::Result;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DataIngestion,
    PrepareBaseModel,
    Training,
    Evaluation,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::DataIngestion,
        Stage::PrepareBaseModel,
        Stage::Training,
        Stage::Evaluation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::DataIngestion => "Data Ingestion",
            Stage::PrepareBaseModel => "Prepare base model",
            Stage::Training => "Training",
            Stage::Evaluation => "Evaluation",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run one stage with start/completion/failure logging
pub fn run_stage<T, F>(name: &str, stage: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    info!(">>>>>> stage {} started <<<<<<", name);
    match stage() {
        Ok(value) => {
            info!(">>>>>> stage {} completed <<<<<<\n\nx==========x", name);
            Ok(value)
        }
        Err(err) => {
            error!(stage = name, error = %err, "stage failed");
            Err(err)
        }
    }
}

/// Drives the stages against one configuration
pub struct Pipeline {
    manager: ConfigurationManager,
    device: PipelineDevice,
}

impl Pipeline {
    pub fn new(manager: ConfigurationManager) -> Self {
        Self {
            manager,
            device: pipeline_device(),
        }
    }

    pub fn ingest(&self) -> Result<()> {
        run_stage(Stage::DataIngestion.name(), || {
            let config = self.manager.get_data_ingestion_config()?;
            download_file(&config)?;
            extract_zip_file(&config)
        })
    }

    pub fn prepare_base_model(&self) -> Result<()> {
        run_stage(Stage::PrepareBaseModel.name(), || {
            let config = self.manager.get_prepare_base_model_config()?;
            prepare_base_model::<DefaultBackend>(&config, &self.device)?;
            Ok(())
        })
    }

    pub fn train(&self) -> Result<TrainingHistory> {
        run_stage(Stage::Training.name(), || {
            let callbacks = self.manager.get_prepare_callbacks_config()?;
            let config = self.manager.get_training_config()?;
            train::<TrainingBackend>(&config, &callbacks, &self.device)
        })
    }

    pub fn evaluate(&self) -> Result<Evaluation> {
        run_stage(Stage::Evaluation.name(), || {
            let config = self.manager.get_evaluation_config()?;
            evaluate::<DefaultBackend>(&config, &self.device)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BackboneParams, DataIngestionSection, EvaluationSection, Params, PipelineConfig,
        PrepareBaseModelSection, PrepareCallbacksSection, TrainingSection,
    };
    use crate::dataset::loader::test_support::create_image_tree;
    use crate::model::ArtifactKind;
    use crate::utils::error::PipelineError;
    use std::path::Path;
    use tempfile::TempDir;

    fn tiny_manager(root: &Path) -> ConfigurationManager {
        let artifacts = root.join("artifacts");
        let data = root.join("data");
        let config = PipelineConfig {
            artifacts_root: artifacts.clone(),
            data_ingestion: DataIngestionSection {
                root_dir: artifacts.join("data_ingestion"),
                source_url: "http://127.0.0.1:9/data.zip".to_string(),
                local_data_file: artifacts.join("data_ingestion/data.zip"),
                unzip_dir: artifacts.join("data_ingestion"),
            },
            prepare_base_model: PrepareBaseModelSection {
                root_dir: artifacts.join("prepare_base_model"),
                base_model_path: artifacts.join("prepare_base_model/base_model"),
                updated_base_model_path: artifacts.join("prepare_base_model/base_model_updated"),
                pretrained_weights: None,
            },
            prepare_callbacks: PrepareCallbacksSection {
                root_dir: artifacts.join("prepare_callbacks"),
                tensorboard_root_log_dir: artifacts.join("prepare_callbacks/tensorboard_log_dir"),
                checkpoint_model_filepath: artifacts.join("prepare_callbacks/checkpoint_dir/model"),
            },
            training: TrainingSection {
                root_dir: artifacts.join("training"),
                trained_model_path: artifacts.join("training/model"),
                training_data: data.clone(),
            },
            evaluation: EvaluationSection {
                path_of_model: artifacts.join("training/model"),
                training_data: data,
                score_path: artifacts.join("scores.json"),
                report_path: artifacts.join("evaluation/report.json"),
            },
        };
        let params = Params {
            image_size: vec![8, 8, 3],
            batch_size: 4,
            epochs: 1,
            classes: 2,
            augmentation: false,
            validation_split: 0.3,
            backbone: BackboneParams {
                filters: vec![4],
                convs_per_block: vec![1],
            },
            ..Params::default()
        };
        ConfigurationManager::from_parts(config, params).unwrap()
    }

    #[test]
    fn test_run_stage_passes_value_through() {
        let value = run_stage("double", || Ok(21 * 2)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_run_stage_returns_error_unchanged() {
        let err = run_stage::<(), _>("broken", || {
            Err(PipelineError::artifact_missing("prepared model", "artifacts/x"))
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { ref kind, .. } if kind == "prepared model"));
    }

    #[test]
    fn test_configuration_failure_surfaces_through_run_stage() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = run_stage("Configuration", || {
            ConfigurationManager::new(&missing, &missing)
        })
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref msg) if msg.contains("missing.toml")));
    }

    #[test]
    fn test_stages_chain_through_artifacts() {
        let dir = TempDir::new().unwrap();
        create_image_tree(&dir.path().join("data"), &["normal", "tumor"], 6);
        let pipeline = Pipeline::new(tiny_manager(dir.path()));

        // training before preparation has nothing to load
        let err = pipeline.train().unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));

        pipeline.prepare_base_model().unwrap();
        let history = pipeline.train().unwrap();
        assert_eq!(history.len(), 1);

        let evaluation = pipeline.evaluate().unwrap();
        assert!((0.0..=1.0).contains(&evaluation.score.accuracy));

        let artifacts = dir.path().join("artifacts");
        let trained = artifacts.join("training/model");
        crate::model::ensure_artifact_exists(ArtifactKind::Trained, &trained).unwrap();
        assert!(artifacts.join("scores.json").exists());
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<&str> = Stage::ALL.iter().map(Stage::name).collect();
        assert_eq!(
            names,
            vec!["Data Ingestion", "Prepare base model", "Training", "Evaluation"]
        );
    }
}
