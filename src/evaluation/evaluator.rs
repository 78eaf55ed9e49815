//! Model evaluation
//!
//! Scores the trained artifact once over the validation partition and
//! persists the `{loss, accuracy}` record plus a per-class report.

use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::EvaluationConfig;
use crate::dataset::generator::{
    build_validation_generator, DataGenerator, ImageBatch, ImageBatcher,
};
use crate::model::{ensure_artifact_exists, load_classifier, ArtifactKind, ImageClassifier};
use crate::utils::error::{PipelineError, Result};
use crate::utils::metrics::ClassificationReport;
use crate::utils::save_json;

/// Persisted score, exactly these two keys
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreRecord {
    pub loss: f64,
    pub accuracy: f64,
}

/// One full pass of a model over a generator
#[derive(Debug, Clone)]
pub struct ModelScore {
    /// Sample-weighted mean cross-entropy
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

impl ModelScore {
    pub fn record(&self) -> ScoreRecord {
        ScoreRecord {
            loss: self.loss,
            accuracy: self.accuracy,
        }
    }
}

/// Outputs of the evaluation stage
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub score: ScoreRecord,
    pub report: ClassificationReport,
}

fn labels_of<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|values| values.into_iter().map(|v| v as usize).collect())
        .map_err(|e| PipelineError::Model(format!("failed to read labels: {:?}", e)))
}

/// Run `model` over one epoch of `generator` without updating it
pub fn score_model<B: Backend>(
    model: &ImageClassifier<B>,
    generator: &mut DataGenerator,
    device: &B::Device,
) -> Result<ModelScore> {
    let batcher = ImageBatcher::new(generator.target_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss_sum = 0.0;
    let mut predictions = Vec::with_capacity(generator.len());
    let mut targets = Vec::with_capacity(generator.len());

    for items in generator.epoch() {
        let batch: ImageBatch<B> = Batcher::<B, _, _>::batch(&batcher, items?, device);
        let batch_size = batch.targets.dims()[0];

        let logits = model.forward_logits(batch.images);
        let loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss_sum += loss * batch_size as f64;

        predictions.extend(labels_of(logits.argmax(1).reshape([batch_size]))?);
        targets.extend(labels_of(batch.targets)?);
    }

    if targets.is_empty() {
        return Err(PipelineError::DataIntegrity(
            "validation generator produced no batches".to_string(),
        ));
    }

    let correct = predictions
        .iter()
        .zip(&targets)
        .filter(|(p, t)| p == t)
        .count();

    Ok(ModelScore {
        loss: loss_sum / targets.len() as f64,
        accuracy: correct as f64 / targets.len() as f64,
        predictions,
        targets,
    })
}

pub fn save_score(score: &ScoreRecord, path: &Path) -> Result<()> {
    save_json(path, score)
}

/// Run the evaluation stage
pub fn evaluate<B: Backend>(config: &EvaluationConfig, device: &B::Device) -> Result<Evaluation> {
    ensure_artifact_exists(ArtifactKind::Trained, &config.path_of_model)?;

    let mut generator = build_validation_generator(&config.generator_config())?;
    if generator.is_empty() {
        return Err(PipelineError::DataIntegrity(format!(
            "validation split {} of {} leaves no images to evaluate",
            config.validation_split,
            config.training_data.display()
        )));
    }

    let (model, manifest) =
        load_classifier::<B>(ArtifactKind::Trained, &config.path_of_model, device)?;
    let class_names = generator.class_names();

    match &manifest.class_names {
        Some(trained) if trained != &class_names => {
            return Err(PipelineError::DataIntegrity(format!(
                "model was trained on classes {:?} but {} contains {:?}",
                trained,
                config.training_data.display(),
                class_names
            )));
        }
        _ if model.num_classes() != class_names.len() => {
            return Err(PipelineError::DataIntegrity(format!(
                "model predicts {} classes but {} contains {}",
                model.num_classes(),
                config.training_data.display(),
                class_names.len()
            )));
        }
        _ => {}
    }

    let scored = score_model(&model, &mut generator, device)?;
    let score = scored.record();
    save_score(&score, &config.score_path)?;

    let report =
        ClassificationReport::from_predictions(&scored.predictions, &scored.targets, &class_names);
    save_json(&config.report_path, &report)?;

    info!(
        loss = score.loss,
        accuracy = score.accuracy,
        samples = scored.targets.len(),
        macro_f1 = report.overall_metrics.macro_f1_score,
        score_path = %config.score_path.display(),
        "evaluation complete"
    );

    Ok(Evaluation { score, report })
}
