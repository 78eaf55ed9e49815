//! Training stage
//!
//! Loads the prepared network, builds generators and callbacks, runs the
//! fit loop (SGD with momentum, cross-entropy on logits) and persists the
//! trained artifact together with its history.

use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{momentum::MomentumConfig, GradientsParams, Optimizer, SgdConfig},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::config::{CompileConfig, PrepareCallbacksConfig, TrainingConfig};
use crate::dataset::generator::{build_generators, DataGenerator, ImageBatch, ImageBatcher};
use crate::evaluation::score_model;
use crate::model::{
    ensure_artifact_exists, load_prepared, save_model, ArtifactKind, ArtifactManifest,
    ImageClassifier,
};
use crate::training::callbacks::{
    build_callbacks, run_timestamp, CallbackSet, EpochContext, TrainBegin,
};
use crate::training::history::{EpochMetrics, TrainingHistory};
use crate::utils::error::{PipelineError, Result};
use crate::utils::logging::TrainingLogger;

fn batch_progress(steps: usize, epoch: usize, epochs: usize) -> ProgressBar {
    let progress = ProgressBar::new(steps as u64);
    let style = ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches {msg}",
    )
    .map(|style| style.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress.set_style(style);
    progress.set_prefix(format!("Epoch {}/{}", epoch, epochs));
    progress
}

/// One optimisation pass over the training generator
///
/// Returns the updated model with its sample-weighted mean loss and accuracy.
fn train_epoch<B, O>(
    mut model: ImageClassifier<B>,
    optimizer: &mut O,
    generator: &mut DataGenerator,
    learning_rate: f64,
    progress: &ProgressBar,
    device: &B::Device,
) -> Result<(ImageClassifier<B>, f64, f64)>
where
    B: AutodiffBackend,
    O: Optimizer<ImageClassifier<B>, B>,
{
    let batcher = ImageBatcher::new(generator.target_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for items in generator.epoch() {
        let batch: ImageBatch<B> = Batcher::<B, _, _>::batch(&batcher, items?, device);
        let batch_size = batch.targets.dims()[0];

        let logits = model.forward_logits(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        if !loss_value.is_finite() {
            return Err(PipelineError::Model(format!(
                "loss diverged to {} after {} samples",
                loss_value, seen
            )));
        }

        let batch_correct: i64 = logits
            .argmax(1)
            .reshape([batch_size])
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(learning_rate, model, grads);

        loss_sum += loss_value * batch_size as f64;
        correct += batch_correct as usize;
        seen += batch_size;

        progress.inc(1);
        progress.set_message(format!(
            "loss {:.4} acc {:.3}",
            loss_sum / seen as f64,
            correct as f64 / seen as f64
        ));
    }

    if seen == 0 {
        return Err(PipelineError::DataIntegrity(
            "training generator produced no batches".to_string(),
        ));
    }

    Ok((model, loss_sum / seen as f64, correct as f64 / seen as f64))
}

/// Custom fit loop
///
/// Runs `epochs` passes, scores the validation generator after each pass and
/// fires the callbacks. Any failure is reported with the pass it happened in.
pub fn fit<B: AutodiffBackend>(
    mut model: ImageClassifier<B>,
    manifest: &ArtifactManifest,
    generators: (&mut DataGenerator, &mut DataGenerator),
    epochs: usize,
    compile: CompileConfig,
    mut callbacks: CallbackSet<B>,
    device: &B::Device,
) -> Result<(ImageClassifier<B>, TrainingHistory)> {
    let (train, validation) = generators;
    let class_names = train.class_names();

    let mut optimizer = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(compile.momentum)
                .with_dampening(0.0),
        ))
        .init::<B, ImageClassifier<B>>();

    let begin = TrainBegin {
        epochs,
        steps_per_epoch: train.steps_per_epoch(),
        validation_steps: validation.steps_per_epoch(),
    };
    callbacks
        .on_train_begin(&begin)
        .map_err(|e| e.during_epoch(0))?;

    info!(
        epochs,
        steps_per_epoch = begin.steps_per_epoch,
        validation_steps = begin.validation_steps,
        learning_rate = compile.learning_rate,
        momentum = compile.momentum,
        callbacks = ?callbacks.names(),
        "starting fit"
    );

    let mut logger = TrainingLogger::new(epochs);
    let mut history = TrainingHistory::default();

    for epoch in 1..=epochs {
        logger.start_epoch(epoch);
        let progress = batch_progress(begin.steps_per_epoch, epoch, epochs);

        let (updated, train_loss, train_accuracy) = train_epoch(
            model,
            &mut optimizer,
            train,
            compile.learning_rate,
            &progress,
            device,
        )
        .map_err(|e| e.during_epoch(epoch))?;
        model = updated;
        progress.finish_and_clear();

        let val = score_model(&model.valid(), validation, device)
            .map_err(|e| e.during_epoch(epoch))?;

        let seconds = logger.end_epoch(epoch, train_loss, train_accuracy, val.loss, val.accuracy);

        let metrics = EpochMetrics {
            epoch,
            train_loss,
            train_accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            learning_rate: compile.learning_rate,
            seconds,
        };

        println!(
            "  {} loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            format!("Epoch {}/{}", epoch, epochs).yellow().bold(),
            train_loss,
            train_accuracy,
            val.loss,
            val.accuracy
        );

        let ctx = EpochContext {
            metrics: &metrics,
            model: &model,
            manifest,
            class_names: &class_names,
        };
        callbacks
            .on_epoch_end(&ctx)
            .map_err(|e| e.during_epoch(epoch))?;

        history.push(metrics);
    }

    callbacks
        .on_train_end(&history)
        .map_err(|e| e.during_epoch(epochs))?;
    logger.finish();

    Ok((model, history))
}

/// Run the training stage
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    callbacks_config: &PrepareCallbacksConfig,
    device: &B::Device,
) -> Result<TrainingHistory> {
    ensure_artifact_exists(ArtifactKind::Prepared, &config.updated_base_model_path)?;

    // Data problems surface before any weights are touched
    let mut generators = build_generators(&config.generator_config())?;

    let (model, manifest) = load_prepared::<B>(&config.updated_base_model_path, device)?;
    let class_names = generators.train.class_names();

    if model.num_classes() != class_names.len() {
        return Err(PipelineError::Configuration(format!(
            "prepared model has {} outputs but {} contains {} classes {:?}",
            model.num_classes(),
            config.training_data.display(),
            class_names.len(),
            class_names
        )));
    }
    if let Some(head) = &manifest.head {
        if (head.image_height, head.image_width) != config.image_size.spatial() {
            return Err(PipelineError::Configuration(format!(
                "prepared model expects {}x{} images but training is configured for {}x{}",
                head.image_height,
                head.image_width,
                config.image_size.height,
                config.image_size.width
            )));
        }
    }

    let compile = manifest.compile()?;
    let callbacks = build_callbacks::<B>(callbacks_config, &run_timestamp());
    debug!(classes = ?class_names, "class mapping");

    let (model, history) = fit(
        model,
        &manifest,
        (&mut generators.train, &mut generators.validation),
        config.epochs,
        compile,
        callbacks,
        device,
    )?;

    let trained = manifest.successor(ArtifactKind::Trained, class_names, history.len());
    save_model(&model, &trained, &config.trained_model_path)?;
    history.save(&config.history_path)?;

    if let Some(best) = history.best() {
        info!(
            best_epoch = best.epoch,
            best_val_accuracy = best.val_accuracy,
            path = %config.trained_model_path.display(),
            "training finished"
        );
    }

    Ok(history)
}
