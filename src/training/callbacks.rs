//! Fit-loop lifecycle hooks
//!
//! Hooks are invoked at train begin, after every pass and at train end.
//! Construction has no side effects; directories and files are created the
//! first time a hook fires.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Local;
use tracing::{debug, info};

use crate::config::PrepareCallbacksConfig;
use crate::model::{save_model, ArtifactKind, ArtifactManifest, ImageClassifier};
use crate::training::history::{EpochMetrics, TrainingHistory};
use crate::utils::error::Result;

/// Timestamp format of run log directories
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Timestamp identifying one fit call
pub fn run_timestamp() -> String {
    Local::now().format(RUN_TIMESTAMP_FORMAT).to_string()
}

/// Shape of the upcoming fit call
#[derive(Debug, Clone, Copy)]
pub struct TrainBegin {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
}

/// State handed to hooks after each pass
pub struct EpochContext<'a, B: Backend> {
    pub metrics: &'a EpochMetrics,
    pub model: &'a ImageClassifier<B>,
    /// Manifest of the network being trained
    pub manifest: &'a ArtifactManifest,
    pub class_names: &'a [String],
}

/// A training lifecycle hook
///
/// All methods default to no-ops.
pub trait TrainingCallback<B: Backend> {
    fn on_train_begin(&mut self, _info: &TrainBegin) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _ctx: &EpochContext<'_, B>) -> Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self, _history: &TrainingHistory) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Ordered hooks for one fit call
pub struct CallbackSet<B: Backend> {
    callbacks: Vec<Box<dyn TrainingCallback<B>>>,
}

impl<B: Backend> Default for CallbackSet<B> {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }
}

impl<B: Backend> CallbackSet<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<C: TrainingCallback<B> + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.callbacks.iter().map(|cb| cb.name()).collect()
    }

    pub fn on_train_begin(&mut self, info: &TrainBegin) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_train_begin(info)?;
        }
        Ok(())
    }

    pub fn on_epoch_end(&mut self, ctx: &EpochContext<'_, B>) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_epoch_end(ctx)?;
        }
        Ok(())
    }

    pub fn on_train_end(&mut self, history: &TrainingHistory) -> Result<()> {
        for cb in &mut self.callbacks {
            cb.on_train_end(history)?;
        }
        Ok(())
    }
}

const METRICS_HEADER: &str =
    "epoch,train_loss,train_accuracy,val_loss,val_accuracy,learning_rate,seconds";

/// Appends one CSV row per pass under a run-scoped log directory
pub struct MetricsLogger {
    log_dir: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl MetricsLogger {
    /// Logs go to `<root_log_dir>/tb_logs_at_<timestamp>/`
    pub fn new(root_log_dir: &Path, timestamp: &str) -> Self {
        Self {
            log_dir: root_log_dir.join(format!("tb_logs_at_{}", timestamp)),
            writer: None,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn metrics_file(&self) -> PathBuf {
        self.log_dir.join("metrics.csv")
    }

    fn open(&self) -> Result<BufWriter<File>> {
        fs::create_dir_all(&self.log_dir)?;
        let mut writer = BufWriter::new(File::create(self.metrics_file())?);
        writeln!(writer, "{}", METRICS_HEADER)?;
        Ok(writer)
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open()?,
        };
        Ok(self.writer.insert(writer))
    }
}

impl<B: Backend> TrainingCallback<B> for MetricsLogger {
    fn on_train_begin(&mut self, _info: &TrainBegin) -> Result<()> {
        self.writer()?.flush()?;
        info!(dir = %self.log_dir.display(), "metrics logging started");
        Ok(())
    }

    fn on_epoch_end(&mut self, ctx: &EpochContext<'_, B>) -> Result<()> {
        let m = ctx.metrics;
        let writer = self.writer()?;
        writeln!(
            writer,
            "{},{:.6},{:.6},{:.6},{:.6},{},{:.3}",
            m.epoch,
            m.train_loss,
            m.train_accuracy,
            m.val_loss,
            m.val_accuracy,
            m.learning_rate,
            m.seconds
        )?;
        writer.flush()?;
        Ok(())
    }

    fn on_train_end(&mut self, _history: &TrainingHistory) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MetricsLogger"
    }
}

/// Keeps the network with the best validation accuracy seen so far
///
/// The first pass always writes; later passes overwrite only on a strict
/// improvement.
pub struct ModelCheckpoint {
    filepath: PathBuf,
    best: Option<f64>,
    saved_epochs: Vec<usize>,
}

impl ModelCheckpoint {
    pub fn new(filepath: &Path) -> Self {
        Self {
            filepath: filepath.to_path_buf(),
            best: None,
            saved_epochs: Vec::new(),
        }
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Passes at which the checkpoint was written
    pub fn saved_epochs(&self) -> &[usize] {
        &self.saved_epochs
    }
}

impl<B: Backend> TrainingCallback<B> for ModelCheckpoint {
    fn on_epoch_end(&mut self, ctx: &EpochContext<'_, B>) -> Result<()> {
        let current = ctx.metrics.val_accuracy;
        let epoch = ctx.metrics.epoch;

        let improved = match self.best {
            None => true,
            Some(best) => current > best,
        };
        if !improved {
            debug!(
                epoch,
                val_accuracy = current,
                best = ?self.best,
                "val_accuracy did not improve"
            );
            return Ok(());
        }

        match self.best {
            Some(best) => info!(
                epoch,
                "val_accuracy improved from {:.5} to {:.5}, saving model to {}",
                best,
                current,
                self.filepath.display()
            ),
            None => info!(
                epoch,
                "val_accuracy is {:.5}, saving model to {}",
                current,
                self.filepath.display()
            ),
        }

        let manifest = ctx.manifest.successor(
            ArtifactKind::Checkpoint,
            ctx.class_names.to_vec(),
            epoch,
        );
        save_model(ctx.model, &manifest, &self.filepath)?;

        self.best = Some(current);
        self.saved_epochs.push(epoch);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ModelCheckpoint"
    }
}

/// Metrics logger then best checkpoint
pub fn build_callbacks<B: Backend>(
    config: &PrepareCallbacksConfig,
    timestamp: &str,
) -> CallbackSet<B> {
    let mut callbacks = CallbackSet::new();
    callbacks.add(MetricsLogger::new(&config.tensorboard_root_log_dir, timestamp));
    callbacks.add(ModelCheckpoint::new(&config.checkpoint_model_filepath));
    callbacks
}
