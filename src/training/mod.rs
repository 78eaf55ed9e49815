//! Training module
//!
//! This module provides:
//! - Lifecycle callbacks (metrics log, best checkpoint)
//! - Per-epoch history records
//! - The custom fit loop and the training stage

pub mod callbacks;
pub mod history;
pub mod trainer;

pub use callbacks::{
    build_callbacks, run_timestamp, CallbackSet, EpochContext, MetricsLogger, ModelCheckpoint,
    TrainBegin, TrainingCallback,
};
pub use history::{EpochMetrics, TrainingHistory};
pub use trainer::{fit, train};
