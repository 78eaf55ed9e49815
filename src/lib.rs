//! # CNN Classifier
//!
//! A stage-based pipeline that fine-tunes a convolutional image classifier
//! using the Burn framework.
//!
//! ## Features
//!
//! - **Transfer learning** from a VGG-style backbone with a fresh dense head
//! - **Freeze policies** covering the whole backbone or all but its top layers
//! - **Reproducible splits** with a seeded, stratified train/validation partition
//! - **Artifacts on disk** so every stage can be re-run in isolation
//!
//! ## Modules
//!
//! - `config`: TOML configuration and per-stage records
//! - `dataset`: Ingestion, directory scanning, augmentation and batch generators
//! - `model`: Backbone, classification head and artifact persistence
//! - `training`: Fit loop, callbacks and history
//! - `evaluation`: Scoring of the trained model
//! - `pipeline`: Stage runner used by the binary
//! - `utils`: Logging, metrics, and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cnn_classifier::config::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
//! use cnn_classifier::pipeline::Pipeline;
//!
//! let manager = ConfigurationManager::new(CONFIG_FILE_PATH.as_ref(), PARAMS_FILE_PATH.as_ref())?;
//! let pipeline = Pipeline::new(manager);
//! pipeline.prepare_base_model()?;
//! let history = pipeline.train()?;
//! let evaluation = pipeline.evaluate()?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ConfigurationManager, Params, PipelineConfig};
pub use dataset::{DataGenerator, ImageFolder};
pub use evaluation::{Evaluation, ScoreRecord};
pub use model::{ArtifactKind, ArtifactManifest, ImageClassifier};
pub use pipeline::{run_stage, Pipeline, Stage};
pub use training::{TrainingCallback, TrainingHistory};
pub use utils::error::{PipelineError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
