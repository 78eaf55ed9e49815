//! Dataset module for classified image directories
//!
//! This module provides functionality for:
//! - Downloading and unpacking the dataset archive
//! - Scanning a directory with one subdirectory per class
//! - Stratified, seeded train/validation partitioning
//! - Random geometric augmentation of training images
//! - Lazily loaded, restartable batch generators

pub mod augmentation;
pub mod generator;
pub mod ingestion;
pub mod loader;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use generator::{
    build_generators, build_validation_generator, DataGenerator, GeneratorConfig, GeneratorPair,
    ImageBatch, ImageBatcher, ImageItem, Subset,
};
pub use ingestion::{download_file, extract_zip_file};
pub use loader::{ImageFolder, ImageSample};
pub use split::{DatasetSplit, SplitConfig};
