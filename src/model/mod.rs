//! Model module for the convolutional classifier using the Burn framework
//!
//! This module provides:
//! - A VGG-style convolutional backbone
//! - The flatten + dense classification head and freeze policies
//! - Artifact persistence (weights record plus JSON manifest)
//! - The base model preparation stage

pub mod artifact;
pub mod classifier;
pub mod preparer;
pub mod vgg;

// Re-export main types for convenience
pub use artifact::{
    ensure_artifact_exists, load_classifier, load_prepared, save_model, ArtifactKind,
    ArtifactManifest,
};
pub use classifier::{ClassifierConfig, HeadConfig, ImageClassifier};
pub use preparer::{build_base_model, prepare_base_model, update_base_model};
pub use vgg::{Backbone, BackboneConfig};
