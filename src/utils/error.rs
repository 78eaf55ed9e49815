//! Error Handling Module
//!
//! Defines the error type shared by every pipeline stage.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or missing hyperparameter / path
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An upstream stage has not produced its artifact yet
    #[error("Artifact missing: {kind} artifact not found at '{path}'")]
    ArtifactMissing { kind: String, path: PathBuf },

    /// Zero classes, zero samples, corrupt images, mismatched label maps
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Any failure raised inside the fit loop
    #[error("Training failure at epoch {epoch}: {source}")]
    Training {
        epoch: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error recording or restoring model weights
    #[error("Model error: {0}")]
    Model(String),

    /// Error fetching the dataset archive
    #[error("Download error: {0}")]
    Download(String),

    /// Error extracting the dataset archive
    #[error("Archive error: {0}")]
    Archive(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Shorthand for a missing artifact of the given generation
    pub fn artifact_missing(kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PipelineError::ArtifactMissing {
            kind: kind.into(),
            path: path.into(),
        }
    }

    /// Attribute a failure to a fit-loop pass; already attributed errors pass through
    pub fn during_epoch(self, epoch: usize) -> Self {
        match self {
            err @ PipelineError::Training { .. } => err,
            other => PipelineError::Training {
                epoch,
                source: Box::new(other),
            },
        }
    }

    /// Whether this is a data integrity failure, possibly wrapped by the fit loop
    pub fn is_data_integrity(&self) -> bool {
        match self {
            PipelineError::DataIntegrity(_) | PipelineError::ImageLoad(..) => true,
            PipelineError::Training { source, .. } => source.is_data_integrity(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::DataIntegrity(err.to_string())
    }
}

impl From<burn::record::RecorderError> for PipelineError {
    fn from(err: burn::record::RecorderError) -> Self {
        PipelineError::Model(format!("{:?}", err))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Download(err.to_string())
    }
}

impl From<zip::result::ZipError> for PipelineError {
    fn from(err: zip::result::ZipError) -> Self {
        PipelineError::Archive(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
