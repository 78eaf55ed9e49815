//! Utilities module for logging, metrics, errors and file helpers
//!
//! This module provides:
//! - Structured logging with tracing
//! - Classification metrics (confusion matrix, precision/recall/F1)
//! - Error handling types
//! - Small filesystem and JSON helpers shared by the stages

pub mod error;
pub mod logging;
pub mod metrics;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

pub use error::{PipelineError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{ClassificationReport, ConfusionMatrix};

/// Create every directory in the list (parents included)
pub fn create_directories<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        fs::create_dir_all(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "created directory");
    }
    Ok(())
}

/// Pretty-print a serializable value as JSON to `path`
pub fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(data)?;
    fs::write(path, json)?;
    info!(path = %path.display(), "json file saved");
    Ok(())
}

/// Load a JSON document from `path`
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    let value = serde_json::from_str(&content)?;
    debug!(path = %path.display(), "json file loaded");
    Ok(value)
}

/// Size of a file in whole kilobytes, formatted for logs
pub fn get_size(path: &Path) -> Result<String> {
    let bytes = fs::metadata(path)?.len();
    Ok(format!("~ {} KB", (bytes as f64 / 1024.0).round() as u64))
}

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}
