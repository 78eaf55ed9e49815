//! Logging Module
//!
//! Structured logging built on `tracing`. The orchestrator initialises the
//! subscriber exactly once; records go to stdout and, optionally, to a log file.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::utils::error::{PipelineError, Result};
use crate::utils::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors on stdout
    pub ansi_colors: bool,
    /// Optional file sink, appended to
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
            log_file: Some(PathBuf::from("logs/running_logs.log")),
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ..Self::default()
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(PipelineError::Configuration(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_directive().to_uppercase())
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_directive()));

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .compact(),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| PipelineError::Configuration(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

/// Training progress logger
pub struct TrainingLogger {
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch_start = Instant::now();
        tracing::info!(epoch, total = self.total_epochs, "Epoch started");
    }

    /// Log end of an epoch, returning its duration in seconds
    pub fn end_epoch(
        &self,
        epoch: usize,
        train_loss: f64,
        train_accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
    ) -> f64 {
        let elapsed = self.epoch_start.elapsed().as_secs_f64();
        tracing::info!(
            epoch,
            total = self.total_epochs,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            "Epoch {}/{} finished in {}",
            epoch,
            self.total_epochs,
            format_duration(elapsed)
        );
        elapsed
    }

    /// Log completion of the whole fit
    pub fn finish(&self) {
        let elapsed = self.training_start.elapsed().as_secs_f64();
        tracing::info!(
            epochs = self.total_epochs,
            "Training completed in {}",
            format_duration(elapsed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_verbose_config() {
        let config = LogConfig::verbose();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.include_target);
    }

    #[test]
    fn test_level_display() {
        assert_eq!(LogLevel::Info.to_string(), "INFO");
    }
}
