//! CNN Classifier CLI
//!
//! Entry point that runs the fine-tuning pipeline stages against
//! `config/config.toml` and `params.toml`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use cnn_classifier::backend::BACKEND_NAME;
use cnn_classifier::config::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
use cnn_classifier::evaluation::Evaluation;
use cnn_classifier::pipeline::{run_stage, Pipeline, Stage};
use cnn_classifier::training::TrainingHistory;
use cnn_classifier::utils::logging::{init_logging, LogConfig, LogLevel};

/// Fine-tune a convolutional image classifier
///
/// Each stage reads the artifacts written by the previous one, so stages can
/// be re-run individually once their inputs exist.
#[derive(Parser, Debug)]
#[command(name = "cnn_classifier")]
#[command(version)]
#[command(about = "Stage-based CNN fine-tuning pipeline with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Minimum log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Path to the artifact paths file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Path to the hyperparameter file
    #[arg(short, long, global = true, default_value = PARAMS_FILE_PATH)]
    params: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download and unpack the dataset archive
    Ingest,

    /// Build the base backbone and attach the classification head
    PrepareBaseModel,

    /// Fine-tune the prepared model
    Train,

    /// Score the trained model on the validation split
    Evaluate,

    /// Run every stage in order
    Run {
        /// Skip downloading when the dataset is already in place
        #[arg(long, default_value = "false")]
        skip_ingestion: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    init_logging(&log_config).context("failed to initialise logging")?;

    print_banner();

    let manager = run_stage("Configuration", || {
        ConfigurationManager::new(&cli.config, &cli.params)
    })
    .with_context(|| {
        format!(
            "failed to load {} and {}",
            cli.config.display(),
            cli.params.display()
        )
    })?;
    info!(
        backend = BACKEND_NAME,
        level = %log_config.level,
        "configuration loaded"
    );
    let pipeline = Pipeline::new(manager);

    match cli.command {
        Commands::Ingest => pipeline.ingest()?,
        Commands::PrepareBaseModel => pipeline.prepare_base_model()?,
        Commands::Train => print_history(&pipeline.train()?),
        Commands::Evaluate => print_evaluation(&pipeline.evaluate()?),
        Commands::Run { skip_ingestion } => {
            if !skip_ingestion {
                pipeline.ingest()?;
            }
            pipeline.prepare_base_model()?;
            print_history(&pipeline.train()?);
            print_evaluation(&pipeline.evaluate()?);
        }
    }

    println!("{} {}", "✓".green().bold(), "Done".green());
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   CNN Classifier                                             ║
 ║   Transfer-learning pipeline with Burn + Rust                ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
    println!("  {} {}", "Backend:".cyan(), BACKEND_NAME);
    println!(
        "  {} {}",
        "Stages:".cyan(),
        Stage::ALL
            .iter()
            .map(Stage::name)
            .collect::<Vec<_>>()
            .join(" → ")
    );
    println!();
}

fn print_history(history: &TrainingHistory) {
    let Some(best) = history.best() else {
        return;
    };
    println!();
    println!("{}", "Training summary".cyan().bold());
    println!("  Epochs run:          {}", history.len());
    println!(
        "  Best val accuracy:   {} (epoch {})",
        format!("{:.2}%", best.val_accuracy * 100.0).green().bold(),
        best.epoch
    );
    if let Some(last) = history.last() {
        println!("  Final train loss:    {:.4}", last.train_loss);
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    println!();
    println!("{}", "Evaluation".cyan().bold());
    println!("  Loss:      {:.4}", evaluation.score.loss);
    println!(
        "  Accuracy:  {}",
        format!("{:.2}%", evaluation.score.accuracy * 100.0)
            .green()
            .bold()
    );
    println!(
        "  Macro F1:  {:.4}",
        evaluation.report.overall_metrics.macro_f1_score
    );
    for label in &evaluation.report.class_labels {
        if let Some(metrics) = evaluation.report.per_class_metrics.get(label) {
            println!(
                "    {:<20} precision {:.3}  recall {:.3}  f1 {:.3}",
                label, metrics.precision, metrics.recall, metrics.f1_score
            );
        }
    }
}
