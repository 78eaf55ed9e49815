//! Dataset acquisition
//!
//! Fetches the zipped image dataset once and unpacks it into the ingestion
//! directory. Both steps are idempotent: an existing archive is reused and
//! extraction overwrites files in place.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use tracing::info;

use crate::config::DataIngestionConfig;
use crate::utils::error::{PipelineError, Result};
use crate::utils::get_size;

/// Download the archive unless it is already present
pub fn download_file(config: &DataIngestionConfig) -> Result<()> {
    let target = &config.local_data_file;

    if target.exists() {
        info!(
            path = %target.display(),
            "File already exists of size: {}",
            get_size(target)?
        );
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    info!(url = %config.source_url, "downloading dataset archive");
    let mut response = reqwest::blocking::get(&config.source_url)?.error_for_status()?;

    // Write to a sibling file first so an interrupted download is not mistaken
    // for a complete archive on the next run
    let partial = target.with_extension("part");
    {
        let mut writer = BufWriter::new(File::create(&partial)?);
        response.copy_to(&mut writer)?;
        writer.flush()?;
    }
    fs::rename(&partial, target)?;

    info!(path = %target.display(), size = %get_size(target)?, "download complete");
    Ok(())
}

/// Extract the archive into `unzip_dir`
pub fn extract_zip_file(config: &DataIngestionConfig) -> Result<()> {
    if !config.local_data_file.exists() {
        return Err(PipelineError::artifact_missing(
            "dataset archive",
            &config.local_data_file,
        ));
    }

    fs::create_dir_all(&config.unzip_dir)?;
    let mut archive = zip::ZipArchive::new(File::open(&config.local_data_file)?)?;
    let entries = archive.len();
    archive.extract(&config.unzip_dir)?;

    info!(
        entries,
        dir = %config.unzip_dir.display(),
        "archive extracted"
    );
    Ok(())
}
