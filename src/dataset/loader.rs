//! Image Folder Loader
//!
//! Scans a dataset root laid out as one subdirectory per class and builds the
//! class-name ↔ index mapping shared by every generator over that root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{PipelineError, Result};

/// File extensions recognised as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// An image directory with a deterministic class mapping
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root_dir: PathBuf,
    /// Every image, grouped by class then sorted by path
    pub samples: Vec<ImageSample>,
    /// Class names ordered by index
    pub class_names: Vec<String>,
    /// Mapping from class name to label index
    pub class_to_idx: BTreeMap<String, usize>,
}

impl ImageFolder {
    /// Scan `root_dir`
    ///
    /// ```text
    /// root_dir/
    /// ├── class_a/
    /// │   ├── image1.jpg
    /// │   └── image2.jpg
    /// └── class_b/
    ///     └── ...
    /// ```
    ///
    /// Classes are indexed in lexicographic order of their directory names so
    /// two scans of the same tree always agree.
    pub fn scan<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if !root_dir.is_dir() {
            return Err(PipelineError::artifact_missing("dataset", root_dir));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        let class_to_idx: BTreeMap<String, usize> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            let before = samples.len();

            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path().to_path_buf();
                if is_image_file(&path) {
                    samples.push(ImageSample { path, label });
                }
            }

            let count = samples.len() - before;
            if count == 0 {
                warn!(class = %class_name, "class directory contains no images");
            }
            debug!(class = %class_name, label, count, "scanned class");
        }

        info!(
            root = %root_dir.display(),
            classes = class_names.len(),
            images = samples.len(),
            "Found {} images belonging to {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            samples,
            class_names,
            class_to_idx,
        })
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Get the number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples per class, indexed by label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Whether the path carries a recognised image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Decode an image, mapping any failure to an error naming the file
pub fn load_image(path: &Path) -> Result<image::DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| PipelineError::ImageLoad(path.to_path_buf(), e.to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;

    use image::{ImageBuffer, Rgb};

    /// Write `per_class` small RGB images into each named class directory
    pub fn create_image_tree(root: &Path, classes: &[&str], per_class: usize) {
        for (c, class) in classes.iter().enumerate() {
            let dir = root.join(class);
            fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let img = ImageBuffer::from_fn(12, 10, |x, y| {
                    Rgb([
                        (x * 20) as u8,
                        (y * 25) as u8,
                        (c * 100 + i * 5) as u8,
                    ])
                });
                img.save(dir.join(format!("img_{:03}.png", i))).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::create_image_tree;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_orders_classes_by_name() {
        let dir = TempDir::new().unwrap();
        create_image_tree(dir.path(), &["tumor", "normal"], 3);
        std::fs::write(dir.path().join("normal/notes.txt"), "not an image").unwrap();

        let folder = ImageFolder::scan(dir.path()).unwrap();

        assert_eq!(folder.class_names, vec!["normal", "tumor"]);
        assert_eq!(folder.class_to_idx["normal"], 0);
        assert_eq!(folder.class_to_idx["tumor"], 1);
        assert_eq!(folder.len(), 6);
        assert_eq!(folder.class_counts(), vec![3, 3]);
    }

    #[test]
    fn test_missing_root_is_artifact_missing() {
        let dir = TempDir::new().unwrap();
        let err = ImageFolder::scan(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("a/b.png")));
        assert!(!is_image_file(Path::new("a/b.txt")));
        assert!(!is_image_file(Path::new("a/b")));
    }

    #[test]
    fn test_corrupt_image_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(err.is_data_integrity());
        assert!(err.to_string().contains("broken.png"));
    }
}
