//! Model artifact persistence
//!
//! An artifact at `path` is two files: the burn record `path.mpk` written by
//! [`CompactRecorder`] and the JSON manifest `path.json` describing how to
//! rebuild the module before the record can be loaded into it.

use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CompileConfig, FreezePolicy};
use crate::model::classifier::{ClassifierConfig, HeadConfig, ImageClassifier};
use crate::model::vgg::{Backbone, BackboneConfig};
use crate::utils::error::{PipelineError, Result};
use crate::utils::{load_json, save_json};

/// Which stage produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Backbone only, no head
    Base,
    /// Backbone plus head, frozen and compiled, not yet trained
    Prepared,
    /// Output of the full fit loop
    Trained,
    /// Best-so-far snapshot taken during fitting
    Checkpoint,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactKind::Base => "base model",
            ArtifactKind::Prepared => "prepared model",
            ArtifactKind::Trained => "trained model",
            ArtifactKind::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

/// Architecture description stored next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub kind: ArtifactKind,
    pub backbone: BackboneConfig,
    /// Absent for the base artifact
    pub head: Option<HeadConfig>,
    pub freeze: FreezePolicy,
    pub compile: Option<CompileConfig>,
    /// Class names by label index, once a dataset has been seen
    pub class_names: Option<Vec<String>>,
    /// Last completed epoch for trained and checkpoint artifacts
    pub epoch: Option<usize>,
    pub created_at: DateTime<Local>,
}

impl ArtifactManifest {
    pub fn base(backbone: BackboneConfig) -> Self {
        Self {
            kind: ArtifactKind::Base,
            backbone,
            head: None,
            freeze: FreezePolicy::None,
            compile: None,
            class_names: None,
            epoch: None,
            created_at: Local::now(),
        }
    }

    pub fn prepared(
        config: &ClassifierConfig,
        freeze: FreezePolicy,
        compile: CompileConfig,
    ) -> Self {
        Self {
            kind: ArtifactKind::Prepared,
            backbone: config.backbone.clone(),
            head: Some(config.head.clone()),
            freeze,
            compile: Some(compile),
            class_names: None,
            epoch: None,
            created_at: Local::now(),
        }
    }

    /// Derive the manifest of a later generation from this one
    pub fn successor(&self, kind: ArtifactKind, class_names: Vec<String>, epoch: usize) -> Self {
        Self {
            kind,
            class_names: Some(class_names),
            epoch: Some(epoch),
            created_at: Local::now(),
            ..self.clone()
        }
    }

    /// Full network config; fails for head-less artifacts
    pub fn classifier_config(&self) -> Result<ClassifierConfig> {
        let head = self.head.clone().ok_or_else(|| {
            PipelineError::Model(format!(
                "{} artifact has no classification head",
                self.kind
            ))
        })?;
        Ok(ClassifierConfig::new(self.backbone.clone(), head))
    }

    pub fn compile(&self) -> Result<CompileConfig> {
        self.compile.ok_or_else(|| {
            PipelineError::Model(format!("{} artifact carries no compile settings", self.kind))
        })
    }
}

/// Weights file of the artifact at `path`
pub fn weights_path(path: &Path) -> PathBuf {
    path.with_extension("mpk")
}

/// Manifest file of the artifact at `path`
pub fn manifest_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

/// Fail with `ArtifactMissing` unless both files of the artifact exist
pub fn ensure_artifact_exists(kind: ArtifactKind, path: &Path) -> Result<()> {
    for file in [weights_path(path), manifest_path(path)] {
        if !file.is_file() {
            return Err(PipelineError::artifact_missing(kind.to_string(), file));
        }
    }
    Ok(())
}

/// Write any module plus its manifest
pub fn save_model<B, M>(module: &M, manifest: &ArtifactManifest, path: &Path) -> Result<()>
where
    B: Backend,
    M: Module<B> + Clone,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let recorder = CompactRecorder::new();
    module.clone().save_file(weights_path(path), &recorder)?;
    save_json(&manifest_path(path), manifest)?;

    info!(
        kind = %manifest.kind,
        path = %weights_path(path).display(),
        "artifact saved"
    );
    Ok(())
}

pub fn load_manifest(kind: ArtifactKind, path: &Path) -> Result<ArtifactManifest> {
    ensure_artifact_exists(kind, path)?;
    load_json(&manifest_path(path))
}

/// Rebuild a head-less backbone artifact
pub fn load_backbone<B: Backend>(path: &Path, device: &B::Device) -> Result<Backbone<B>> {
    let manifest = load_manifest(ArtifactKind::Base, path)?;
    let recorder = CompactRecorder::new();
    let backbone = manifest
        .backbone
        .init::<B>(device)
        .load_file(weights_path(path), &recorder, device)?;
    Ok(backbone)
}

/// Rebuild a classifier artifact and re-apply its freeze policy
///
/// Gradient flags are not part of the record, so the policy stored in the
/// manifest is applied again after the weights are loaded.
pub fn load_classifier<B: Backend>(
    kind: ArtifactKind,
    path: &Path,
    device: &B::Device,
) -> Result<(ImageClassifier<B>, ArtifactManifest)> {
    let manifest = load_manifest(kind, path)?;
    let config = manifest.classifier_config()?;

    let recorder = CompactRecorder::new();
    let model = config
        .init::<B>(device)?
        .load_file(weights_path(path), &recorder, device)?
        .apply_freeze(manifest.freeze)?;

    debug!(
        kind = %manifest.kind,
        classes = model.num_classes(),
        freeze = ?manifest.freeze,
        "artifact loaded"
    );
    Ok((model, manifest))
}

/// Load the prepared artifact
pub fn load_prepared<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(ImageClassifier<B>, ArtifactManifest)> {
    load_classifier(ArtifactKind::Prepared, path, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossKind;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(
            BackboneConfig::new(vec![4], vec![1]),
            HeadConfig::new(2, 8, 8),
        )
    }

    fn compile() -> CompileConfig {
        CompileConfig {
            learning_rate: 0.01,
            momentum: 0.9,
            loss: LossKind::CategoricalCrossentropy,
        }
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let err = ensure_artifact_exists(ArtifactKind::Trained, &dir.path().join("model"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn test_saved_classifier_predicts_identically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/model");
        let device = Default::default();

        let config = tiny_config();
        let model = config.init::<TestBackend>(&device).unwrap();
        let manifest = ArtifactManifest::prepared(&config, FreezePolicy::All, compile());
        save_model(&model, &manifest, &path).unwrap();

        assert!(path.with_extension("mpk").is_file());
        assert!(path.with_extension("json").is_file());

        let (loaded, loaded_manifest) = load_prepared::<TestBackend>(&path, &device).unwrap();
        assert_eq!(loaded_manifest.kind, ArtifactKind::Prepared);
        assert_eq!(loaded_manifest.freeze, FreezePolicy::All);
        assert_eq!(loaded_manifest.compile().unwrap(), compile());

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
        let expected = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        // the compact recorder stores half precision weights
        for (a, b) in expected.iter().zip(&actual) {
            assert!((a - b).abs() < 1e-2);
        }
    }

    #[test]
    fn test_base_artifact_has_no_head() {
        let manifest = ArtifactManifest::base(BackboneConfig::new(vec![4], vec![1]));
        assert!(manifest.classifier_config().is_err());
        assert!(manifest.compile().is_err());
    }

    #[test]
    fn test_successor_keeps_architecture() {
        let manifest = ArtifactManifest::prepared(&tiny_config(), FreezePolicy::All, compile());
        let trained = manifest.successor(
            ArtifactKind::Trained,
            vec!["a".to_string(), "b".to_string()],
            3,
        );
        assert_eq!(trained.kind, ArtifactKind::Trained);
        assert_eq!(trained.epoch, Some(3));
        assert_eq!(trained.class_names.as_deref().map(|c| c.len()), Some(2));
        assert_eq!(trained.freeze, FreezePolicy::All);
        assert!(trained.classifier_config().is_ok());
    }
}
