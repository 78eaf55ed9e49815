//! Base model preparation
//!
//! Two artifacts come out of this stage: the head-less backbone (*base*) and
//! the backbone with a fresh classification head, frozen per policy and
//! carrying its compile settings (*prepared*).

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use tracing::{info, warn};

use crate::config::PrepareBaseModelConfig;
use crate::model::artifact::{save_model, ArtifactManifest};
use crate::model::classifier::{ClassifierConfig, HeadConfig, ImageClassifier};
use crate::model::vgg::{frozen_mask, Backbone};
use crate::utils::error::{PipelineError, Result};

/// Check every setting before anything is built or written
///
/// Returns the full network description on success.
pub fn validate_prepare_config(config: &PrepareBaseModelConfig) -> Result<ClassifierConfig> {
    let size = config.image_size;
    if size.channels != config.backbone.in_channels {
        return Err(PipelineError::Configuration(format!(
            "image_size has {} channels but the backbone expects {}",
            size.channels, config.backbone.in_channels
        )));
    }

    let classifier = ClassifierConfig::new(
        config.backbone.clone(),
        HeadConfig::new(config.num_classes, size.height, size.width),
    );
    classifier.flatten_size()?;
    frozen_mask(config.freeze, config.backbone.layer_count())?;

    Ok(classifier)
}

/// Build the backbone, load pretrained weights when available and persist it
pub fn build_base_model<B: Backend>(
    config: &PrepareBaseModelConfig,
    device: &B::Device,
) -> Result<Backbone<B>> {
    validate_prepare_config(config)?;

    let mut backbone = config.backbone.init::<B>(device);

    match &config.pretrained_weights {
        Some(path) if path.is_file() => {
            let recorder = CompactRecorder::new();
            backbone = backbone.load_file(path.clone(), &recorder, device)?;
            info!(path = %path.display(), "loaded pretrained backbone weights");
        }
        Some(path) => {
            warn!(
                path = %path.display(),
                "pretrained weights not found, keeping randomly initialised backbone"
            );
        }
        None => {
            warn!("no pretrained weights configured, keeping randomly initialised backbone");
        }
    }

    info!(
        blocks = config.backbone.num_blocks(),
        conv_layers = backbone.layer_count(),
        params = backbone.num_params(),
        "base model built"
    );

    save_model(
        &backbone,
        &ArtifactManifest::base(config.backbone.clone()),
        &config.base_model_path,
    )?;
    Ok(backbone)
}

/// Attach the head, freeze per policy and persist the prepared network
pub fn update_base_model<B: Backend>(
    backbone: Backbone<B>,
    config: &PrepareBaseModelConfig,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let classifier_config = validate_prepare_config(config)?;

    let model = classifier_config
        .with_backbone(backbone, device)?
        .apply_freeze(config.freeze)?;

    let frozen = frozen_mask(config.freeze, config.backbone.layer_count())?
        .into_iter()
        .filter(|&f| f)
        .count();
    info!(
        classes = config.num_classes,
        head_inputs = classifier_config.flatten_size()?,
        frozen_layers = frozen,
        trainable_layers = config.backbone.layer_count() - frozen,
        learning_rate = config.compile.learning_rate,
        momentum = config.compile.momentum,
        loss = ?config.compile.loss,
        "prepared model"
    );

    let manifest = ArtifactManifest::prepared(&classifier_config, config.freeze, config.compile);
    save_model(&model, &manifest, &config.updated_base_model_path)?;
    Ok(model)
}

/// Run the whole stage
pub fn prepare_base_model<B: Backend>(
    config: &PrepareBaseModelConfig,
    device: &B::Device,
) -> Result<ImageClassifier<B>> {
    let backbone = build_base_model::<B>(config, device)?;
    update_base_model(backbone, config, device)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use crate::config::{
        CompileConfig, FreezePolicy, ImageSize, LossKind, PrepareBaseModelConfig,
    };
    use crate::model::vgg::BackboneConfig;

    /// One block, one convolution, 8x8 inputs
    pub fn tiny_prepare_config(root: &Path, classes: usize) -> PrepareBaseModelConfig {
        PrepareBaseModelConfig {
            root_dir: root.to_path_buf(),
            base_model_path: root.join("base_model"),
            updated_base_model_path: root.join("base_model_updated"),
            pretrained_weights: None,
            backbone: BackboneConfig::new(vec![4], vec![1]),
            image_size: ImageSize::new(8, 8, 3),
            num_classes: classes,
            freeze: FreezePolicy::All,
            compile: CompileConfig {
                learning_rate: 0.01,
                momentum: 0.9,
                loss: LossKind::CategoricalCrossentropy,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::tiny_prepare_config;
    use super::*;
    use crate::config::{FreezePolicy, ImageSize};
    use crate::model::artifact::{load_backbone, load_prepared, ArtifactKind};
    use crate::model::vgg::BackboneConfig;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_prepare_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = tiny_prepare_config(dir.path(), 3);
        let device = Default::default();

        let model = prepare_base_model::<TestBackend>(&config, &device).unwrap();
        assert_eq!(model.num_classes(), 3);

        let backbone = load_backbone::<TestBackend>(&config.base_model_path, &device).unwrap();
        assert_eq!(backbone.layer_count(), 1);

        let (prepared, manifest) =
            load_prepared::<TestBackend>(&config.updated_base_model_path, &device).unwrap();
        assert_eq!(prepared.num_classes(), 3);
        assert_eq!(manifest.kind, ArtifactKind::Prepared);
        assert_eq!(manifest.freeze, FreezePolicy::All);
        assert_eq!(manifest.compile().unwrap().momentum, 0.9);
        assert!(manifest.class_names.is_none());
    }

    #[test]
    fn test_pretrained_weights_are_loaded() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();

        let donor = tiny_prepare_config(dir.path(), 2);
        let donor_backbone = build_base_model::<TestBackend>(&donor, &device).unwrap();

        let mut config = tiny_prepare_config(&dir.path().join("second"), 2);
        config.pretrained_weights = Some(donor.base_model_path.with_extension("mpk"));
        let backbone = build_base_model::<TestBackend>(&config, &device).unwrap();

        let input = burn::tensor::Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
        let a = donor_backbone.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = backbone.forward(input).into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-2);
        }
    }

    #[test]
    fn test_invalid_settings_write_nothing() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();

        let mut bad_channels = tiny_prepare_config(dir.path(), 2);
        bad_channels.image_size = ImageSize::new(8, 8, 1);

        let mut bad_size = tiny_prepare_config(dir.path(), 2);
        bad_size.image_size = ImageSize::new(9, 8, 3);

        let mut no_classes = tiny_prepare_config(dir.path(), 0);
        no_classes.num_classes = 0;

        let mut too_deep = tiny_prepare_config(dir.path(), 2);
        too_deep.backbone = BackboneConfig::new(vec![4, 4], vec![1, 1]);
        too_deep.image_size = ImageSize::new(8, 8, 3);
        too_deep.freeze = FreezePolicy::AllButTop(3);

        for config in [bad_channels, bad_size, no_classes, too_deep] {
            let err = prepare_base_model::<TestBackend>(&config, &device).unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)), "{err}");
        }
        assert!(!dir.path().join("base_model.mpk").exists());
    }

    #[test]
    fn test_partial_freeze_is_recorded() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();

        let mut config = tiny_prepare_config(dir.path(), 2);
        config.backbone = BackboneConfig::new(vec![4, 8], vec![2, 1]);
        config.freeze = FreezePolicy::AllButTop(1);

        prepare_base_model::<TestBackend>(&config, &device).unwrap();
        let (_, manifest) =
            load_prepared::<TestBackend>(&config.updated_base_model_path, &device).unwrap();
        assert_eq!(manifest.freeze, FreezePolicy::AllButTop(1));
    }
}
