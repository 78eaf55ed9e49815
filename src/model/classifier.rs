//! Backbone plus classification head
//!
//! The head flattens the backbone's feature map and projects it onto one
//! logit per class. Softmax is applied at prediction time; training uses the
//! raw logits.

use burn::{
    config::Config,
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{activation::softmax, backend::Backend, Tensor},
};

use crate::config::FreezePolicy;
use crate::model::vgg::{frozen_mask, Backbone, BackboneConfig};
use crate::utils::error::{self, PipelineError};

/// Dense head sized to the label count and input resolution
#[derive(Config, Debug)]
pub struct HeadConfig {
    pub num_classes: usize,
    pub image_height: usize,
    pub image_width: usize,
}

/// Full network description stored in artifact manifests
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub backbone: BackboneConfig,
    pub head: HeadConfig,
}

impl ClassifierConfig {
    /// Flattened feature width fed to the head
    pub fn flatten_size(&self) -> error::Result<usize> {
        if self.head.num_classes == 0 {
            return Err(PipelineError::Configuration(
                "number of classes must be at least 1".to_string(),
            ));
        }
        let (h, w) = self
            .backbone
            .feature_dims(self.head.image_height, self.head.image_width)?;
        Ok(self.backbone.out_channels() * h * w)
    }

    /// Fresh network with randomly initialised weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<ImageClassifier<B>> {
        let backbone = self.backbone.init(device);
        self.with_backbone(backbone, device)
    }

    /// Attach a new head to an existing backbone
    pub fn with_backbone<B: Backend>(
        &self,
        backbone: Backbone<B>,
        device: &B::Device,
    ) -> error::Result<ImageClassifier<B>> {
        let features = self.flatten_size()?;
        let head = LinearConfig::new(features, self.head.num_classes).init(device);

        Ok(ImageClassifier {
            backbone,
            head,
            num_classes: self.head.num_classes,
        })
    }
}

#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> {
    /// Raw class scores, `[batch, num_classes]`
    pub fn forward_logits(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(x);
        let [batch_size, channels, height, width] = features.dims();
        let flat = features.reshape([batch_size, channels * height * width]);
        self.head.forward(flat)
    }

    /// Class probabilities, rows sum to one
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Freeze backbone layers per `policy`; the head always stays trainable
    pub fn apply_freeze(mut self, policy: FreezePolicy) -> error::Result<Self> {
        let mask = frozen_mask(policy, self.backbone.layer_count())?;
        self.backbone = self.backbone.freeze_layers(&mask);
        Ok(self)
    }
}
