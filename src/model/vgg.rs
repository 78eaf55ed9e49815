//! VGG-style convolutional backbone
//!
//! Stacks of 3x3 same-padded convolutions with ReLU, each stack closed by a
//! 2x2 max pool. The default shape is the VGG16 feature extractor
//! (13 convolutions in 5 blocks) with the classification top removed.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::config::FreezePolicy;
use crate::utils::error::{self, PipelineError};

/// Shape of the convolutional backbone
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Output channels of each pooling block
    pub filters: Vec<usize>,
    /// Number of convolutions in each block
    pub convs_per_block: Vec<usize>,
    #[config(default = "3")]
    pub in_channels: usize,
}

impl BackboneConfig {
    /// Total number of convolution layers
    pub fn layer_count(&self) -> usize {
        self.convs_per_block.iter().sum()
    }

    pub fn num_blocks(&self) -> usize {
        self.filters.len()
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        self.filters.last().copied().unwrap_or(self.in_channels)
    }

    /// Spatial size of the feature map produced for an `(height, width)` input
    ///
    /// Every block halves both dimensions, so each must be a positive
    /// multiple of `2^blocks`.
    pub fn feature_dims(&self, height: usize, width: usize) -> error::Result<(usize, usize)> {
        let factor = 1usize << self.num_blocks();
        if height < factor || width < factor || height % factor != 0 || width % factor != 0 {
            return Err(PipelineError::Configuration(format!(
                "image size {}x{} does not survive {} pooling stages; both sides must be positive multiples of {}",
                height,
                width,
                self.num_blocks(),
                factor
            )));
        }
        Ok((height / factor, width / factor))
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut channels = self.in_channels;
        let blocks = self
            .filters
            .iter()
            .zip(&self.convs_per_block)
            .map(|(&filters, &convs)| {
                let block = VggBlock::new(channels, filters, convs, device);
                channels = filters;
                block
            })
            .collect();

        Backbone { blocks }
    }
}

/// Convolutions followed by one max pool
#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    pub convs: Vec<Conv2d<B>>,
    pub pool: MaxPool2d,
}

impl<B: Backend> VggBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, convs: usize, device: &B::Device) -> Self {
        let convs = (0..convs)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| relu(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// Feature extractor: `[batch, 3, H, W]` -> `[batch, C, H / 2^n, W / 2^n]`
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub blocks: Vec<VggBlock<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }

    pub fn layer_count(&self) -> usize {
        self.blocks.iter().map(|block| block.convs.len()).sum()
    }

    /// Stop gradient flow into the layers flagged in `mask`
    ///
    /// `mask` is indexed by convolution in forward order across all blocks.
    pub fn freeze_layers(mut self, mask: &[bool]) -> Self {
        let mut index = 0;
        for block in self.blocks.iter_mut() {
            let convs = std::mem::take(&mut block.convs);
            block.convs = convs
                .into_iter()
                .map(|conv| {
                    let frozen = mask.get(index).copied().unwrap_or(false);
                    index += 1;
                    if frozen {
                        conv.no_grad()
                    } else {
                        conv
                    }
                })
                .collect();
        }
        self
    }
}

/// Which of `layer_count` convolutions a policy freezes, in forward order
pub fn frozen_mask(policy: FreezePolicy, layer_count: usize) -> error::Result<Vec<bool>> {
    match policy {
        FreezePolicy::All => Ok(vec![true; layer_count]),
        FreezePolicy::None => Ok(vec![false; layer_count]),
        FreezePolicy::AllButTop(trainable) => {
            if trainable > layer_count {
                return Err(PipelineError::Configuration(format!(
                    "freeze_till = {} exceeds the {} convolution layers of the backbone",
                    trainable, layer_count
                )));
            }
            let frozen = layer_count - trainable;
            Ok((0..layer_count).map(|i| i < frozen).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn vgg16() -> BackboneConfig {
        BackboneConfig::new(vec![64, 128, 256, 512, 512], vec![2, 2, 3, 3, 3])
    }

    #[test]
    fn test_vgg16_shape() {
        let config = vgg16();
        assert_eq!(config.layer_count(), 13);
        assert_eq!(config.out_channels(), 512);
        assert_eq!(config.feature_dims(224, 224).unwrap(), (7, 7));
        assert_eq!(config.feature_dims(224, 160).unwrap(), (7, 5));
    }

    #[test]
    fn test_backbone_config_json() {
        let json = serde_json::to_string(&vgg16()).unwrap();
        let loaded: BackboneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.filters, vec![64, 128, 256, 512, 512]);
        assert_eq!(loaded.convs_per_block, vec![2, 2, 3, 3, 3]);
        assert_eq!(loaded.in_channels, 3);
    }

    #[test]
    fn test_feature_dims_rejects_undivisible_sizes() {
        let config = vgg16();
        assert!(config.feature_dims(16, 16).is_err());
        assert!(config.feature_dims(225, 224).is_err());
        assert!(config.feature_dims(0, 224).is_err());
    }

    #[test]
    fn test_frozen_mask() {
        assert_eq!(frozen_mask(FreezePolicy::All, 3).unwrap(), vec![true; 3]);
        assert_eq!(frozen_mask(FreezePolicy::None, 2).unwrap(), vec![false; 2]);
        assert_eq!(
            frozen_mask(FreezePolicy::AllButTop(2), 5).unwrap(),
            vec![true, true, true, false, false]
        );
        assert_eq!(
            frozen_mask(FreezePolicy::AllButTop(13), 13).unwrap(),
            vec![false; 13]
        );
        assert!(matches!(
            frozen_mask(FreezePolicy::AllButTop(14), 13),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_backbone_forward_shape() {
        let device = Default::default();
        let config = BackboneConfig::new(vec![4, 8], vec![1, 2]);
        let backbone = config.init::<TestBackend>(&device);
        assert_eq!(backbone.layer_count(), 3);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 8], &device);
        assert_eq!(backbone.forward(input).dims(), [2, 8, 4, 2]);
    }
}
