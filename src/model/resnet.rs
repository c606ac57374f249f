//! ResNet v1 from the ["Deep Residual Learning for Image Recognition"](https://arxiv.org/abs/1512.03385) paper.

use crate::model::blocks::{Activation, ConvBn, ConvBnConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

const WIDTHS: [usize; 4] = [64, 128, 256, 512];

#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    pub in_channels: usize,
    /// Width of the inner convolutions. The block outputs `width * expansion` channels.
    pub width: usize,
    pub stride: usize,
    /// Use the 1x1-3x3-1x1 bottleneck design (expansion 4) instead of two 3x3 convolutions.
    #[config(default = false)]
    pub bottleneck: bool,
}

impl ResidualBlockConfig {
    pub fn out_channels(&self) -> usize {
        if self.bottleneck {
            self.width * 4
        } else {
            self.width
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        let out_channels = self.out_channels();
        let (conv1, conv2, conv3) = if self.bottleneck {
            let conv1 = ConvBnConfig::new(self.in_channels, self.width).init(device);
            let conv2 = ConvBnConfig::square(self.width, self.width, 3)
                .with_stride(self.stride)
                .init(device);
            let conv3 = ConvBnConfig::new(self.width, out_channels)
                .with_activation(Activation::Identity)
                .init(device);
            (conv1, conv2, Some(conv3))
        } else {
            let conv1 = ConvBnConfig::square(self.in_channels, self.width, 3)
                .with_stride(self.stride)
                .init(device);
            let conv2 = ConvBnConfig::square(self.width, self.width, 3)
                .with_activation(Activation::Identity)
                .init(device);
            (conv1, conv2, None)
        };
        let downsample = (self.stride != 1 || self.in_channels != out_channels).then(|| {
            ConvBnConfig::new(self.in_channels, out_channels)
                .with_stride(self.stride)
                .with_activation(Activation::Identity)
                .init(device)
        });
        ResidualBlock {
            conv1,
            conv2,
            conv3,
            downsample,
        }
    }
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv1: ConvBn<B>,
    pub conv2: ConvBn<B>,
    /// Only present on bottleneck blocks.
    pub conv3: Option<ConvBn<B>>,
    /// Projection shortcut, present when the resolution or the channels change.
    pub downsample: Option<ConvBn<B>>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let mut out = self.conv1.forward(x);
        out = self.conv2.forward(out);
        if let Some(conv3) = &self.conv3 {
            out = conv3.forward(out);
        }
        relu(out + shortcut)
    }
}

#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// One of 18, 34, 50, 101 or 152.
    #[config(default = 18)]
    pub depth: usize,
    #[config(default = 1000)]
    pub num_classes: usize,
    /// Replace the 7x7/2 stem and its max-pool by a single 3x3 convolution,
    /// for CIFAR-sized inputs.
    #[config(default = false)]
    pub small_input: bool,
}

impl ResNetConfig {
    pub fn name(&self) -> String {
        format!("resnet{}", self.depth)
    }

    /// Number of blocks per stage and whether the stages use bottleneck blocks.
    pub fn layout(&self) -> Option<([usize; 4], bool)> {
        match self.depth {
            18 => Some(([2, 2, 2, 2], false)),
            34 => Some(([3, 4, 6, 3], false)),
            50 => Some(([3, 4, 6, 3], true)),
            101 => Some(([3, 4, 23, 3], true)),
            152 => Some(([3, 8, 36, 3], true)),
            _ => None,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.layout().is_none() {
            return Err(crate::Error::InvalidModel(format!(
                "unsupported resnet depth {}",
                self.depth
            )));
        }
        if self.num_classes == 0 {
            return Err(crate::Error::InvalidModel(
                "num_classes must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn blocks(&self) -> Vec<ResidualBlockConfig> {
        let Some((counts, bottleneck)) = self.layout() else {
            return vec![];
        };
        let mut in_channels = 64;
        let mut blocks = vec![];
        for (stage, (&count, &width)) in counts.iter().zip(WIDTHS.iter()).enumerate() {
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                let block = ResidualBlockConfig::new(in_channels, width, stride)
                    .with_bottleneck(bottleneck);
                in_channels = block.out_channels();
                blocks.push(block);
            }
        }
        blocks
    }

    /// Returns the initialized model.
    ///
    /// Panics on an unsupported depth, see [`Self::validate`].
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let blocks_config = self.blocks();
        assert!(!blocks_config.is_empty(), "unsupported resnet depth {}", self.depth);
        let (stem, max_pool) = if self.small_input {
            (ConvBnConfig::square(3, 64, 3).init(device), None)
        } else {
            let stem = ConvBnConfig::square(3, 64, 7).with_stride(2).init(device);
            let pool = MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init();
            (stem, Some(pool))
        };
        let features = blocks_config
            .last()
            .map(|block| block.out_channels())
            .unwrap_or(64);
        ResNet {
            stem,
            max_pool,
            blocks: blocks_config.iter().map(|b| b.init(device)).collect(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(features, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub stem: ConvBn<B>,
    pub max_pool: Option<MaxPool2d>,
    pub blocks: Vec<ResidualBlock<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// # Shapes
    ///   - Input [batch, 3, height, width]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(x);
        if let Some(pool) = &self.max_pool {
            x = pool.forward(x);
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        self.fc.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resnet50_ends_with_2048_features() {
        let config = ResNetConfig::new().with_depth(50);
        let blocks = config.blocks();
        assert_eq!(blocks.len(), 16);
        assert_eq!(blocks.last().unwrap().out_channels(), 2048);
        // the very first block projects 64 -> 256 without downsampling
        assert_eq!(blocks[0].stride, 1);
        assert_eq!(blocks[0].out_channels(), 256);
    }

    #[test]
    fn only_stage_entries_are_strided() {
        let blocks = ResNetConfig::new().with_depth(34).blocks();
        let strided: Vec<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.stride == 2)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(strided, vec![3, 7, 13]);
    }

    #[test]
    fn unknown_depth_is_invalid() {
        assert!(ResNetConfig::new().with_depth(20).validate().is_err());
        assert!(ResNetConfig::new().with_depth(101).validate().is_ok());
    }
}
