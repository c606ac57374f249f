//! MobileNetV2 from the
//! ["Inverted Residuals and Linear Bottlenecks: Mobile Networks for Classification, Detection and Segmentation"](https://arxiv.org/abs/1801.04381)
//! paper.

use crate::model::blocks::{Activation, ConvBn, ConvBnConfig, msra_initializer};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::prelude::*;

/// Smallest width multiplier the network supports.
pub const MIN_MULTIPLIER: f64 = 0.25;

const IN_CHANNELS: [usize; 17] = [
    32, 16, 24, 24, 32, 32, 32, 64, 64, 64, 64, 96, 96, 96, 160, 160, 160,
];
const OUT_CHANNELS: [usize; 17] = [
    16, 24, 24, 32, 32, 32, 64, 64, 64, 64, 96, 96, 96, 160, 160, 160, 320,
];
const EXPANSIONS: [usize; 17] = [1, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6];
const STRIDES: [usize; 17] = [1, 2, 1, 2, 1, 1, 2, 1, 1, 1, 1, 1, 1, 2, 1, 1, 1];

/// Channels scaled by the width multiplier, truncated like an `int()` cast.
pub fn scaled(channels: usize, multiplier: f64) -> usize {
    (channels as f64 * multiplier) as usize
}

#[derive(Config, Debug)]
pub struct LinearBottleneckConfig {
    pub in_channels: usize,
    pub channels: usize,
    /// Expansion ratio of the hidden (depthwise) layer.
    pub t: usize,
    pub stride: usize,
}

impl LinearBottleneckConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LinearBottleneck<B> {
        let hidden = self.in_channels * self.t;
        let expand = ConvBnConfig::new(self.in_channels, hidden)
            .with_activation(Activation::Relu6)
            .init(device);
        let depthwise = ConvBnConfig::square(hidden, hidden, 3)
            .with_stride(self.stride)
            .with_groups(hidden)
            .with_activation(Activation::Relu6)
            .init(device);
        let project = ConvBnConfig::new(hidden, self.channels)
            .with_activation(Activation::Identity)
            .init(device);
        LinearBottleneck {
            expand,
            depthwise,
            project,
            use_shortcut: self.stride == 1 && self.in_channels == self.channels,
        }
    }
}

/// Inverted residual block: 1x1 expansion, 3x3 depthwise, then a linear 1x1 projection.
#[derive(Module, Debug)]
pub struct LinearBottleneck<B: Backend> {
    pub expand: ConvBn<B>,
    pub depthwise: ConvBn<B>,
    pub project: ConvBn<B>,
    pub use_shortcut: bool,
}

impl<B: Backend> LinearBottleneck<B> {
    /// # Shapes
    ///   - Input [batch, in_channels, height, width]
    ///   - Output [batch, channels, height / stride, width / stride]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.expand.forward(x.clone());
        let out = self.depthwise.forward(out);
        let out = self.project.forward(out);
        if self.use_shortcut { out + x } else { out }
    }
}

#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// The width multiplier for controlling the model size.
    /// The actual number of channels is the original channel size multiplied by this value.
    #[config(default = 1.0)]
    pub multiplier: f64,
    #[config(default = 1000)]
    pub num_classes: usize,
}

pub fn mobilenet_v2_1_0(num_classes: usize) -> MobileNetV2Config {
    MobileNetV2Config::new()
        .with_multiplier(1.0)
        .with_num_classes(num_classes)
}

pub fn mobilenet_v2_0_5(num_classes: usize) -> MobileNetV2Config {
    MobileNetV2Config::new()
        .with_multiplier(0.5)
        .with_num_classes(num_classes)
}

impl MobileNetV2Config {
    pub fn name(&self) -> String {
        let m = self.multiplier;
        if (m * 10.0).fract() == 0.0 {
            format!("mobilenetv2_{m:.1}")
        } else {
            format!("mobilenetv2_{m}")
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(self.multiplier >= MIN_MULTIPLIER) {
            return Err(crate::Error::InvalidModel(format!(
                "mobilenetv2 multiplier must be at least {MIN_MULTIPLIER}, got {}",
                self.multiplier
            )));
        }
        if self.num_classes == 0 {
            return Err(crate::Error::InvalidModel(
                "num_classes must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The (in_channels, channels, t, stride) of each bottleneck, in order.
    pub fn bottlenecks(&self) -> Vec<LinearBottleneckConfig> {
        (0..IN_CHANNELS.len())
            .map(|i| {
                LinearBottleneckConfig::new(
                    scaled(IN_CHANNELS[i], self.multiplier),
                    scaled(OUT_CHANNELS[i], self.multiplier),
                    EXPANSIONS[i],
                    STRIDES[i],
                )
            })
            .collect()
    }

    /// The last convolution keeps 1280 channels unless the network is widened.
    pub fn last_channels(&self) -> usize {
        if self.multiplier > 1.0 {
            scaled(1280, self.multiplier)
        } else {
            1280
        }
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let stem_channels = scaled(32, self.multiplier);
        let stem = ConvBnConfig::square(3, stem_channels, 3)
            .with_stride(2)
            .with_activation(Activation::Relu6)
            .init(device);
        let blocks = self
            .bottlenecks()
            .iter()
            .map(|block| block.init(device))
            .collect();
        let last_in = scaled(OUT_CHANNELS[OUT_CHANNELS.len() - 1], self.multiplier);
        let last_channels = self.last_channels();
        let last = ConvBnConfig::new(last_in, last_channels)
            .with_activation(Activation::Relu6)
            .init(device);
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let output = Conv2dConfig::new([last_channels, self.num_classes], [1, 1])
            .with_bias(false)
            .with_initializer(msra_initializer())
            .init(device);
        MobileNetV2 {
            stem,
            blocks,
            last,
            pool,
            output,
        }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<LinearBottleneck<B>>,
    pub last: ConvBn<B>,
    pub pool: AdaptiveAvgPool2d,
    /// 1x1 convolution acting as the classifier.
    pub output: Conv2d<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// # Shapes
    ///   - Input [batch, 3, height, width]
    ///   - Output [batch, num_classes, 1, 1]
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.last.forward(x);
        self.pool.forward(x)
    }

    /// # Shapes
    ///   - Input [batch, 3, height, width]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, _, _, _] = x.dims();
        let x = self.features(x);
        let x = self.output.forward(x);
        let [_, num_classes, _, _] = x.dims();
        let x = x.flatten::<2>(1, 3);
        debug_assert_eq!([batch, num_classes], x.dims());
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bottleneck_table_matches_the_paper() {
        let blocks = MobileNetV2Config::new().bottlenecks();
        assert_eq!(blocks.len(), 17);
        // stage boundaries: channels change or stride 2
        let strided: Vec<usize> = blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.stride == 2)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(strided, vec![1, 3, 6, 13]);
        assert_eq!(blocks[0].t, 1);
        assert!(blocks[1..].iter().all(|b| b.t == 6));
        // each block consumes what the previous one produced
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].channels, pair[1].in_channels);
        }
        assert_eq!(blocks[16].channels, 320);
    }

    #[test]
    fn multiplier_scales_channels_but_not_the_last_conv() {
        let half = mobilenet_v2_0_5(10);
        let blocks = half.bottlenecks();
        assert_eq!(blocks[0].in_channels, 16);
        assert_eq!(blocks[16].channels, 160);
        assert_eq!(half.last_channels(), 1280);

        let wide = MobileNetV2Config::new().with_multiplier(1.5);
        assert_eq!(wide.last_channels(), 1920);
        assert_eq!(wide.bottlenecks()[0].in_channels, 48);
    }

    #[test]
    fn names_follow_the_model_zoo() {
        assert_eq!(mobilenet_v2_1_0(1000).name(), "mobilenetv2_1.0");
        assert_eq!(mobilenet_v2_0_5(1000).name(), "mobilenetv2_0.5");
    }

    #[test]
    fn small_multipliers_are_rejected() {
        assert!(MobileNetV2Config::new().with_multiplier(0.1).validate().is_err());
        assert!(MobileNetV2Config::new().with_multiplier(0.25).validate().is_ok());
    }
}
