use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Gain of the MSRA ("PReLU") initialization with a negative slope of 0.25,
/// that is `sqrt(2 / (1 + 0.25²))`.
pub const MSRA_PRELU_GAIN: f64 = 1.372_040_6;

/// MSRA initialization of convolution and linear weights.
///
/// The variance is scaled by the fan-in only, whereas the MXNet `MSRAPrelu`
/// initializer averages fan-in and fan-out. burn's Kaiming initializer has no
/// averaged mode.

pub fn msra_initializer() -> Initializer {
    Initializer::KaimingNormal {
        gain: MSRA_PRELU_GAIN,
        fan_out_only: false,
    }
}

// relu6 activation for x is min(max(x, 0), 6)
#[derive(Module, Clone, Debug, Default)]
pub struct Relu6;

impl Relu6 {
    /// Create the module.
    pub fn new() -> Self {
        Self {}
    }
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[..., any]`
    /// - output: `[..., any]`
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input.clamp(0.0, 6.0)
    }
}

/// Non-linearity applied after a [`ConvBn`] normalization.
#[derive(Module, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Relu6,
    /// No activation, as used by the linear bottleneck projection.
    Identity,
}

impl Activation {
    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => burn::tensor::activation::relu(x),
            Activation::Relu6 => Relu6::new().forward(x),
            Activation::Identity => x,
        }
    }
}

#[derive(Config, Debug)]
pub struct ConvBnConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = "[1, 1]")]
    pub kernel: [usize; 2],
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = "[0, 0]")]
    pub padding: [usize; 2],
    /// Depthwise convolutions use `groups == in_channels`.
    #[config(default = 1)]
    pub groups: usize,
    #[config(default = "Activation::Relu")]
    pub activation: Activation,
}

impl ConvBnConfig {
    /// Square kernel with a "same"-style padding of `kernel / 2`.
    pub fn square(in_channels: usize, out_channels: usize, kernel: usize) -> Self {
        Self::new(in_channels, out_channels)
            .with_kernel([kernel, kernel])
            .with_padding([kernel / 2, kernel / 2])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBn<B> {
        assert_eq!(
            self.in_channels % self.groups,
            0,
            "in_channels must be divisible by groups"
        );
        assert_eq!(
            self.out_channels % self.groups,
            0,
            "out_channels must be divisible by groups"
        );
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], self.kernel)
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(self.padding[0], self.padding[1]))
            .with_groups(self.groups)
            .with_bias(false)
            .with_initializer(msra_initializer())
            .init(device);
        let norm = BatchNormConfig::new(self.out_channels).init(device);
        ConvBn {
            conv,
            norm,
            activation: self.activation,
        }
    }
}

/// Convolution (without bias) followed by batch normalization and an optional activation.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B>,
    pub activation: Activation,
}

impl<B: Backend> ConvBn<B> {
    /// # Shapes
    ///   - Input [batch, in_channels, height, width]
    ///   - Output [batch, out_channels, height / stride, width / stride]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        let [out_channels, _, _, _] = self.conv.weight.dims();
        out_channels
    }
}

impl<B: Backend> ModuleDisplay for ConvBn<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        let [out_channels, in_per_group, k0, k1] = self.conv.weight.dims();
        content
            .add("out_channels", &out_channels)
            .add("in_per_group", &in_per_group)
            .add("kernel", &format!("{k0}x{k1}"))
            .add("activation", &format!("{:?}", self.activation))
            .optional()
    }
}
