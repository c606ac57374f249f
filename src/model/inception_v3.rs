//! InceptionV3 from the ["Rethinking the Inception Architecture for Computer Vision"](https://arxiv.org/abs/1512.00567) paper.
//!
//! The auxiliary classifier is not built.

use crate::model::blocks::{ConvBn, ConvBnConfig};
use burn::nn::pool::{
    AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
    MaxPool2dConfig,
};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;

/// Smallest spatial input the stem and the reduction blocks accept.
pub const MIN_INPUT_SIZE: usize = 75;

fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: [usize; 2],
    padding: [usize; 2],
    stride: usize,
    device: &B::Device,
) -> ConvBn<B> {
    ConvBnConfig::new(in_channels, out_channels)
        .with_kernel(kernel)
        .with_padding(padding)
        .with_stride(stride)
        .init(device)
}

fn max_pool() -> MaxPool2d {
    MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init()
}

fn avg_pool() -> AvgPool2d {
    AvgPool2dConfig::new([3, 3])
        .with_strides([1, 1])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init()
}

fn chain<B: Backend>(layers: &[ConvBn<B>], mut x: Tensor<B, 4>) -> Tensor<B, 4> {
    for layer in layers {
        x = layer.forward(x);
    }
    x
}

#[derive(Module, Debug)]
pub struct InceptionA<B: Backend> {
    pub branch1x1: ConvBn<B>,
    pub branch5x5: Vec<ConvBn<B>>,
    pub branch3x3dbl: Vec<ConvBn<B>>,
    pub pool: AvgPool2d,
    pub branch_pool: ConvBn<B>,
}

impl<B: Backend> InceptionA<B> {
    pub fn new(in_channels: usize, pool_features: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: conv(in_channels, 64, [1, 1], [0, 0], 1, device),
            branch5x5: vec![
                conv(in_channels, 48, [1, 1], [0, 0], 1, device),
                conv(48, 64, [5, 5], [2, 2], 1, device),
            ],
            branch3x3dbl: vec![
                conv(in_channels, 64, [1, 1], [0, 0], 1, device),
                conv(64, 96, [3, 3], [1, 1], 1, device),
                conv(96, 96, [3, 3], [1, 1], 1, device),
            ],
            pool: avg_pool(),
            branch_pool: conv(in_channels, pool_features, [1, 1], [0, 0], 1, device),
        }
    }

    pub fn out_channels(pool_features: usize) -> usize {
        64 + 64 + 96 + pool_features
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b5 = chain(&self.branch5x5, x.clone());
        let b3 = chain(&self.branch3x3dbl, x.clone());
        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b5, b3, bp], 1)
    }
}

/// Grid reduction from 35x35 to 17x17.
#[derive(Module, Debug)]
pub struct InceptionB<B: Backend> {
    pub branch3x3: ConvBn<B>,
    pub branch3x3dbl: Vec<ConvBn<B>>,
    pub pool: MaxPool2d,
}

impl<B: Backend> InceptionB<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        Self {
            branch3x3: conv(in_channels, 384, [3, 3], [0, 0], 2, device),
            branch3x3dbl: vec![
                conv(in_channels, 64, [1, 1], [0, 0], 1, device),
                conv(64, 96, [3, 3], [1, 1], 1, device),
                conv(96, 96, [3, 3], [0, 0], 2, device),
            ],
            pool: max_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = self.branch3x3.forward(x.clone());
        let b3dbl = chain(&self.branch3x3dbl, x.clone());
        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, b3dbl, bp], 1)
    }
}

/// Factorized 7x7 block.
#[derive(Module, Debug)]
pub struct InceptionC<B: Backend> {
    pub branch1x1: ConvBn<B>,
    pub branch7x7: Vec<ConvBn<B>>,
    pub branch7x7dbl: Vec<ConvBn<B>>,
    pub pool: AvgPool2d,
    pub branch_pool: ConvBn<B>,
}

impl<B: Backend> InceptionC<B> {
    pub fn new(in_channels: usize, c7: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: conv(in_channels, 192, [1, 1], [0, 0], 1, device),
            branch7x7: vec![
                conv(in_channels, c7, [1, 1], [0, 0], 1, device),
                conv(c7, c7, [1, 7], [0, 3], 1, device),
                conv(c7, 192, [7, 1], [3, 0], 1, device),
            ],
            branch7x7dbl: vec![
                conv(in_channels, c7, [1, 1], [0, 0], 1, device),
                conv(c7, c7, [7, 1], [3, 0], 1, device),
                conv(c7, c7, [1, 7], [0, 3], 1, device),
                conv(c7, c7, [7, 1], [3, 0], 1, device),
                conv(c7, 192, [1, 7], [0, 3], 1, device),
            ],
            pool: avg_pool(),
            branch_pool: conv(in_channels, 192, [1, 1], [0, 0], 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());
        let b7 = chain(&self.branch7x7, x.clone());
        let b7dbl = chain(&self.branch7x7dbl, x.clone());
        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b7, b7dbl, bp], 1)
    }
}

/// Grid reduction from 17x17 to 8x8.
#[derive(Module, Debug)]
pub struct InceptionD<B: Backend> {
    pub branch3x3: Vec<ConvBn<B>>,
    pub branch7x7x3: Vec<ConvBn<B>>,
    pub pool: MaxPool2d,
}

impl<B: Backend> InceptionD<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        Self {
            branch3x3: vec![
                conv(in_channels, 192, [1, 1], [0, 0], 1, device),
                conv(192, 320, [3, 3], [0, 0], 2, device),
            ],
            branch7x7x3: vec![
                conv(in_channels, 192, [1, 1], [0, 0], 1, device),
                conv(192, 192, [1, 7], [0, 3], 1, device),
                conv(192, 192, [7, 1], [3, 0], 1, device),
                conv(192, 192, [3, 3], [0, 0], 2, device),
            ],
            pool: max_pool(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b3 = chain(&self.branch3x3, x.clone());
        let b7 = chain(&self.branch7x7x3, x.clone());
        let bp = self.pool.forward(x);
        Tensor::cat(vec![b3, b7, bp], 1)
    }
}

/// Expanded filter bank, with 1x3 and 3x1 convolutions side by side.
#[derive(Module, Debug)]
pub struct InceptionE<B: Backend> {
    pub branch1x1: ConvBn<B>,
    pub branch3x3_1: ConvBn<B>,
    pub branch3x3_2a: ConvBn<B>,
    pub branch3x3_2b: ConvBn<B>,
    pub branch3x3dbl: Vec<ConvBn<B>>,
    pub branch3x3dbl_3a: ConvBn<B>,
    pub branch3x3dbl_3b: ConvBn<B>,
    pub pool: AvgPool2d,
    pub branch_pool: ConvBn<B>,
}

impl<B: Backend> InceptionE<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        Self {
            branch1x1: conv(in_channels, 320, [1, 1], [0, 0], 1, device),
            branch3x3_1: conv(in_channels, 384, [1, 1], [0, 0], 1, device),
            branch3x3_2a: conv(384, 384, [1, 3], [0, 1], 1, device),
            branch3x3_2b: conv(384, 384, [3, 1], [1, 0], 1, device),
            branch3x3dbl: vec![
                conv(in_channels, 448, [1, 1], [0, 0], 1, device),
                conv(448, 384, [3, 3], [1, 1], 1, device),
            ],
            branch3x3dbl_3a: conv(384, 384, [1, 3], [0, 1], 1, device),
            branch3x3dbl_3b: conv(384, 384, [3, 1], [1, 0], 1, device),
            pool: avg_pool(),
            branch_pool: conv(in_channels, 192, [1, 1], [0, 0], 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(x.clone());

        let b3 = self.branch3x3_1.forward(x.clone());
        let b3 = Tensor::cat(
            vec![
                self.branch3x3_2a.forward(b3.clone()),
                self.branch3x3_2b.forward(b3),
            ],
            1,
        );

        let b3dbl = chain(&self.branch3x3dbl, x.clone());
        let b3dbl = Tensor::cat(
            vec![
                self.branch3x3dbl_3a.forward(b3dbl.clone()),
                self.branch3x3dbl_3b.forward(b3dbl),
            ],
            1,
        );

        let bp = self.branch_pool.forward(self.pool.forward(x));
        Tensor::cat(vec![b1, b3, b3dbl, bp], 1)
    }
}

#[derive(Config, Debug)]
pub struct InceptionV3Config {
    #[config(default = 1000)]
    pub num_classes: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl InceptionV3Config {
    pub fn name(&self) -> String {
        "inceptionv3".into()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.num_classes == 0 {
            return Err(crate::Error::InvalidModel(
                "num_classes must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(crate::Error::InvalidModel(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> InceptionV3<B> {
        let stem = vec![
            conv(3, 32, [3, 3], [0, 0], 2, device),
            conv(32, 32, [3, 3], [0, 0], 1, device),
            conv(32, 64, [3, 3], [1, 1], 1, device),
        ];
        let stem2 = vec![
            conv(64, 80, [1, 1], [0, 0], 1, device),
            conv(80, 192, [3, 3], [0, 0], 1, device),
        ];
        let mixed_5 = vec![
            InceptionA::new(192, 32, device),
            InceptionA::new(InceptionA::<B>::out_channels(32), 64, device),
            InceptionA::new(InceptionA::<B>::out_channels(64), 64, device),
        ];
        let mixed_6a = InceptionB::new(288, device);
        let mixed_6 = [128, 160, 160, 192]
            .into_iter()
            .map(|c7| InceptionC::new(768, c7, device))
            .collect();
        let mixed_7a = InceptionD::new(768, device);
        let mixed_7 = vec![InceptionE::new(1280, device), InceptionE::new(2048, device)];
        InceptionV3 {
            stem,
            pool1: max_pool(),
            stem2,
            pool2: max_pool(),
            mixed_5,
            mixed_6a,
            mixed_6,
            mixed_7a,
            mixed_7,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc: LinearConfig::new(2048, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct InceptionV3<B: Backend> {
    pub stem: Vec<ConvBn<B>>,
    pub pool1: MaxPool2d,
    pub stem2: Vec<ConvBn<B>>,
    pub pool2: MaxPool2d,
    pub mixed_5: Vec<InceptionA<B>>,
    pub mixed_6a: InceptionB<B>,
    pub mixed_6: Vec<InceptionC<B>>,
    pub mixed_7a: InceptionD<B>,
    pub mixed_7: Vec<InceptionE<B>>,
    pub pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc: Linear<B>,
}

impl<B: Backend> InceptionV3<B> {
    /// # Shapes
    ///   - Input [batch, 3, height, width], with height and width of at least 75
    ///   - Output [batch, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let [_, _, height, width] = x.dims();
        debug_assert!(height >= MIN_INPUT_SIZE && width >= MIN_INPUT_SIZE);

        let x = self.pool1.forward(chain(&self.stem, x));
        let mut x = self.pool2.forward(chain(&self.stem2, x));
        for block in &self.mixed_5 {
            x = block.forward(x);
        }
        x = self.mixed_6a.forward(x);
        for block in &self.mixed_6 {
            x = block.forward(x);
        }
        x = self.mixed_7a.forward(x);
        for block in &self.mixed_7 {
            x = block.forward(x);
        }
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        let x = self.dropout.forward(x);
        self.fc.forward(x)
    }
}
