//! Image classification networks (MobileNetV2, ResNet, InceptionV3) trained with burn.

pub mod artifacts;
pub mod backend;
pub mod cli;
pub mod data;
pub mod error;
pub mod inference;
pub mod model;
pub mod train;

pub use error::{Error, Result};

pub mod prelude {
    pub use crate::artifacts::Artifacts;
    pub use crate::data::{DatasetConfig, DatasetKind, Normalization, TransformConfig};
    pub use crate::model::{
        ImageClassifier, InceptionV3Config, MobileNetV2Config, ModelConfig, ModelConfigExt,
        ModelSpec, ResNetConfig,
    };
    pub use crate::train::TrainingConfig;
}
