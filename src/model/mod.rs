pub mod blocks;
pub mod inception_v3;
pub mod mobilenet_v2;
pub mod resnet;

pub use inception_v3::{InceptionV3, InceptionV3Config};
pub use mobilenet_v2::{
    LinearBottleneck, LinearBottleneckConfig, MobileNetV2, MobileNetV2Config, mobilenet_v2_0_5,
    mobilenet_v2_1_0,
};
pub use resnet::{ResNet, ResNetConfig, ResidualBlock, ResidualBlockConfig};

use burn::prelude::*;

/// A network mapping a batch of images to class logits.
pub trait ImageClassifier<B: Backend> {
    /// # Shapes
    ///   - Input [batch, 3, height, width]
    ///   - Output [batch, num_classes]
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

impl<B: Backend> ImageClassifier<B> for MobileNetV2<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> ImageClassifier<B> for ResNet<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

impl<B: Backend> ImageClassifier<B> for InceptionV3<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// Backend-independent facts about an architecture.
pub trait ModelSpec {
    /// Name used for snapshots and logs, e.g. `mobilenetv2_1.0`.
    fn model_name(&self) -> String;
    fn num_classes(&self) -> usize;
    fn validate(&self) -> crate::Result<()>;
}

pub trait ModelConfigExt<B: Backend>: Config + ModelSpec {
    type Model: Module<B> + ImageClassifier<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
}

macro_rules! impl_model_config {
    ($config:ident, $model:ident) => {
        impl ModelSpec for $config {
            fn model_name(&self) -> String {
                self.name()
            }
            fn num_classes(&self) -> usize {
                self.num_classes
            }
            fn validate(&self) -> crate::Result<()> {
                $config::validate(self)
            }
        }

        impl<B: Backend> ModelConfigExt<B> for $config {
            type Model = $model<B>;
            fn init(&self, device: &B::Device) -> Self::Model {
                $config::init(self, device)
            }
        }
    };
}

impl_model_config!(MobileNetV2Config, MobileNetV2);
impl_model_config!(ResNetConfig, ResNet);
impl_model_config!(InceptionV3Config, InceptionV3);

/// The architecture to train, persisted as the model config.
#[derive(Config, Debug)]
pub enum ModelConfig {
    MobileNetV2(MobileNetV2Config),
    ResNet(ResNetConfig),
    InceptionV3(InceptionV3Config),
}

/// Largest input considered small, e.g. CIFAR.
pub const SMALL_INPUT_SIZE: usize = 64;

/// Names accepted by [`ModelConfig::from_name`].
pub const MODEL_NAMES: &[&str] = &[
    "mobilenetv2_1.0",
    "mobilenetv2_0.5",
    "resnet18",
    "resnet34",
    "resnet50",
    "resnet101",
    "resnet152",
    "inceptionv3",
];

impl ModelConfig {
    pub fn from_name(name: &str, num_classes: usize) -> crate::Result<Self> {
        let config = match name {
            "mobilenetv2_1.0" => ModelConfig::MobileNetV2(mobilenet_v2_1_0(num_classes)),
            "mobilenetv2_0.5" => ModelConfig::MobileNetV2(mobilenet_v2_0_5(num_classes)),
            "inceptionv3" => {
                ModelConfig::InceptionV3(InceptionV3Config::new().with_num_classes(num_classes))
            }
            _ => {
                let depth = name
                    .strip_prefix("resnet")
                    .and_then(|depth| depth.parse::<usize>().ok())
                    .ok_or_else(|| crate::Error::UnknownModel(name.into()))?;
                ModelConfig::ResNet(
                    ResNetConfig::new()
                        .with_depth(depth)
                        .with_num_classes(num_classes),
                )
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Smallest input resolution the architecture accepts.
    pub fn min_input_size(&self) -> usize {
        match self {
            ModelConfig::MobileNetV2(_) | ModelConfig::ResNet(_) => 32,
            ModelConfig::InceptionV3(_) => inception_v3::MIN_INPUT_SIZE,
        }
    }

    pub fn check_input_size(&self, image_size: usize) -> crate::Result<()> {
        let min = self.min_input_size();
        if image_size < min {
            return Err(crate::Error::InvalidConfig(format!(
                "{} needs images of at least {min}x{min}, got {image_size}",
                self.model_name()
            )));
        }
        Ok(())
    }

    /// Switches ResNet to its small-image stem for CIFAR-sized inputs.
    pub fn adapted_to_input(self, image_size: usize) -> Self {
        match self {
            ModelConfig::ResNet(c) if image_size <= SMALL_INPUT_SIZE => {
                ModelConfig::ResNet(c.with_small_input(true))
            }
            config => config,
        }
    }

    pub fn with_num_classes(self, num_classes: usize) -> Self {
        match self {
            ModelConfig::MobileNetV2(c) => {
                ModelConfig::MobileNetV2(c.with_num_classes(num_classes))
            }
            ModelConfig::ResNet(c) => ModelConfig::ResNet(c.with_num_classes(num_classes)),
            ModelConfig::InceptionV3(c) => {
                ModelConfig::InceptionV3(c.with_num_classes(num_classes))
            }
        }
    }

    fn spec(&self) -> &dyn ModelSpec {
        match self {
            ModelConfig::MobileNetV2(c) => c,
            ModelConfig::ResNet(c) => c,
            ModelConfig::InceptionV3(c) => c,
        }
    }
}

impl ModelSpec for ModelConfig {
    fn model_name(&self) -> String {
        self.spec().model_name()
    }
    fn num_classes(&self) -> usize {
        self.spec().num_classes()
    }
    fn validate(&self) -> crate::Result<()> {
        self.spec().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in MODEL_NAMES {
            let config = ModelConfig::from_name(name, 10).unwrap();
            assert_eq!(&config.model_name(), name);
            assert_eq!(config.num_classes(), 10);
        }
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(matches!(
            ModelConfig::from_name("vgg19", 10),
            Err(crate::Error::UnknownModel(_))
        ));
        assert!(matches!(
            ModelConfig::from_name("resnet20", 10),
            Err(crate::Error::InvalidModel(_))
        ));
    }

    #[test]
    fn num_classes_can_follow_the_dataset() {
        let config = ModelConfig::from_name("resnet18", 1000)
            .unwrap()
            .with_num_classes(3);
        assert_eq!(config.num_classes(), 3);
    }

    #[test]
    fn inception_needs_larger_inputs() {
        let config = ModelConfig::from_name("inceptionv3", 10).unwrap();
        assert!(config.check_input_size(32).is_err());
        assert!(config.check_input_size(75).is_ok());
        let config = ModelConfig::from_name("mobilenetv2_0.5", 10).unwrap();
        assert!(config.check_input_size(32).is_ok());
    }

    #[test]
    fn small_inputs_select_the_small_resnet_stem() {
        let config = ModelConfig::from_name("resnet18", 10)
            .unwrap()
            .adapted_to_input(32);
        assert!(matches!(config, ModelConfig::ResNet(c) if c.small_input));
        let config = ModelConfig::from_name("resnet18", 10)
            .unwrap()
            .adapted_to_input(224);
        assert!(matches!(config, ModelConfig::ResNet(c) if !c.small_input));
    }
}
