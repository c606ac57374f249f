use crate::data::{DatasetConfig, TransformConfig};
use crate::train::schedule::LrSchedule;
use crate::model::{ModelConfig, ModelSpec};
use crate::train::optim::nesterov_sgd;
use burn::optim::SgdConfig;
use burn::prelude::*;
use std::num::NonZeroUsize;
use std::path::Path;

/// Dataloader threads when not configured: one per available core.
pub fn default_num_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "DatasetConfig::new()")]
    pub dataset: DatasetConfig,
    #[config(default = "TransformConfig::new()")]
    pub transform: TransformConfig,
    #[config(default = 1)]
    pub num_epochs: usize,
    #[config(default = 40)]
    pub batch_size: usize,
    #[config(default = "default_num_workers()")]
    pub num_workers: usize,
    #[config(default = 0.045)]
    pub lr: f64,
    #[config(default = 0.9)]
    pub momentum: f64,
    #[config(default = 4e-5)]
    pub weight_decay: f32,
    #[config(default = 0.98)]
    pub lr_decay: f64,
    /// Decay every `lr_decay_period` epochs. When 0, decay at `lr_decay_epochs` instead.
    #[config(default = 1)]
    pub lr_decay_period: usize,
    #[config(default = "vec![30, 60, 90]")]
    pub lr_decay_epochs: Vec<usize>,
    /// Batches between two speed and error logs.
    #[config(default = 50)]
    pub log_interval: usize,
    /// Epochs between two periodic snapshots.
    #[config(default = 10)]
    pub save_frequency: usize,
    /// Best-validation snapshots are only kept after this epoch.
    #[config(default = 50)]
    pub save_best_after_epoch: usize,
    #[config(default = "None")]
    pub label_smoothing: Option<f32>,
    /// Images sampled to measure featurewise normalization statistics.
    #[config(default = 1000)]
    pub stats_sample_size: usize,
    #[config(default = 0)]
    pub seed: u64,
}

impl TrainingConfig {
    /// The CIFAR-10 recipe: 32x32 images, milestone decay by 10x.
    pub fn cifar10(root: impl Into<std::path::PathBuf>) -> Self {
        Self::new()
            .with_dataset(DatasetConfig::cifar10(root))
            .with_transform(TransformConfig::cifar10())
            .with_batch_size(128)
            .with_lr(0.1)
            .with_weight_decay(1e-4)
            .with_lr_decay(0.1)
            .with_lr_decay_period(0)
    }

    pub fn schedule(&self) -> LrSchedule {
        if self.lr_decay_period > 0 {
            LrSchedule::Periodic {
                base: self.lr,
                decay: self.lr_decay,
                period: self.lr_decay_period,
            }
        } else {
            LrSchedule::Milestones {
                base: self.lr,
                decay: self.lr_decay,
                epochs: self.lr_decay_epochs.clone(),
            }
        }
    }

    /// The CIFAR-10 recipe when `data_dir` holds the CIFAR-10 batches, the ImageNet one otherwise.
    pub fn for_data_dir(data_dir: Option<&Path>) -> Self {
        match data_dir {
            Some(dir) if dir.join(crate::data::cifar::TRAIN_BATCHES[0]).exists() => {
                Self::cifar10(dir)
            }
            _ => Self::new(),
        }
    }

    /// Raises the image size to the smallest input `model` accepts,
    /// e.g. 75x75 for InceptionV3 on CIFAR-10.
    pub fn fit_to_model(mut self, model: &ModelConfig) -> Self {
        let min = model.min_input_size();
        if self.transform.image_size < min {
            tracing::info!(
                "raising image_size from {} to {min}, the smallest input of {}",
                self.transform.image_size,
                model.model_name()
            );
            self.transform.image_size = min;
        }
        self
    }

    /// SGD with Nesterov momentum and weight decay.
    pub fn optimizer(&self) -> SgdConfig {
        nesterov_sgd(self.momentum, self.weight_decay)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::Error::InvalidConfig(msg.into()));
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.log_interval == 0 {
            return invalid("log_interval must be positive");
        }
        if self.save_frequency == 0 {
            return invalid("save_frequency must be positive");
        }
        if !(self.lr > 0.) {
            return invalid("lr must be positive");
        }
        if let Some(smoothing) = self.label_smoothing {
            if !(0. ..1.).contains(&smoothing) {
                return invalid("label_smoothing must be in [0, 1)");
            }
        }
        Ok(())
    }
}
