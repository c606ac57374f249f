pub mod batcher;
pub mod cifar;
pub mod epoch;
pub mod folder;
pub mod transform;

pub use batcher::{FlatBatcher, ImageBatch, ImageBatcher};
pub use cifar::Cifar10Dataset;
pub use epoch::TrainBatches;
pub use folder::ImageFolderDataset;
pub use transform::{ChannelStats, ImagePipeline, Normalization, TransformConfig, ValidTransform};

use crate::error::Result as CrateResult;
use burn::data::dataset::{Dataset, transform::MapperDataset};
use burn::prelude::*;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A decoded image and its class index.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub image: RgbImage,
    pub label: usize,
}

/// A transformed image, ready to be batched.
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Normalized pixel values.
    ///
    /// # Shape
    /// [3, height, width]
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub label: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    /// `root/<split>/<class>/<image>`.
    #[default]
    ImageFolder,
    /// The CIFAR-10 binary batches directly under `root`.
    Cifar10,
}

#[derive(Config, Debug)]
pub struct DatasetConfig {
    #[config(default = "DatasetKind::ImageFolder")]
    pub kind: DatasetKind,
    #[config(default = "PathBuf::from(\"data\")")]
    pub root: PathBuf,
    #[config(default = "String::from(\"train\")")]
    pub train_split: String,
    #[config(default = "String::from(\"val\")")]
    pub valid_split: String,
    /// Used in snapshot names, e.g. `imagenet`.
    #[config(default = "String::from(\"imagenet\")")]
    pub name: String,
}

impl DatasetConfig {
    pub fn cifar10(root: impl Into<PathBuf>) -> Self {
        Self::new()
            .with_kind(DatasetKind::Cifar10)
            .with_root(root.into())
            .with_name("cifar10".into())
    }

    /// Class names of the training split.
    pub fn class_names(&self) -> CrateResult<Vec<String>> {
        match self.kind {
            DatasetKind::ImageFolder => folder::class_dirs(&self.root.join(&self.train_split)),
            DatasetKind::Cifar10 => cifar::class_names(&self.root),
        }
    }

    /// Opens the training and validation splits, which share one class list.
    pub fn open(&self) -> CrateResult<(ImageSource, ImageSource)> {
        match self.kind {
            DatasetKind::ImageFolder => {
                let train = ImageFolderDataset::new(self.root.join(&self.train_split))?;
                let valid = ImageFolderDataset::with_classes(
                    self.root.join(&self.valid_split),
                    train.class_names().to_vec(),
                )?;
                Ok((ImageSource::Folder(train), ImageSource::Folder(valid)))
            }
            DatasetKind::Cifar10 => Ok((
                ImageSource::Cifar10(Cifar10Dataset::train(&self.root)?),
                ImageSource::Cifar10(Cifar10Dataset::test(&self.root)?),
            )),
        }
    }
}

/// Either supported image source.
#[derive(Clone, Debug)]
pub enum ImageSource {
    Folder(ImageFolderDataset),
    Cifar10(Cifar10Dataset),
}

impl ImageSource {
    pub fn class_names(&self) -> &[String] {
        match self {
            ImageSource::Folder(d) => d.class_names(),
            ImageSource::Cifar10(d) => d.class_names(),
        }
    }
}

impl Dataset<RawImage> for ImageSource {
    fn get(&self, index: usize) -> Option<RawImage> {
        match self {
            ImageSource::Folder(d) => d.get(index),
            ImageSource::Cifar10(d) => d.get(index),
        }
    }

    fn len(&self) -> usize {
        match self {
            ImageSource::Folder(d) => d.len(),
            ImageSource::Cifar10(d) => d.len(),
        }
    }
}

pub type ValidDataset = MapperDataset<ImageSource, ValidTransform, RawImage>;

pub fn valid_dataset(source: ImageSource, pipeline: ImagePipeline) -> ValidDataset {
    MapperDataset::new(source, ValidTransform(pipeline))
}
