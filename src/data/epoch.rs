use crate::data::{ImageItem, ImagePipeline, RawImage};
use burn::data::dataset::Dataset;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// One training epoch as a dataset of full batches.
///
/// The images are shuffled from `(seed, epoch)` and the remainder that does not
/// fill a batch is discarded. Each item is one whole batch, so a dataloader
/// splitting the items across workers never produces partial batches.
///
/// Every image gets its own augmentation rng, seeded from the epoch seed and its
/// position in the epoch.
#[derive(Clone, Debug)]
pub struct TrainBatches<D> {
    source: Arc<D>,
    pipeline: ImagePipeline,
    order: Vec<usize>,
    batch_size: usize,
    epoch_seed: u64,
}

impl<D: Dataset<RawImage>> TrainBatches<D> {
    pub fn new(
        source: Arc<D>,
        pipeline: ImagePipeline,
        batch_size: usize,
        seed: u64,
        epoch: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let epoch_seed = seed ^ (epoch as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut order: Vec<usize> = (0..source.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(epoch_seed));
        order.truncate(order.len() / batch_size * batch_size);
        Self {
            source,
            pipeline,
            order,
            batch_size,
            epoch_seed,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<D: Dataset<RawImage>> Dataset<Vec<ImageItem>> for TrainBatches<D> {
    fn get(&self, index: usize) -> Option<Vec<ImageItem>> {
        let start = index.checked_mul(self.batch_size)?;
        let positions = self.order.get(start..start + self.batch_size)?;
        positions
            .iter()
            .zip(start..)
            .map(|(&image, position)| {
                let raw = self.source.get(image)?;
                let mut rng = StdRng::seed_from_u64(self.epoch_seed.wrapping_add(position as u64));
                Some(self.pipeline.train_item(&raw, &mut rng))
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.order.len() / self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TransformConfig;
    use burn::data::dataset::InMemDataset;
    use image::{Rgb, RgbImage};

    /// Images whose red value is their index.
    fn source(len: usize) -> Arc<InMemDataset<RawImage>> {
        let items = (0..len)
            .map(|i| RawImage {
                image: RgbImage::from_pixel(4, 4, Rgb([i as u8, 0, 0])),
                label: i,
            })
            .collect();
        Arc::new(InMemDataset::new(items))
    }

    fn pipeline() -> ImagePipeline {
        TransformConfig::new()
            .with_image_size(4)
            .with_train_resize(None)
            .with_random_resized_crop(false)
            .pipeline(None)
            .unwrap()
    }

    fn labels<D: Dataset<RawImage>>(batches: &TrainBatches<D>) -> Vec<usize> {
        batches
            .iter()
            .flat_map(|batch| batch.into_iter().map(|item| item.label))
            .collect()
    }

    #[test]
    fn only_full_batches_are_kept() {
        let batches = TrainBatches::new(source(130), pipeline(), 40, 0, 0);
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|batch| batch.len() == 40));
        assert!(batches.get(3).is_none());

        let mut labels = labels(&batches);
        assert_eq!(labels.len(), 120);
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 120);
    }

    #[test]
    fn epochs_are_reproducible_and_differ() {
        let first = labels(&TrainBatches::new(source(50), pipeline(), 5, 3, 0));
        assert_eq!(first, labels(&TrainBatches::new(source(50), pipeline(), 5, 3, 0)));
        assert_ne!(first, labels(&TrainBatches::new(source(50), pipeline(), 5, 3, 1)));
        assert_ne!(first, labels(&TrainBatches::new(source(50), pipeline(), 5, 4, 0)));
    }

    #[test]
    fn augmentation_follows_the_seed() {
        let batches = TrainBatches::new(source(8), pipeline(), 4, 1, 2);
        let again = TrainBatches::new(source(8), pipeline(), 4, 1, 2);
        for (a, b) in batches.iter().zip(again.iter()) {
            let a: Vec<_> = a.into_iter().map(|item| item.pixels).collect();
            let b: Vec<_> = b.into_iter().map(|item| item.pixels).collect();
            assert_eq!(a, b);
        }
    }
}
