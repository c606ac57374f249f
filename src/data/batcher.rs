use crate::data::ImageItem;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

#[derive(Clone, Debug, Default)]
pub struct ImageBatcher;

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Normalized images.
    ///
    /// # Shape
    /// [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// # Shape
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let (height, width) = items
            .first()
            .map(|item| (item.height, item.width))
            .unwrap_or_default();

        let mut pixels = Vec::with_capacity(batch_size * 3 * height * width);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            debug_assert_eq!((item.height, item.width), (height, width));
            debug_assert_eq!(item.pixels.len(), 3 * height * width);
            pixels.extend(item.pixels);
            labels.push(item.label as i64);
        }

        let images =
            TensorData::new(pixels, [batch_size, 3, height, width]).convert::<B::FloatElem>();
        let targets = TensorData::new(labels, [batch_size]).convert::<B::IntElem>();

        ImageBatch {
            images: Tensor::from_data(images, device),
            targets: Tensor::from_data(targets, device),
        }
    }
}

/// Batches items that each hold a whole batch, such as [`TrainBatches`](crate::data::TrainBatches).
#[derive(Clone, Debug, Default)]
pub struct FlatBatcher;

impl<B: Backend> Batcher<B, Vec<ImageItem>, ImageBatch<B>> for FlatBatcher {
    fn batch(&self, groups: Vec<Vec<ImageItem>>, device: &B::Device) -> ImageBatch<B> {
        ImageBatcher.batch(groups.into_iter().flatten().collect(), device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn items_are_stacked_in_order() {
        let device = Default::default();
        let items = (0..3)
            .map(|label| ImageItem {
                pixels: vec![label as f32; 3 * 2 * 4],
                height: 2,
                width: 4,
                label,
            })
            .collect();
        let batch: ImageBatch<NdArray> = ImageBatcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 2, 4]);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![0, 1, 2]);
        let second = batch.images.narrow(0, 1, 1).mean().into_scalar();
        assert_eq!(second, 1.0);
    }

    #[test]
    fn groups_are_flattened() {
        let device = Default::default();
        let item = |label| ImageItem {
            pixels: vec![0.; 3],
            height: 1,
            width: 1,
            label,
        };
        let groups = vec![vec![item(0), item(1)], vec![item(2)]];
        let batch: ImageBatch<NdArray> = FlatBatcher.batch(groups, &device);
        assert_eq!(batch.images.dims(), [3, 3, 1, 1]);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![0, 1, 2]);
    }
}
