//! Geometric and photometric transforms turning a decoded image into a normalized CHW buffer.

use crate::data::{ImageItem, RawImage};
use burn::data::dataset::transform::Mapper;
use burn::prelude::*;
use image::RgbImage;
use image::imageops::{self, FilterType};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// AlexNet-style PCA lighting noise basis, on the [0, 255] scale.
const EIGVAL: [f32; 3] = [55.46, 4.794, 1.148];
const EIGVEC: [[f32; 3]; 3] = [
    [-0.5675, 0.7192, 0.4009],
    [-0.5808, -0.0045, -0.8140],
    [-0.5836, -0.6948, 0.4203],
];

const SAMPLEWISE_EPS: f32 = 1e-6;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Normalization {
    /// Subtract a per-channel mean and divide by a per-channel std.
    Fixed { mean: [f32; 3], std: [f32; 3] },
    /// Standardize every image by its own mean and std.
    Samplewise,
    /// Per-channel mean and std measured on the training split before training starts.
    Featurewise,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Fixed {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

#[derive(Config, Debug)]
pub struct TransformConfig {
    /// Side of the square image fed to the network.
    #[config(default = 224)]
    pub image_size: usize,
    /// Resize applied to training images before cropping.
    #[config(default = "Some(480)")]
    pub train_resize: Option<usize>,
    /// Resize applied to validation images before the center crop.
    #[config(default = "Some(256)")]
    pub valid_resize: Option<usize>,
    /// Resize the shorter edge (keeping the aspect ratio) instead of both edges.
    #[config(default = false)]
    pub keep_ratio: bool,
    /// Crop a random area and aspect ratio from training images.
    /// When disabled, training images are center cropped like validation ones.
    #[config(default = true)]
    pub random_resized_crop: bool,
    /// Smallest area fraction kept by the random resized crop.
    #[config(default = 0.08)]
    pub min_area: f64,
    #[config(default = true)]
    pub flip: bool,
    /// Brightness, contrast and saturation jitter strength.
    #[config(default = 0.0)]
    pub jitter: f32,
    /// Std of the PCA lighting noise.
    #[config(default = 0.0)]
    pub lighting: f32,
    #[config(default = "Normalization::default()")]
    pub normalization: Normalization,
}

impl TransformConfig {
    /// Small-image defaults: no resize, no random crop, per-channel CIFAR-10 statistics.
    pub fn cifar10() -> Self {
        Self::new()
            .with_image_size(32)
            .with_train_resize(None)
            .with_valid_resize(None)
            .with_random_resized_crop(false)
            .with_normalization(Normalization::Fixed {
                mean: [0.4914, 0.4822, 0.4465],
                std: [0.2470, 0.2435, 0.2616],
            })
    }

    /// Builds the pipeline, with the channel statistics required by [`Normalization::Featurewise`].
    pub fn pipeline(&self, stats: Option<ChannelStats>) -> crate::Result<ImagePipeline> {
        let normalize = match (&self.normalization, stats) {
            (Normalization::Fixed { mean, std }, _) => Normalize::Channels {
                mean: *mean,
                std: *std,
            },
            (Normalization::Samplewise, _) => Normalize::Samplewise,
            (Normalization::Featurewise, Some(stats)) => Normalize::Channels {
                mean: stats.mean,
                std: stats.std,
            },
            (Normalization::Featurewise, None) => {
                return Err(crate::Error::InvalidConfig(
                    "featurewise normalization requires channel statistics".into(),
                ));
            }
        };
        if self.image_size == 0 {
            return Err(crate::Error::InvalidConfig("image_size must be positive".into()));
        }
        Ok(ImagePipeline {
            config: self.clone(),
            normalize,
        })
    }
}

/// Per-channel mean and std of images scaled to [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelStats {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ChannelStats {
    /// Measures the statistics over (up to) `max_images` images spread evenly over the
    /// dataset, so that class-ordered datasets contribute every class.
    pub fn measure<D>(dataset: &D, max_images: usize) -> Option<Self>
    where
        D: burn::data::dataset::Dataset<RawImage>,
    {
        let len = dataset.len();
        let samples = len.min(max_images);
        let mut sum = [0f64; 3];
        let mut sum_sq = [0f64; 3];
        let mut count = 0u64;
        for i in 0..samples {
            let Some(item) = dataset.get(i * len / samples) else {
                continue;
            };
            for pixel in item.image.pixels() {
                for c in 0..3 {
                    let v = pixel[c] as f64 / 255.0;
                    sum[c] += v;
                    sum_sq[c] += v * v;
                }
            }
            count += item.image.pixels().len() as u64;
        }
        if count == 0 {
            return None;
        }
        let mut mean = [0f32; 3];
        let mut std = [0f32; 3];
        for c in 0..3 {
            let m = sum[c] / count as f64;
            let var = (sum_sq[c] / count as f64 - m * m).max(0.0);
            mean[c] = m as f32;
            std[c] = (var.sqrt() as f32).max(SAMPLEWISE_EPS);
        }
        Some(Self { mean, std })
    }
}

#[derive(Clone, Debug)]
enum Normalize {
    Channels { mean: [f32; 3], std: [f32; 3] },
    Samplewise,
}

/// Resolved transforms, shared by the training batches and the validation mapper.
#[derive(Clone, Debug)]
pub struct ImagePipeline {
    config: TransformConfig,
    normalize: Normalize,
}

impl ImagePipeline {
    pub fn image_size(&self) -> usize {
        self.config.image_size
    }

    /// Random crop, flip, jitter and lighting, then normalization.
    pub fn train(&self, image: &RgbImage, rng: &mut impl Rng) -> Vec<f32> {
        let size = self.config.image_size as u32;
        let image = match self.config.train_resize {
            Some(resize) => self.resize(image, resize as u32),
            None => image.clone(),
        };
        let mut image = if self.config.random_resized_crop {
            random_resized_crop(&image, size, self.config.min_area, rng)
        } else {
            center_crop(&image, size)
        };
        if self.config.flip && rng.random_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut image);
        }
        let mut chw = to_chw(&image);
        if self.config.jitter > 0.0 {
            color_jitter(&mut chw, self.config.jitter, rng);
        }
        if self.config.lighting > 0.0 {
            lighting(&mut chw, self.config.lighting, rng);
        }
        self.normalize(&mut chw);
        chw
    }

    /// Deterministic resize and center crop, then normalization.
    pub fn valid(&self, image: &RgbImage) -> Vec<f32> {
        let size = self.config.image_size as u32;
        let image = match self.config.valid_resize {
            Some(resize) => self.resize(image, resize as u32),
            None => image.clone(),
        };
        let image = center_crop(&image, size);
        let mut chw = to_chw(&image);
        self.normalize(&mut chw);
        chw
    }

    pub fn train_item(&self, item: &RawImage, rng: &mut impl Rng) -> ImageItem {
        let size = self.image_size();
        ImageItem {
            pixels: self.train(&item.image, rng),
            height: size,
            width: size,
            label: item.label,
        }
    }

    pub fn valid_item(&self, item: &RawImage) -> ImageItem {
        let size = self.image_size();
        ImageItem {
            pixels: self.valid(&item.image),
            height: size,
            width: size,
            label: item.label,
        }
    }

    fn resize(&self, image: &RgbImage, size: u32) -> RgbImage {
        if self.config.keep_ratio {
            resize_shorter(image, size)
        } else {
            imageops::resize(image, size, size, FilterType::Triangle)
        }
    }

    fn normalize(&self, chw: &mut [f32]) {
        match &self.normalize {
            Normalize::Channels { mean, std } => {
                let plane = chw.len() / 3;
                for (c, channel) in chw.chunks_mut(plane).enumerate() {
                    for v in channel.iter_mut() {
                        *v = (*v - mean[c]) / std[c];
                    }
                }
            }
            Normalize::Samplewise => {
                let n = chw.len() as f32;
                let mean = chw.iter().sum::<f32>() / n;
                let var = chw.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                let std = var.sqrt() + SAMPLEWISE_EPS;
                for v in chw.iter_mut() {
                    *v = (*v - mean) / std;
                }
            }
        }
    }
}

/// Mapper applying the deterministic validation transforms.
#[derive(Clone, Debug)]
pub struct ValidTransform(pub ImagePipeline);

impl Mapper<RawImage, ImageItem> for ValidTransform {
    fn map(&self, item: &RawImage) -> ImageItem {
        self.0.valid_item(item)
    }
}

/// Resizes so that the shorter edge equals `size`.
pub fn resize_shorter(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = if w <= h {
        (size, ((h as f64 * size as f64 / w as f64).round() as u32).max(1))
    } else {
        (((w as f64 * size as f64 / h as f64).round() as u32).max(1), size)
    };
    imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

/// Crops the central `size`x`size` region, upscaling first if the image is smaller.
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let image = if w < size || h < size {
        resize_shorter(image, size)
    } else {
        image.clone()
    };
    let (w, h) = image.dimensions();
    let x0 = (w - size) / 2;
    let y0 = (h - size) / 2;
    imageops::crop_imm(&image, x0, y0, size, size).to_image()
}

/// Crops a random area (`min_area..1` of the image) with a random aspect ratio
/// (`3/4..4/3`), resized to `size`x`size`.
/// Falls back to a center crop after 10 unsuccessful attempts.
pub fn random_resized_crop(
    image: &RgbImage,
    size: u32,
    min_area: f64,
    rng: &mut impl Rng,
) -> RgbImage {
    let (w, h) = image.dimensions();
    let area = (w * h) as f64;
    let min_area = min_area.clamp(f64::EPSILON, 1.0);
    for _ in 0..10 {
        let target_area = rng.random_range(min_area..=1.0) * area;
        let log_ratio = rng.random_range((3f64 / 4.).ln()..=(4f64 / 3.).ln());
        let ratio = log_ratio.exp();
        let crop_w = (target_area * ratio).sqrt().round() as u32;
        let crop_h = (target_area / ratio).sqrt().round() as u32;
        if crop_w == 0 || crop_h == 0 || crop_w > w || crop_h > h {
            continue;
        }
        let x0 = rng.random_range(0..=w - crop_w);
        let y0 = rng.random_range(0..=h - crop_h);
        let crop = imageops::crop_imm(image, x0, y0, crop_w, crop_h).to_image();
        return imageops::resize(&crop, size, size, FilterType::Triangle);
    }
    let side = w.min(h);
    let square = imageops::crop_imm(image, (w - side) / 2, (h - side) / 2, side, side).to_image();
    imageops::resize(&square, size, size, FilterType::Triangle)
}

/// HWC bytes into CHW floats in [0, 1].
pub fn to_chw(image: &RgbImage) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut chw = vec![0f32; 3 * plane];
    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            chw[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }
    chw
}

fn grayscale(chw: &[f32], plane: usize) -> Vec<f32> {
    (0..plane)
        .map(|i| 0.299 * chw[i] + 0.587 * chw[plane + i] + 0.114 * chw[2 * plane + i])
        .collect()
}

#[derive(Clone, Copy, Debug)]
enum Jitter {
    Brightness,
    Contrast,
    Saturation,
}

/// Brightness, contrast and saturation jitter in a random order.
pub fn color_jitter(chw: &mut [f32], strength: f32, rng: &mut impl Rng) {
    let plane = chw.len() / 3;
    let mut order = [Jitter::Brightness, Jitter::Contrast, Jitter::Saturation];
    order.shuffle(rng);
    for jitter in order {
        let alpha = 1.0 + rng.random_range(-strength..=strength);
        match jitter {
            Jitter::Brightness => chw.iter_mut().for_each(|v| *v *= alpha),
            Jitter::Contrast => {
                let gray_mean = grayscale(chw, plane).iter().sum::<f32>() / plane as f32;
                chw.iter_mut()
                    .for_each(|v| *v = *v * alpha + gray_mean * (1.0 - alpha));
            }
            Jitter::Saturation => {
                let gray = grayscale(chw, plane);
                for channel in chw.chunks_mut(plane) {
                    for (v, g) in channel.iter_mut().zip(&gray) {
                        *v = *v * alpha + g * (1.0 - alpha);
                    }
                }
            }
        }
    }
}

/// PCA lighting noise added to each channel of [0, 1]-scaled images.
pub fn lighting(chw: &mut [f32], alpha_std: f32, rng: &mut impl Rng) {
    let Ok(normal) = Normal::new(0.0f32, alpha_std) else {
        return;
    };
    let alpha: [f32; 3] = std::array::from_fn(|_| normal.sample(rng));
    let plane = chw.len() / 3;
    for (c, channel) in chw.chunks_mut(plane).enumerate() {
        let shift: f32 = (0..3)
            .map(|j| EIGVEC[c][j] * alpha[j] * EIGVAL[j])
            .sum::<f32>()
            / 255.0;
        channel.iter_mut().for_each(|v| *v += shift);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([x as u8, y as u8, 128]))
    }

    #[test]
    fn valid_transform_is_square_and_normalized() {
        let pipeline = TransformConfig::new()
            .with_image_size(8)
            .with_valid_resize(Some(10))
            .pipeline(None)
            .unwrap();
        let out = pipeline.valid(&gradient(40, 20));
        assert_eq!(out.len(), 3 * 8 * 8);
        // blue plane is constant 128 / 255
        let expected = (128.0 / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!(out[2 * 64..].iter().all(|v| (v - expected).abs() < 1e-2));
    }

    #[test]
    fn resize_shorter_keeps_aspect_ratio() {
        let resized = resize_shorter(&gradient(40, 20), 10);
        assert_eq!(resized.dimensions(), (20, 10));
    }

    #[test]
    fn random_resized_crop_has_requested_size() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let crop = random_resized_crop(&gradient(50, 30), 16, 0.08, &mut rng);
            assert_eq!(crop.dimensions(), (16, 16));
        }
    }

    #[test]
    fn center_crop_upscales_small_images() {
        let crop = center_crop(&gradient(4, 6), 8);
        assert_eq!(crop.dimensions(), (8, 8));
    }

    #[test]
    fn samplewise_normalization_has_zero_mean() {
        let pipeline = TransformConfig::new()
            .with_image_size(16)
            .with_valid_resize(None)
            .with_normalization(Normalization::Samplewise)
            .pipeline(None)
            .unwrap();
        let out = pipeline.valid(&gradient(16, 16));
        let mean = out.iter().sum::<f32>() / out.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn featurewise_normalization_needs_stats() {
        let config = TransformConfig::new().with_normalization(Normalization::Featurewise);
        assert!(config.pipeline(None).is_err());
        let stats = ChannelStats {
            mean: [0.5; 3],
            std: [0.25; 3],
        };
        assert!(config.pipeline(Some(stats)).is_ok());
    }

    #[test]
    fn channel_stats_sample_every_class() {
        use burn::data::dataset::InMemDataset;
        // 10 black images followed by 10 white ones
        let items = (0..20)
            .map(|i| RawImage {
                image: RgbImage::from_pixel(2, 2, image::Rgb([if i < 10 { 0 } else { 255 }; 3])),
                label: i / 10,
            })
            .collect();
        let stats = ChannelStats::measure(&InMemDataset::new(items), 4).unwrap();
        assert!((stats.mean[0] - 0.5).abs() < 1e-6);
        assert!((stats.std[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn train_item_is_reproducible_from_its_rng() {
        let pipeline = TransformConfig::new()
            .with_image_size(8)
            .with_train_resize(None)
            .with_jitter(0.4)
            .with_lighting(0.1)
            .pipeline(None)
            .unwrap();
        let raw = RawImage {
            image: gradient(20, 12),
            label: 1,
        };
        let a = pipeline.train_item(&raw, &mut StdRng::seed_from_u64(5));
        let b = pipeline.train_item(&raw, &mut StdRng::seed_from_u64(5));
        assert_eq!(a.pixels, b.pixels);
        assert_eq!((a.height, a.width, a.label), (8, 8, 1));
    }

    #[test]
    fn jitter_with_zero_strength_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let original = to_chw(&gradient(4, 4));
        let mut jittered = original.clone();
        color_jitter(&mut jittered, 0.0, &mut rng);
        for (a, b) in original.iter().zip(&jittered) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn lighting_shifts_whole_channels() {
        let mut rng = StdRng::seed_from_u64(3);
        let original = to_chw(&gradient(4, 4));
        let mut lit = original.clone();
        lighting(&mut lit, 0.1, &mut rng);
        for c in 0..3 {
            let deltas: Vec<f32> = (0..16)
                .map(|i| lit[c * 16 + i] - original[c * 16 + i])
                .collect();
            assert!(deltas.iter().all(|d| (d - deltas[0]).abs() < 1e-6));
        }
    }
}
