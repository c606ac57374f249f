use crate::artifacts::Artifacts;
use crate::data::{ImageBatch, ImageBatcher, ImageItem, ImagePipeline, folder::load_rgb};
use crate::error::{Error, Result};
use crate::model::{ImageClassifier, ModelConfigExt};
use crate::train::TrainingConfig;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::activation::softmax;
use std::path::{Path, PathBuf};

pub const TOP_K: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class: usize,
    pub label: String,
    pub probability: f32,
}

/// Most probable classes of one image, in decreasing probability.
#[derive(Clone, Debug)]
pub struct ImagePredictions {
    pub path: PathBuf,
    pub top: Vec<Prediction>,
}

/// Class probabilities for a batch of images.
///
/// # Shape
/// [batch, num_classes]
pub fn probabilities<B: Backend, M: ImageClassifier<B>>(
    model: &M,
    pipeline: &ImagePipeline,
    paths: &[PathBuf],
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    let size = pipeline.image_size();
    let items = paths
        .iter()
        .map(|path| {
            Ok(ImageItem {
                pixels: pipeline.valid(&load_rgb(path)?),
                height: size,
                width: size,
                label: 0,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let batch: ImageBatch<B> = ImageBatcher.batch(items, device);
    Ok(softmax(model.classify(batch.images), 1))
}

/// The `k` highest entries of each row, with their labels.
pub fn top_k<B: Backend>(
    probs: Tensor<B, 2>,
    labels: &[String],
    k: usize,
) -> Vec<Vec<Prediction>> {
    let [_batch, num_classes] = probs.dims();
    let values: Vec<f32> = probs.into_data().iter::<f32>().collect();
    values
        .chunks(num_classes)
        .map(|row| {
            let mut order: Vec<usize> = (0..num_classes).collect();
            order.sort_by(|&a, &b| row[b].total_cmp(&row[a]));
            order
                .into_iter()
                .take(k)
                .map(|class| Prediction {
                    class,
                    label: labels
                        .get(class)
                        .cloned()
                        .unwrap_or_else(|| format!("class_{class}")),
                    probability: row[class],
                })
                .collect()
        })
        .collect()
}

/// Loads the trained model and labels from the artifacts directory and
/// classifies each image.
pub fn infer<B, C>(
    artifacts: &Artifacts,
    training_config: &TrainingConfig,
    model_config: &C,
    images: &[PathBuf],
    device: &B::Device,
) -> Result<Vec<ImagePredictions>>
where
    B: Backend,
    C: ModelConfigExt<B>,
{
    let model = artifacts
        .load_model(model_config, device)?
        .ok_or_else(|| Error::MissingModel(artifacts.dir().to_path_buf()))?;
    let labels = artifacts.load_labels()?.unwrap_or_default();
    let stats = artifacts.load_channel_stats()?;
    let pipeline = training_config.transform.pipeline(stats)?;

    let mut predictions = vec![];
    // one image per batch, so that an unreadable file only skips itself
    for path in images {
        let probs = match probabilities(&model, &pipeline, std::slice::from_ref(path), device) {
            Ok(probs) => probs,
            Err(err) => {
                tracing::warn!("skipping {}: {err}", path.display());
                continue;
            }
        };
        let top = top_k(probs, &labels, TOP_K).pop().unwrap_or_default();
        log_predictions(path, &top);
        predictions.push(ImagePredictions {
            path: path.clone(),
            top,
        });
    }
    Ok(predictions)
}

fn log_predictions(path: &Path, top: &[Prediction]) {
    tracing::info!("{}:", path.display());
    for (rank, prediction) in top.iter().enumerate() {
        tracing::info!(
            "  {}. {} ({}) p={:.4}",
            rank + 1,
            prediction.label,
            prediction.class,
            prediction.probability
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn top_k_orders_by_probability() {
        let device = Default::default();
        let probs =
            Tensor::<NdArray, 2>::from_floats([[0.1, 0.6, 0.3], [0.5, 0.2, 0.3]], &device);
        let labels = vec!["a".to_string(), "b".to_string()];
        let top = top_k(probs, &labels, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0][0].label, "b");
        assert_eq!(top[0][1].class, 2);
        // missing labels fall back to the class index
        assert_eq!(top[0][1].label, "class_2");
        assert_eq!(top[1][0].class, 0);
        assert_eq!(top[1][1].probability, 0.3);
    }
}
