pub mod config;
pub mod history;
pub mod metrics;
pub mod optim;
pub mod schedule;

pub use config::TrainingConfig;
pub use history::{EpochRecord, TrainingHistory};
pub use metrics::{ClassificationErrors, LossMeter, Speedometer, TopKAccuracy};
pub use schedule::LrSchedule;

use crate::artifacts::Artifacts;
use crate::data::{
    self, ChannelStats, FlatBatcher, ImageBatch, ImageBatcher, ImagePipeline, Normalization,
    RawImage, TrainBatches,
};
use crate::error::{Error, Result};
use crate::model::{ImageClassifier, ModelConfigExt};
use burn::prelude::*;
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};
use std::sync::Arc;
use std::time::Instant;

pub type Dataloader<B> = Arc<dyn DataLoader<B, ImageBatch<B>>>;

/// Training metrics of one epoch.
#[derive(Clone, Copy, Debug)]
pub struct TrainSummary {
    pub top1_err: f64,
    pub top5_err: f64,
    /// Mean per-sample loss.
    pub loss: f64,
    pub num_batches: usize,
}

/// Name of a snapshot file stem, led by the best validation top-1 error so far.
/// Dots are replaced since the recorder owns the extension.
///
/// e.g. `0_2345-imagenet-mobilenetv2_1_0-51-best`
pub fn snapshot_name(
    best_err: f64,
    dataset: &str,
    model: &str,
    epoch: usize,
    best: bool,
) -> String {
    let suffix = if best { "-best" } else { "" };
    format!("{best_err:.4}-{dataset}-{model}-{epoch}{suffix}").replace('.', "_")
}

/// Whether a validation error makes a new best snapshot.
/// No best snapshot is taken until `save_best_after_epoch` has passed.
pub fn is_new_best(
    best_err: Option<f64>,
    valid_top1_err: f64,
    epoch: usize,
    save_best_after_epoch: usize,
) -> bool {
    valid_top1_err < best_err.unwrap_or(1.) && epoch > save_best_after_epoch
}

/// Loader over the full batches of one training epoch.
pub fn train_dataloader<AutoB, D>(
    source: Arc<D>,
    pipeline: &ImagePipeline,
    training_config: &TrainingConfig,
    epoch: usize,
) -> Dataloader<AutoB>
where
    AutoB: AutodiffBackend,
    D: Dataset<RawImage> + 'static,
{
    let batches = TrainBatches::new(
        source,
        pipeline.clone(),
        training_config.batch_size,
        training_config.seed,
        epoch,
    );
    // each item is already a full batch
    DataLoaderBuilder::new(FlatBatcher)
        .batch_size(1)
        .num_workers(training_config.num_workers)
        .build(batches)
}

/// Resolves the image pipeline, measuring channel statistics when the
/// normalization is featurewise.
pub fn resolve_pipeline(
    training_config: &TrainingConfig,
    train_source: &impl Dataset<RawImage>,
    artifacts: &Artifacts,
) -> Result<ImagePipeline> {
    let stats = match training_config.transform.normalization {
        Normalization::Featurewise => match artifacts.load_channel_stats()? {
            Some(stats) => Some(stats),
            None => {
                let stats =
                    ChannelStats::measure(train_source, training_config.stats_sample_size)
                        .ok_or_else(|| {
                            Error::InvalidConfig("no images to measure channel statistics".into())
                        })?;
                tracing::info!("measured channel mean={:?} std={:?}", stats.mean, stats.std);
                artifacts.save_channel_stats(&stats)?;
                Some(stats)
            }
        },
        _ => None,
    };
    training_config.transform.pipeline(stats)
}

/// Trains the model described by `model_config`, resuming from the artifacts directory.
///
/// Returns the trained model.
pub fn train<AutoB, C>(
    artifacts: &Artifacts,
    training_config: &TrainingConfig,
    model_config: &C,
    device: AutoB::Device,
) -> Result<C::Model>
where
    AutoB: AutodiffBackend,
    C: ModelConfigExt<AutoB>,
    C::Model: AutodiffModule<AutoB>,
    <C::Model as AutodiffModule<AutoB>>::InnerModule: ImageClassifier<AutoB::InnerBackend>,
{
    training_config.validate()?;
    model_config.validate()?;
    AutoB::seed(&device, training_config.seed);
    tracing::info!("training config: {training_config}");

    let (train_source, valid_source) = training_config.dataset.open()?;
    let class_names = train_source.class_names().to_vec();
    if class_names.len() != model_config.num_classes() {
        return Err(Error::InvalidConfig(format!(
            "the dataset has {} classes but {} outputs {}",
            class_names.len(),
            model_config.model_name(),
            model_config.num_classes()
        )));
    }
    if train_source.len() < training_config.batch_size {
        return Err(Error::InvalidConfig(format!(
            "the training split has {} images, fewer than one batch of {}",
            train_source.len(),
            training_config.batch_size
        )));
    }
    artifacts.save_labels(&class_names)?;
    let pipeline = resolve_pipeline(training_config, &train_source, artifacts)?;

    // load (or init and save) model and optim
    let mut model = artifacts.load_or_save_model(model_config, &device)?;
    let mut optim = artifacts.load_or_save_optim::<AutoB, C::Model>(
        &training_config.optimizer(),
        &device,
    )?;
    let mut progress = artifacts.load_progress()?;
    let mut history = TrainingHistory::load(&artifacts.history_path())?;

    let train_source = Arc::new(train_source);
    let dataloader_valid: Dataloader<AutoB::InnerBackend> = DataLoaderBuilder::new(ImageBatcher)
        .batch_size(training_config.batch_size)
        .num_workers(training_config.num_workers)
        .build(data::valid_dataset(valid_source, pipeline.clone()));

    let schedule = training_config.schedule();
    let dataset_name = &training_config.dataset.name;
    let model_name = model_config.model_name();

    if progress.epoch > 0 {
        tracing::info!("resuming at epoch {}", progress.epoch);
    }
    for epoch in progress.epoch..training_config.num_epochs {
        let lr = schedule.lr_at(epoch);
        if schedule.decays_at(epoch) {
            tracing::info!("[Epoch {epoch}] learning rate decayed to {lr}");
        }
        let tic = Instant::now();

        let dataloader_train = train_dataloader::<AutoB, _>(
            Arc::clone(&train_source),
            &pipeline,
            training_config,
            epoch,
        );
        let (trained, summary) = epoch_train(
            dataloader_train,
            model,
            &mut optim,
            training_config,
            lr,
            epoch,
            &device,
        );
        model = trained;
        tracing::debug!("[Epoch {epoch}] trained {} batches", summary.num_batches);
        let (valid_top1_err, valid_top5_err) =
            epoch_valid(Arc::clone(&dataloader_valid), &model.valid());

        tracing::info!(
            "[Epoch {epoch}] training: err-top1={:.6} err-top5={:.6} loss={:.6}",
            summary.top1_err,
            summary.top5_err,
            summary.loss
        );
        tracing::info!(
            "[Epoch {epoch}] time cost: {:.6}",
            tic.elapsed().as_secs_f64()
        );
        tracing::info!(
            "[Epoch {epoch}] validation: err-top1={valid_top1_err:.6} err-top5={valid_top5_err:.6}"
        );

        history.update(EpochRecord {
            epoch,
            train_top1_err: summary.top1_err,
            train_top5_err: summary.top5_err,
            valid_top1_err,
            valid_top5_err,
            loss: summary.loss,
            lr,
        });
        history.save(&artifacts.history_path())?;

        if is_new_best(
            progress.best_valid_top1_err,
            valid_top1_err,
            epoch,
            training_config.save_best_after_epoch,
        ) {
            progress.best_valid_top1_err = Some(valid_top1_err);
            let name = snapshot_name(valid_top1_err, dataset_name, &model_name, epoch, true);
            tracing::info!("saving best snapshot {name}");
            artifacts.save_snapshot(&model, &name)?;
        }
        let best_err = progress.best_valid_top1_err.unwrap_or(1.);
        if (epoch + 1) % training_config.save_frequency == 0 {
            let name = snapshot_name(best_err, dataset_name, &model_name, epoch, false);
            artifacts.save_snapshot(&model, &name)?;
        }

        // save assets
        progress.epoch = epoch + 1;
        artifacts.save_model(&model)?;
        artifacts.save_optim(&optim)?;
        artifacts.save_progress(&progress)?;
    }

    if training_config.num_epochs > 0 {
        let name = snapshot_name(
            progress.best_valid_top1_err.unwrap_or(1.),
            dataset_name,
            &model_name,
            training_config.num_epochs - 1,
            false,
        );
        artifacts.save_snapshot(&model, &name)?;
    }
    tracing::info!("training finished");
    Ok(model)
}

/// One pass over the full batches of the training split.
pub fn epoch_train<AutoB, M, O>(
    dataloader: Dataloader<AutoB>,
    mut model: M,
    optim: &mut O,
    training_config: &TrainingConfig,
    lr: f64,
    epoch: usize,
    device: &AutoB::Device,
) -> (M, TrainSummary)
where
    AutoB: AutodiffBackend,
    M: AutodiffModule<AutoB> + ImageClassifier<AutoB>,
    O: Optimizer<M, AutoB>,
{
    let loss_fn = CrossEntropyLossConfig::new()
        .with_smoothing(training_config.label_smoothing)
        .init(device);
    let mut errors = ClassificationErrors::default();
    let mut speed = Speedometer::default();
    let mut loss_meter = LossMeter::new(training_config.batch_size);

    for (b, batch) in dataloader.iter().enumerate() {
        let [items, _, _, _] = batch.images.dims();
        debug_assert_eq!(items, training_config.batch_size);

        let logits = model.classify(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        loss_meter.update(loss.clone().into_scalar().elem());

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optim.step(lr, model, grads);

        errors.update(logits.inner(), batch.targets.inner());
        speed.add(items);

        if (b + 1) % training_config.log_interval == 0 {
            let (top1_err, top5_err) = errors.errors();
            tracing::info!(
                "Epoch[{epoch}] Batch [{b}]\tSpeed: {:.6} samples/sec\ttop1-err={top1_err:.6}\ttop5-err={top5_err:.6}",
                speed.report()
            );
        }
    }

    let (top1_err, top5_err) = errors.errors();
    (
        model,
        TrainSummary {
            top1_err,
            top5_err,
            loss: loss_meter.mean(),
            num_batches: loss_meter.batches(),
        },
    )
}

/// Top-1 and top-5 errors over the whole validation split.
pub fn epoch_valid<B: Backend, M: ImageClassifier<B>>(
    dataloader: Dataloader<B>,
    model: &M,
) -> (f64, f64) {
    let mut errors = ClassificationErrors::default();
    for batch in dataloader.iter() {
        let logits = model.classify(batch.images);
        errors.update(logits, batch.targets);
    }
    errors.errors()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_names_have_no_dots() {
        assert_eq!(
            snapshot_name(0.23456, "imagenet", "mobilenetv2_1.0", 51, true),
            "0_2346-imagenet-mobilenetv2_1_0-51-best"
        );
        assert_eq!(
            snapshot_name(1., "cifar10", "resnet18", 9, false),
            "1_0000-cifar10-resnet18-9"
        );
    }

    #[test]
    fn best_snapshots_wait_for_the_configured_epoch() {
        // the error must improve on the best so far, which starts at 1
        assert!(!is_new_best(None, 0.4, 50, 50));
        assert!(is_new_best(None, 0.4, 51, 50));
        assert!(!is_new_best(None, 1., 51, 50));
        assert!(!is_new_best(Some(0.3), 0.4, 60, 50));
        assert!(is_new_best(Some(0.3), 0.25, 60, 50));
    }
}
