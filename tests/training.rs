use burn::backend::{Autodiff, NdArray};
use burn::data::dataset::InMemDataset;
use burn_mobilenet::artifacts::{self, Artifacts, SNAPSHOTS_DIR};
use burn_mobilenet::data::{DatasetConfig, Normalization, RawImage, TransformConfig};
use burn_mobilenet::inference;
use burn_mobilenet::model::MobileNetV2Config;
use burn_mobilenet::train::{self, TrainingConfig, TrainingHistory};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type B = NdArray;
type AutoB = Autodiff<NdArray>;

const CLASSES: [&str; 2] = ["blue", "red"];

/// `root/{train,val}/{blue,red}/*.png` with solid-color images.
fn write_dataset(root: &Path, train_per_class: usize) -> Vec<PathBuf> {
    let mut valid_images = vec![];
    for (split, count) in [("train", train_per_class), ("val", 1)] {
        for (c, class) in CLASSES.iter().enumerate() {
            let dir = root.join(split).join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let shade = 150 + 20 * i as u8;
                let color = if c == 0 { [0, 0, shade] } else { [shade, 0, 0] };
                let path = dir.join(format!("{i}.png"));
                RgbImage::from_pixel(40, 36, Rgb(color)).save(&path).unwrap();
                if split == "val" {
                    valid_images.push(path);
                }
            }
        }
    }
    // ignored: not an image
    std::fs::write(root.join("train").join("red").join("notes.txt"), "x").unwrap();
    valid_images
}

fn training_config(root: &Path) -> TrainingConfig {
    TrainingConfig::new()
        .with_dataset(DatasetConfig::new().with_root(root.to_path_buf()))
        .with_transform(
            TransformConfig::new()
                .with_image_size(32)
                .with_train_resize(None)
                .with_valid_resize(None)
                .with_random_resized_crop(false),
        )
        .with_num_epochs(2)
        .with_batch_size(2)
        .with_num_workers(2)
        .with_lr(0.01)
        .with_log_interval(1)
        .with_save_frequency(1)
        .with_save_best_after_epoch(0)
}

fn model_config() -> MobileNetV2Config {
    MobileNetV2Config::new()
        .with_multiplier(0.25)
        .with_num_classes(CLASSES.len())
}

#[test]
fn train_resume_and_infer() {
    let data = temp_dir::TempDir::new().unwrap();
    let out = temp_dir::TempDir::new().unwrap();
    let valid_images = write_dataset(data.path(), 3);
    let artifacts = Artifacts::new(out.path());
    artifacts.create(false).unwrap();

    let training_config = training_config(data.path());
    let device = Default::default();
    train::train::<AutoB, _>(&artifacts, &training_config, &model_config(), device).unwrap();

    let progress = artifacts.load_progress().unwrap();
    assert_eq!(progress.epoch, 2);
    let history = TrainingHistory::load(&artifacts.history_path()).unwrap();
    assert_eq!(history.records().len(), 2);
    assert!(history.records().iter().all(|r| r.loss.is_finite()));
    assert_eq!(
        artifacts.load_labels().unwrap(),
        Some(CLASSES.iter().map(|s| s.to_string()).collect())
    );
    assert!(artifacts.path("model.mpk.gz").exists());
    assert!(artifacts.path("optim.mpk.gz").exists());

    // epoch 0 is not after `save_best_after_epoch`, so only epoch 1 may be a best one
    let best = progress
        .best_valid_top1_err
        .expect("epoch 1 classifies at least one validation image");
    assert!(best < 1.);
    assert_eq!(history.records()[1].valid_top1_err, best);
    let best_prefix = format!("{best:.4}").replace('.', "_");
    let snapshots = artifacts.path(SNAPSHOTS_DIR);
    let snapshot = |name: String| snapshots.join(format!("{name}.mpk.gz"));
    assert!(snapshot("1_0000-imagenet-mobilenetv2_0_25-0".into()).exists());
    assert!(snapshot(format!("{best_prefix}-imagenet-mobilenetv2_0_25-1")).exists());
    assert!(snapshot(format!("{best_prefix}-imagenet-mobilenetv2_0_25-1-best")).exists());
    let best_snapshots = std::fs::read_dir(&snapshots)
        .unwrap()
        .filter(|entry| {
            let name = entry.as_ref().unwrap().file_name();
            name.to_string_lossy().ends_with("-best.mpk.gz")
        })
        .count();
    assert_eq!(best_snapshots, 1);

    // nothing left to do with the same number of epochs
    let device = Default::default();
    train::train::<AutoB, _>(&artifacts, &training_config, &model_config(), device).unwrap();
    assert_eq!(artifacts.load_progress().unwrap().epoch, 2);
    assert_eq!(
        TrainingHistory::load(&artifacts.history_path())
            .unwrap()
            .records()
            .len(),
        2
    );

    // one more epoch starts from the saved best error
    let training_config = training_config.with_num_epochs(3);
    let device = Default::default();
    train::train::<AutoB, _>(&artifacts, &training_config, &model_config(), device).unwrap();
    let progress = artifacts.load_progress().unwrap();
    assert_eq!(progress.epoch, 3);
    let resumed_best = progress.best_valid_top1_err.unwrap();
    assert!(resumed_best <= best);
    let history = TrainingHistory::load(&artifacts.history_path()).unwrap();
    assert_eq!(history.records().len(), 3);
    let resumed_prefix = format!("{resumed_best:.4}").replace('.', "_");
    assert!(snapshot(format!("{resumed_prefix}-imagenet-mobilenetv2_0_25-2")).exists());

    let device = Default::default();
    let predictions = inference::infer::<B, _>(
        &artifacts,
        &training_config,
        &model_config(),
        &valid_images,
        &device,
    )
    .unwrap();
    assert_eq!(predictions.len(), valid_images.len());
    for image in predictions {
        assert_eq!(image.top.len(), CLASSES.len());
        let total: f32 = image.top.iter().map(|p| p.probability).sum();
        assert!((total - 1.).abs() < 1e-4);
        assert!(image.top[0].probability >= image.top[1].probability);
    }
}

#[test]
fn every_worker_gets_full_batches() {
    // 7 images in batches of 2 over 3 workers
    let images = (0..7)
        .map(|label| RawImage {
            image: RgbImage::from_pixel(8, 8, Rgb([label as u8 * 30, 0, 0])),
            label,
        })
        .collect();
    let source = Arc::new(InMemDataset::new(images));
    let pipeline = TransformConfig::new()
        .with_image_size(8)
        .with_train_resize(None)
        .pipeline(None)
        .unwrap();
    let config = TrainingConfig::new().with_batch_size(2).with_num_workers(3);

    for epoch in 0..2 {
        let loader =
            train::train_dataloader::<AutoB, _>(Arc::clone(&source), &pipeline, &config, epoch);
        let mut labels = vec![];
        let mut batches = 0;
        for batch in loader.iter() {
            assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
            labels.extend(batch.targets.into_data().iter::<i64>());
            batches += 1;
        }
        assert_eq!(batches, 3);
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), 6);
    }
}

#[test]
fn featurewise_statistics_are_saved() {
    let data = temp_dir::TempDir::new().unwrap();
    let out = temp_dir::TempDir::new().unwrap();
    write_dataset(data.path(), 2);
    let artifacts = Artifacts::new(out.path());
    artifacts.create(false).unwrap();

    let mut training_config = training_config(data.path()).with_num_epochs(1);
    training_config.transform.normalization = Normalization::Featurewise;
    let device = Default::default();
    train::train::<AutoB, _>(&artifacts, &training_config, &model_config(), device).unwrap();

    let stats = artifacts.load_channel_stats().unwrap().unwrap();
    // green is always 0
    assert_eq!(stats.mean[1], 0.);
    assert!(stats.mean[0] > 0. && stats.mean[2] > 0.);
}

#[test]
fn class_count_must_match_the_model() {
    let data = temp_dir::TempDir::new().unwrap();
    let out = temp_dir::TempDir::new().unwrap();
    write_dataset(data.path(), 2);
    let artifacts = Artifacts::new(out.path());
    artifacts.create(false).unwrap();

    let model_config = model_config().with_num_classes(3);
    let device = Default::default();
    let result = train::train::<AutoB, _>(
        &artifacts,
        &training_config(data.path()),
        &model_config,
        device,
    );
    assert!(matches!(result, Err(burn_mobilenet::Error::InvalidConfig(_))));
}

#[test]
fn inference_without_a_model_fails() {
    let out = temp_dir::TempDir::new().unwrap();
    let artifacts = Artifacts::new(out.path());
    artifacts.create(false).unwrap();
    artifacts::save_config(
        &artifacts.path(artifacts::TRAINING_CONFIG_NAME),
        &TrainingConfig::new(),
    )
    .unwrap();
    let device = Default::default();
    let result = inference::infer::<B, _>(
        &artifacts,
        &TrainingConfig::new(),
        &model_config(),
        &[],
        &device,
    );
    assert!(matches!(
        result,
        Err(burn_mobilenet::Error::MissingModel(_))
    ));
}
