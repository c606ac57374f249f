use anyhow::Context;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_mobilenet::artifacts::{self, Artifacts, MODEL_CONFIG_NAME, TRAINING_CONFIG_NAME};
use burn_mobilenet::backend::{self, MainAutoBackend, MainBackend, MainDevice};
use burn_mobilenet::cli::{AppArgs, HELP};
use burn_mobilenet::inference;
use burn_mobilenet::model::{ModelConfig, ModelSpec};
use burn_mobilenet::train::{self, TrainingConfig};
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "mobilenetv2_1.0";
const IMAGENET_CLASSES: usize = 1000;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("burn_mobilenet=info")),
        )
        .init();

    let app_args = AppArgs::parse()?;
    if app_args.help {
        println!("{HELP}");
        return Ok(());
    }
    launch::<MainBackend, MainAutoBackend>(&app_args)
}

pub fn launch<B, AutoB>(app_args: &AppArgs) -> anyhow::Result<()>
where
    B: Backend + MainDevice,
    AutoB: AutodiffBackend + MainDevice,
{
    let artifacts = Artifacts::new(app_args.artifacts_dir()?);
    artifacts.create(app_args.remove_artifacts && app_args.training)?;

    // setup training and model configs
    let mut training_config = match &app_args.training_config {
        Some(path) => artifacts::load_config::<TrainingConfig>(path)?
            .with_context(|| format!("training config {path:?} not found"))?,
        None => match artifacts.load_config::<TrainingConfig>(TRAINING_CONFIG_NAME)? {
            Some(config) => config,
            None => TrainingConfig::for_data_dir(app_args.data_dir.as_deref()),
        },
    };
    if let Some(data_dir) = &app_args.data_dir {
        training_config.dataset.root = data_dir.clone();
    }

    let model_config = match (&app_args.model_config, &app_args.model) {
        (Some(path), _) => artifacts::load_config::<ModelConfig>(path)?
            .with_context(|| format!("model config {path:?} not found"))?,
        (None, Some(name)) => {
            ModelConfig::from_name(name, num_classes(app_args, &training_config, &artifacts)?)?
                .adapted_to_input(training_config.transform.image_size)
        }
        (None, None) => match artifacts.load_config::<ModelConfig>(MODEL_CONFIG_NAME)? {
            Some(config) => config,
            None => ModelConfig::from_name(
                DEFAULT_MODEL,
                num_classes(app_args, &training_config, &artifacts)?,
            )?
            .adapted_to_input(training_config.transform.image_size),
        },
    };
    model_config.validate()?;
    let training_config = training_config.fit_to_model(&model_config);
    model_config.check_input_size(training_config.transform.image_size)?;

    // save configs
    artifacts.save_config(TRAINING_CONFIG_NAME, &training_config)?;
    artifacts.save_config(MODEL_CONFIG_NAME, &model_config)?;

    if app_args.training {
        let device = AutoB::main_device();
        tracing::info!("training on {}", backend::describe::<AutoB>());
        match &model_config {
            ModelConfig::MobileNetV2(c) => {
                train::train::<AutoB, _>(&artifacts, &training_config, c, device)?;
            }
            ModelConfig::ResNet(c) => {
                train::train::<AutoB, _>(&artifacts, &training_config, c, device)?;
            }
            ModelConfig::InceptionV3(c) => {
                train::train::<AutoB, _>(&artifacts, &training_config, c, device)?;
            }
        }
    }

    if !app_args.inference.is_empty() {
        let device = B::main_device();
        tracing::info!("inferring on {}", backend::describe::<B>());
        let images = &app_args.inference;
        let predictions = match &model_config {
            ModelConfig::MobileNetV2(c) => {
                inference::infer::<B, _>(&artifacts, &training_config, c, images, &device)?
            }
            ModelConfig::ResNet(c) => {
                inference::infer::<B, _>(&artifacts, &training_config, c, images, &device)?
            }
            ModelConfig::InceptionV3(c) => {
                inference::infer::<B, _>(&artifacts, &training_config, c, images, &device)?
            }
        };
        for image in predictions {
            println!("{}", image.path.display());
            for prediction in image.top {
                println!("    {:.4}  {}", prediction.probability, prediction.label);
            }
        }
    }

    if app_args.inference.is_empty() && !app_args.training {
        println!("neither training nor inference were enabled");
        println!("{HELP}");
    }
    Ok(())
}

/// Number of outputs for a new model: the dataset classes when training,
/// otherwise the saved labels.
fn num_classes(
    app_args: &AppArgs,
    training_config: &TrainingConfig,
    artifacts: &Artifacts,
) -> anyhow::Result<usize> {
    if app_args.training {
        return Ok(training_config.dataset.class_names()?.len());
    }
    Ok(artifacts
        .load_labels()?
        .map(|labels| labels.len())
        .unwrap_or(IMAGENET_CLASSES))
}
