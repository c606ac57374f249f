use std::ffi::OsString;
use std::path::PathBuf;

pub const HELP: &str = "\
Burn MobileNet

A command-line tool for training and/or running inference with image classification models
(MobileNetV2, ResNet, InceptionV3).
Models, optimizers, configurations, class labels and training progress are persisted in an artifacts directory.

USAGE:
    burn-mobilenet [OPTIONS]

When no --training or --inference option is provided, the program exits after handling configuration logic.

BEHAVIOR OVERVIEW
- The program manages two configurations: training config and model config.
- If --training-config or --model-config is given, the corresponding config is loaded from the specified file and saved to the artifacts directory (overwriting any existing file).
- If no explicit config file is provided for a component, the program attempts to load it from the artifacts directory; if absent, a default configuration is created and saved.
- --model selects an architecture by name, replacing the model config; its number of classes follows the dataset.
- --data-dir replaces the dataset root of the training config. A directory holding the CIFAR-10 binary batches selects the CIFAR-10 recipe when no training config exists yet.
- A model needing larger images than the training config's image size (InceptionV3: 75x75) raises that size.
- With --remove-artifacts, the model, optimizer, progress and history files are deleted before training (if --training is active).
- Training resumes from the epoch recorded in the artifacts directory.
- If both --training and --inference are specified, training executes first, followed by inference using the trained model.

FLAGS:
    -h, --help                  Show this help message and exit

OPTIONS:
    -t, --training              Run training (creates or updates model / optimizer)
    -i, --inference <IMAGE>     Classify an image and print its top-5 classes. Can be repeated.
    -r, --remove-artifacts      Delete the previous run's weights and progress before training
                                (has no effect if --training is not used)
    -c, --training-config <PATH>
                                Load training configuration from this file (overrides any config in artifacts directory)
    -m, --model-config <PATH>   Load model configuration from this file (overrides any config in artifacts directory)
        --model <NAME>          Architecture name: mobilenetv2_1.0, mobilenetv2_0.5, resnet18, resnet34,
                                resnet50, resnet101, resnet152, inceptionv3
    -d, --data-dir <PATH>       Dataset root directory
    -a, --artifacts-path <PATH>
                                Directory where configurations, model weights, and optimizer state are saved and loaded.
                                If the directory does not exist, it will be created.
                                Defaults to a newly created temporary directory (path will be printed).

ENVIRONMENT:
    RUST_LOG                    Log filter, e.g. `burn_mobilenet=debug`
";

#[derive(Debug)]
pub struct AppArgs {
    pub help: bool,
    pub training: bool,
    pub inference: Vec<PathBuf>,
    pub remove_artifacts: bool,
    pub training_config: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub model: Option<String>,
    pub data_dir: Option<PathBuf>,
    /// `None` when a temporary directory should be created.
    pub artifacts_path: Option<PathBuf>,
}

impl AppArgs {
    pub fn parse() -> anyhow::Result<Self> {
        Self::from_args(std::env::args_os().skip(1).collect())
    }

    pub fn from_args(args: Vec<OsString>) -> anyhow::Result<Self> {
        let mut pargs = pico_args::Arguments::from_vec(args);

        let args = AppArgs {
            help: pargs.contains(["-h", "--help"]),
            training_config: pargs
                .opt_value_from_os_str(["-c", "--training-config"], parse_path)?,
            model_config: pargs.opt_value_from_os_str(["-m", "--model-config"], parse_path)?,
            model: pargs.opt_value_from_str("--model")?,
            data_dir: pargs.opt_value_from_os_str(["-d", "--data-dir"], parse_path)?,
            artifacts_path: pargs.opt_value_from_os_str(["-a", "--artifacts-path"], parse_path)?,
            inference: pargs.values_from_os_str(["-i", "--inference"], parse_path)?,
            // must parse flags after values
            training: pargs.contains(["-t", "--training"]),
            remove_artifacts: pargs.contains(["-r", "--remove-artifacts"]),
        };

        let remaining = pargs.finish();
        if !remaining.is_empty() {
            anyhow::bail!("unused arguments: {remaining:?}");
        }

        Ok(args)
    }

    /// The given artifacts directory, or a new temporary one.
    pub fn artifacts_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.artifacts_path {
            return Ok(path.clone());
        }
        // e.g. /tmp/burn-mobilenet-abcd-0
        let prefix = format!("{}-", std::env!("CARGO_PKG_NAME"));
        let tmp = temp_dir::TempDir::with_prefix(prefix)?.dont_delete_on_drop();
        let path = tmp.path().to_path_buf();
        println!("new artifacts directory: {path:?}");
        Ok(path)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> anyhow::Result<AppArgs> {
        AppArgs::from_args(line.split_whitespace().map(OsString::from).collect())
    }

    #[test]
    fn repeated_images_are_collected() {
        let parsed = args("-t -i a.jpg --inference b.png -a out --model resnet18").unwrap();
        assert!(parsed.training);
        assert!(!parsed.remove_artifacts);
        assert_eq!(
            parsed.inference,
            vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")]
        );
        assert_eq!(parsed.artifacts_path, Some(PathBuf::from("out")));
        assert_eq!(parsed.model.as_deref(), Some("resnet18"));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(args("-t --epochs 3").is_err());
    }
}
