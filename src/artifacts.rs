//! Files persisted between runs: configs, class names, weights, optimizer state and progress.

use crate::backend::MainBackend;
use crate::data::ChannelStats;
use crate::error::{Error, Result};
use crate::model::ModelConfigExt;
use crate::train::optim::{SgdOptimizer, init_sgd};
use burn::module::AutodiffModule;
use burn::optim::{Optimizer, SgdConfig};
use burn::record::{CompactRecorder, FileRecorder, Recorder};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub type RecorderTy = CompactRecorder;

pub const TRAINING_CONFIG_NAME: &str = "training_config.json";
pub const MODEL_CONFIG_NAME: &str = "model_config.json";
pub const LABELS_NAME: &str = "labels.json";
pub const CHANNEL_STATS_NAME: &str = "channel_stats.json";
pub const PROGRESS_NAME: &str = "progress.json";
pub const HISTORY_NAME: &str = "history.csv";
pub const MODEL_NAME: &str = "model";
pub const OPTIM_NAME: &str = "optim";
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Where a run resumes from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Next epoch to train (0-based).
    pub epoch: usize,
    /// Lowest validation top-1 error among the saved best snapshots.
    pub best_valid_top1_err: Option<f64>,
}

/// An artifacts directory.
#[derive(Clone, Debug)]
pub struct Artifacts {
    dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Creates the directory. With `reset`, the weights, optimizer state and
    /// progress of a previous run are deleted first; configs are kept.
    pub fn create(&self, reset: bool) -> Result<()> {
        std::fs::create_dir_all(self.dir.join(SNAPSHOTS_DIR)).map_err(Error::io(&self.dir))?;
        if reset {
            let ext = <RecorderTy as FileRecorder<MainBackend>>::file_extension();
            for name in [
                format!("{MODEL_NAME}.{ext}"),
                format!("{OPTIM_NAME}.{ext}"),
                PROGRESS_NAME.to_string(),
                CHANNEL_STATS_NAME.to_string(),
                HISTORY_NAME.to_string(),
            ] {
                let path = self.dir.join(name);
                if path.exists() {
                    tracing::info!("removing {}", path.display());
                    std::fs::remove_file(&path).map_err(Error::io(&path))?;
                }
            }
        }
        Ok(())
    }

    pub fn save_config(&self, name: &str, config: &impl Config) -> Result<()> {
        save_config(&self.path(name), config)
    }

    pub fn load_config<C: Config>(&self, name: &str) -> Result<Option<C>> {
        load_config(&self.path(name))
    }

    pub fn save_labels(&self, labels: &[String]) -> Result<()> {
        save_json(&self.path(LABELS_NAME), &labels)
    }

    pub fn load_labels(&self) -> Result<Option<Vec<String>>> {
        load_json(&self.path(LABELS_NAME))
    }

    /// Statistics measured for featurewise normalization, reused at inference.
    pub fn save_channel_stats(&self, stats: &ChannelStats) -> Result<()> {
        save_json(&self.path(CHANNEL_STATS_NAME), stats)
    }

    pub fn load_channel_stats(&self) -> Result<Option<ChannelStats>> {
        load_json(&self.path(CHANNEL_STATS_NAME))
    }

    pub fn save_progress(&self, progress: &Progress) -> Result<()> {
        save_json(&self.path(PROGRESS_NAME), progress)
    }

    pub fn load_progress(&self) -> Result<Progress> {
        Ok(load_json(&self.path(PROGRESS_NAME))?.unwrap_or_default())
    }

    pub fn history_path(&self) -> PathBuf {
        self.path(HISTORY_NAME)
    }

    pub fn save_model<B: Backend>(&self, model: &impl Module<B>) -> Result<()> {
        save_model(&self.path(MODEL_NAME), model)
    }

    pub fn load_model<B: Backend, C: ModelConfigExt<B>>(
        &self,
        model_config: &C,
        device: &B::Device,
    ) -> Result<Option<C::Model>> {
        load_model(&self.path(MODEL_NAME), model_config, device)
    }

    pub fn load_or_save_model<B: Backend, C: ModelConfigExt<B>>(
        &self,
        model_config: &C,
        device: &B::Device,
    ) -> Result<C::Model> {
        match self.load_model(model_config, device)? {
            Some(model) => Ok(model),
            None => {
                tracing::info!("initializing new model {}", model_config.model_name());
                let model = model_config.init(device);
                self.save_model(&model)?;
                Ok(model)
            }
        }
    }

    /// Saves a named copy of the weights under `snapshots/`.
    pub fn save_snapshot<B: Backend>(&self, model: &impl Module<B>, name: &str) -> Result<()> {
        save_model(&self.dir.join(SNAPSHOTS_DIR).join(name), model)
    }

    pub fn save_optim<AutoB, AutoM>(&self, optim: &impl Optimizer<AutoM, AutoB>) -> Result<()>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
    {
        save_optim(&self.path(OPTIM_NAME), optim)
    }

    pub fn load_or_save_optim<AutoB, AutoM>(
        &self,
        optim_config: &SgdConfig,
        device: &AutoB::Device,
    ) -> Result<SgdOptimizer<AutoB, AutoM>>
    where
        AutoB: AutodiffBackend,
        AutoM: AutodiffModule<AutoB>,
    {
        match load_optim(&self.path(OPTIM_NAME), optim_config, device)? {
            Some(optim) => Ok(optim),
            None => {
                tracing::info!("initializing new optimizer");
                let optim = init_sgd(optim_config);
                self.save_optim(&optim)?;
                Ok(optim)
            }
        }
    }
}

pub fn save_config(path: &Path, config: &impl Config) -> Result<()> {
    tracing::debug!("saving config into {}", path.display());
    config.save(path).map_err(Error::io(path))
}

pub fn load_config<C: Config>(path: &Path) -> Result<Option<C>> {
    if !path.exists() {
        return Ok(None);
    }
    tracing::info!("loading config from {}", path.display());
    C::load(path).map(Some).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })
}

fn save_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(Error::io(path))
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path).map_err(Error::io(path))?;
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// The recorder appends its own extension to `path`.
fn with_recorder_extension<B: Backend>(path: &Path) -> PathBuf {
    let ext = <RecorderTy as FileRecorder<B>>::file_extension();
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    name.into()
}

pub fn save_model<B: Backend>(path: &Path, model: &impl Module<B>) -> Result<()> {
    tracing::debug!("saving model to {}", with_recorder_extension::<B>(path).display());
    model
        .clone()
        .save_file(path, &RecorderTy::new()) // ext added automatically
        .map_err(|source| Error::Record {
            what: "model",
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_model<B: Backend, C: ModelConfigExt<B>>(
    path: &Path,
    model_config: &C,
    device: &B::Device,
) -> Result<Option<C::Model>> {
    let path_ext = with_recorder_extension::<B>(path);
    if !path_ext.exists() {
        return Ok(None);
    }
    tracing::info!("loading model from {}", path_ext.display());
    model_config
        .init(device)
        .load_file(path, &RecorderTy::new(), device) // ext added automatically
        .map(Some)
        .map_err(|source| Error::Record {
            what: "model",
            path: path_ext,
            source,
        })
}

pub fn save_optim<AutoB, AutoM, Optim>(path: &Path, optim: &Optim) -> Result<()>
where
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
    Optim: Optimizer<AutoM, AutoB>,
{
    tracing::debug!("saving optimizer to {}", with_recorder_extension::<AutoB>(path).display());
    <RecorderTy as Recorder<AutoB>>::record(&RecorderTy::new(), optim.to_record(), path.into())
        .map_err(|source| Error::Record {
            what: "optimizer",
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Restores the momentum buffers of an SGD optimizer.
pub fn load_optim<AutoB, AutoM>(
    path: &Path,
    optim_config: &SgdConfig,
    device: &AutoB::Device,
) -> Result<Option<SgdOptimizer<AutoB, AutoM>>>
where
    AutoB: AutodiffBackend,
    AutoM: AutodiffModule<AutoB>,
{
    let path_ext = with_recorder_extension::<AutoB>(path);
    if !path_ext.exists() {
        return Ok(None);
    }
    tracing::info!("loading optimizer from {}", path_ext.display());
    let record = <RecorderTy as Recorder<AutoB>>::load(&RecorderTy::new(), path.into(), device)
        .map_err(|source| Error::Record {
            what: "optimizer",
            path: path_ext,
            source,
        })?;
    Ok(Some(init_sgd(optim_config).load_record(record)))
}
