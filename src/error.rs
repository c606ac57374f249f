use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to record {what} at {path}: {source}")]
    Record {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: burn::record::RecorderError,
    },
    #[error("config error at {path}: {msg}")]
    Config { path: PathBuf, msg: String },
    #[error("dataset at {path} is invalid: {msg}")]
    Dataset { path: PathBuf, msg: String },
    #[error("no trained model in {0}")]
    MissingModel(PathBuf),
    #[error("unknown model name {0:?}")]
    UnknownModel(String),
    #[error("invalid model config: {0}")]
    InvalidModel(String),
    #[error("invalid training config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub(crate) fn dataset(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Error::Dataset {
            path: path.into(),
            msg: msg.into(),
        }
    }
}
