use std::path::PathBuf;

use simple_error::SimpleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unsupported layer type: {0}")]
    UnsupportedLayerType(String),

    #[error("unsupported topology: {0}")]
    UnsupportedTopology(String),

    #[error("unrecognized border mode for padding {pad:?} and kernel size {kernel_size:?}")]
    UnrecognizedBorderMode {
        pad: [usize; 2],
        kernel_size: [usize; 2],
    },

    #[error("unsupported padding: {0}")]
    UnsupportedPadding(String),

    #[error("unconsumed flatten records: {0:?}")]
    UnconsumedFlattenRecord(Vec<String>),

    #[error("connections were not found at {}", .0.display())]
    MissingConnectionFile(PathBuf),

    #[error("spiking neuron layers were not found at {}", .0.display())]
    MissingAssembly(PathBuf),

    #[error("layer {0} has no weights")]
    MissingWeights(String),

    #[error("invalid shape: {0}")]
    InvalidShape(String),

    #[error("invalid build state: {0}")]
    InvalidBuildState(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] SimpleError),

    #[error("refusing to overwrite {}", .0.display())]
    FileExists(PathBuf),

    #[error("parse error in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConversionError>;
