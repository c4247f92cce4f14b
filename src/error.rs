use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("no pretrained weights at {}", .0.display())]
    MissingWeights(PathBuf),

    #[error("weight file error: {0}")]
    Weights(#[from] bincode::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("plot error: {0}")]
    Plot(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A subsample of `size` rows left one side of the 80/20 split empty.
    #[error("size {size} gives an empty split (train {train}, test {test})")]
    EmptySplit {
        size: usize,
        train: usize,
        test: usize,
    },

    #[error("workers for ranks {ranks:?} failed, their results are missing")]
    WorkersFailed { ranks: Vec<usize> },
}

pub type Result<T> = std::result::Result<T, Error>;
