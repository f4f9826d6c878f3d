use std::path::PathBuf;

use thiserror::Error;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt postings record in {} at byte {offset}: {detail}", path.display())]
    CorruptPostings {
        path: PathBuf,
        offset: u64,
        detail: String,
    },
    #[error("Corrupt chunk {}: {detail}", path.display())]
    CorruptChunk { path: PathBuf, detail: String },
    #[error("Corrupt model file {}: {detail}", path.display())]
    CorruptModel { path: PathBuf, detail: String },
    #[error("Index already exists at {}", .0.display())]
    IndexAlreadyExists(PathBuf),
    #[error("Non-finite loss during training: {0}")]
    NonFiniteLoss(f64),
}
