use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("sequence counter {} cannot advance past u64::MAX", .0.display())]
    CounterExhausted(PathBuf),

    #[error("copy of {} failed: {reason}", path.display())]
    CopyFailed { path: PathBuf, reason: String },
}
