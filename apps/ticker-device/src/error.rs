use std::path::PathBuf;

use thiserror::Error;
use ticker_proto::SettingsError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unknown settings group `{0}`")]
    UnknownGroup(String),
    #[error("invalid settings payload: {0}")]
    Settings(#[from] SettingsError),
    #[error("invalid message list: {0}")]
    Messages(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
