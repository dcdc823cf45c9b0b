use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("asset not found: {0}")]
    MissingAsset(String),
    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },
    #[error("heightmap grid of {0} cells is not square")]
    InvalidHeightmap(usize),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    pub fn decode(what: impl Into<String>, reason: impl ToString) -> Self {
        ExportError::Decode {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
