// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the library layers. The binary wraps these in `anyhow`.
#[derive(Debug, Error)]
pub enum GrnError {
    /// The dataset could not be opened by any known loader.
    #[error("Could not load input dataset {}: {reason}", path.display())]
    InputLoad { path: PathBuf, reason: String },

    /// The container has neither an RNA modality nor a top-level matrix.
    #[error("Could not extract expression data: {0}")]
    DataExtraction(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parse error in {}, line {line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GrnResult<T> = std::result::Result<T, GrnError>;
