use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("Failed to parse certificate: {0}")]
    Parse(String),

    #[error("Invalid validity window: {0}")]
    InvalidValidity(String),

    #[error("Invalid key file {path:?}: {reason}")]
    InvalidKey { path: PathBuf, reason: String },
}

impl CertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CertError::Io {
            path: path.into(),
            source,
        }
    }
}
