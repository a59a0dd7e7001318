// deployer/src/source.rs

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("contract source not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to read contract source {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Text of a contract source file together with the path it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSource {
    pub path: PathBuf,
    pub text: String,
}

impl ContractSource {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self { path: path.into(), text: text.into() }
    }

    /// File name without extension, e.g. `voted_admins` for `contracts/voted_admins.sol`.
    pub fn stem(&self) -> Option<&str> {
        self.path.file_stem().and_then(|s| s.to_str())
    }
}

/// Reads the whole file at `path`. No parsing happens here.
pub fn load_source(path: impl AsRef<Path>) -> Result<ContractSource, SourceError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "Reading contract source");

    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound { path: path.to_path_buf() },
        _ => SourceError::Read { path: path.to_path_buf(), source: e },
    })?;

    Ok(ContractSource::new(path, text))
}
