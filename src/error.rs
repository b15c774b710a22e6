//! Error taxonomy for loading and fingerprinting cost records.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a record could not be loaded from the remote endpoint or a local file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Transport failure or non-success HTTP status.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    /// The body or file was not a well-formed record.
    #[error("malformed cost record from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    /// No local file-selection capability is available in this environment.
    #[error("local file selection is not available")]
    UnsupportedEnvironment,
    /// The file prompt returned without a selection.
    #[error("no file was selected")]
    UserCancelled,
    #[error("selected file {} is not a .json file", .0.display())]
    UnsupportedFileType(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    LocalRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LoadError {
    /// Network and parse failures leave the previous record in place and may
    /// be retried on the next cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Parse { .. })
    }
}

/// The record could not be serialized into a fingerprint.
#[derive(Debug, Error)]
#[error("failed to compute record signature: {0}")]
pub struct SignatureError(#[from] pub serde_json::Error);
