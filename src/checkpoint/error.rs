//! Failures while persisting or loading a status checkpoint.

use std::fmt;
use thiserror::Error;

/// Encoding a [`StatusCheckpoint`](super::StatusCheckpoint) is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Binary,
}

impl fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "JSON",
            Self::Binary => "bincode",
        })
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Could not encode status of resource '{path}' as {format}: {reason}")]
    Encode {
        path: String,
        format: CheckpointFormat,
        reason: String,
    },

    #[error("Could not decode {format} status checkpoint: {reason}")]
    Decode {
        format: CheckpointFormat,
        reason: String,
    },

    /// Written by a newer or older release with a different layout
    #[error("Status checkpoint version {found} is not supported, expected {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Decoded fine, but the recorded engagement cannot be restored
    #[error("Status checkpoint of resource '{path}' is inconsistent: {reason}")]
    Inconsistent { path: String, reason: String },
}
