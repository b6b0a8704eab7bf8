//! Checkpoint and restore of resource status.
//!
//! A [`StatusCheckpoint`] captures which state machine a resource is engaged
//! in, its current state, its enabled flag and its full state-change history,
//! so a controller process can restore that status after a restart.
//! Running actions are not captured.

use crate::action::StatusSnapshot;
use crate::core::StateHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::{CheckpointError, CheckpointFormat};

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Serializable record of one resource's status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusCheckpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: Uuid,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Path of the checkpointed resource
    pub path: String,

    /// Engaged state machine, if any
    pub state_machine: Option<String>,

    /// Current state within the engaged state machine
    pub state: Option<String>,

    pub enabled: bool,

    /// Complete state-change history
    pub history: StateHistory,
}

impl StatusCheckpoint {
    pub fn from_snapshot(snapshot: StatusSnapshot) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path: snapshot.path,
            state_machine: snapshot.state_machine,
            state: snapshot.state,
            enabled: snapshot.enabled,
            history: snapshot.history,
        }
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| self.encode_error(CheckpointFormat::Json, e))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self =
            serde_json::from_str(json).map_err(|e| decode_error(CheckpointFormat::Json, e))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| self.encode_error(CheckpointFormat::Binary, e))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: Self =
            bincode::deserialize(bytes).map_err(|e| decode_error(CheckpointFormat::Binary, e))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn encode_error(
        &self,
        format: CheckpointFormat,
        err: impl std::fmt::Display,
    ) -> CheckpointError {
        CheckpointError::Encode {
            path: self.path.clone(),
            format,
            reason: err.to_string(),
        }
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        if self.state.is_some() && self.state_machine.is_none() {
            return Err(CheckpointError::Inconsistent {
                path: self.path.clone(),
                reason: "state recorded without a state machine".to_string(),
            });
        }
        Ok(())
    }
}

fn decode_error(format: CheckpointFormat, err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Decode {
        format,
        reason: err.to_string(),
    }
}
