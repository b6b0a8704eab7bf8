//! Execution states of actions.
//!
//! Every command, sequence and transition moves through the same small set
//! of [`FunctionoidState`]s. The [`State`] trait exposes the properties the
//! orchestration code branches on without matching every variant.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Common inspection methods for execution states.
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Human-readable name of the state.
    fn name(&self) -> &str;

    /// True once the execution has finished, successfully or not.
    fn is_final(&self) -> bool {
        false
    }

    /// True if the state represents a failure.
    fn is_error(&self) -> bool {
        false
    }
}

/// State of one execution of an action.
///
/// `Initial` only before the first execution; every execution starts at
/// `Scheduled` and ends at `Done`, `Warning` or `Error`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionoidState {
    #[default]
    Initial,
    Scheduled,
    Running,
    Warning,
    Error,
    Done,
}

impl State for FunctionoidState {
    fn name(&self) -> &str {
        match self {
            Self::Initial => "Initial",
            Self::Scheduled => "Scheduled",
            Self::Running => "Running",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Done => "Done",
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Warning | Self::Error)
    }

    fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl fmt::Display for FunctionoidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome reported by command code that finished without failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalState {
    Done,
    Warning,
    Error,
}

impl From<TerminalState> for FunctionoidState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Done => FunctionoidState::Done,
            TerminalState::Warning => FunctionoidState::Warning,
            TerminalState::Error => FunctionoidState::Error,
        }
    }
}
