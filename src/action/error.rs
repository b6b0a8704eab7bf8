//! Errors raised by commands, transitions, state machines and resources.

use super::pool::PoolError;
use crate::core::ParameterError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the action layer.
pub type Result<T> = std::result::Result<T, ActionError>;

/// Errors returned synchronously by action-layer operations.
///
/// Failures of user code while running are not reported here; they are
/// recorded on the action's snapshot instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    // Registration
    #[error("Command parameter registration failed: {0}")]
    CommandParameterRegistrationFailed(String),

    #[error("Command constraint registration failed: {0}")]
    CommandConstraintRegistrationFailed(String),

    #[error("Command '{0}' already exists")]
    CommandAlreadyExists(String),

    #[error("Command '{0}' not found")]
    CommandNotFound(String),

    #[error("Command sequence '{0}' already exists")]
    SequenceAlreadyExists(String),

    #[error("Command sequence '{0}' not found")]
    SequenceNotFound(String),

    #[error("State machine '{0}' already exists")]
    StateMachineAlreadyExists(String),

    #[error("State machine '{0}' not found")]
    StateMachineNotFound(String),

    #[error("State '{0}' already defined")]
    StateAlreadyDefined(String),

    #[error("State '{0}' not defined")]
    StateNotDefined(String),

    #[error("Transition '{0}' already defined")]
    TransitionAlreadyDefined(String),

    #[error("Transition '{0}' not found")]
    TransitionNotFound(String),

    #[error("Child '{0}' already exists")]
    ChildAlreadyExists(String),

    #[error("Child '{0}' not found")]
    ChildNotFound(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Invalid system transition: {0}")]
    InvalidSystemTransition(String),

    // Validation
    #[error("{message}")]
    CommandParameterCheckFailed {
        message: String,
        violations: Vec<ParamRuleViolationList>,
    },

    #[error("{message}")]
    ParameterNotFound {
        message: String,
        missing: Vec<MissingParam>,
    },

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    // Concurrency
    #[error("{0}")]
    ActionableObjectIsBusy(String),

    #[error("{0}")]
    ActionableSystemIsBusy(String),

    #[error("{0}")]
    WrongBusyGuard(String),

    #[error("{0}")]
    ResourceInWrongStateMachine(String),

    #[error("{0}")]
    ResourceInWrongState(String),

    // Lifecycle
    #[error("'{0}' is not attached to a resource")]
    NotAttached(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// One rule or constraint that rejected a parameter set.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamRuleViolation {
    /// Parameters the rule or constraint covers
    pub parameters: Vec<String>,
    /// Description of the rule or constraint
    pub rule: String,
    /// Explanation reported by the check
    pub details: String,
}

impl ParamRuleViolation {
    pub fn new(
        parameters: Vec<String>,
        rule: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            parameters,
            rule: rule.into(),
            details: details.into(),
        }
    }
}

impl fmt::Display for ParamRuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parameters [{}] failed rule/constraint '{}'",
            self.parameters.join(", "),
            self.rule
        )?;
        if !self.details.is_empty() {
            write!(f, ": {}", self.details)?;
        }
        Ok(())
    }
}

/// Violations found for one command of a command list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamRuleViolationList {
    /// Id of the command
    pub command: String,
    /// Position of the command in its list
    pub command_index: usize,
    /// Parameter values the command would have run with
    pub parameters: Vec<(String, String)>,
    pub violations: Vec<ParamRuleViolation>,
}

/// A parameter that no GateKeeper context provided a value for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MissingParam {
    pub namespace: String,
    pub command: String,
    pub parameter: String,
}

impl fmt::Display for MissingParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.command, self.parameter)
    }
}
