//! Errors raised by parameter sets and rule construction.

use super::value::ValueKind;
use thiserror::Error;

/// Errors from looking up or inserting parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{0}' not found")]
    NotFound(String),

    #[error("Parameter '{0}' already exists")]
    AlreadyExists(String),

    #[error("Parameter '{name}' is of type {found}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Errors from building a rule with inconsistent arguments.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("Invalid rule argument: {0}")]
    InvalidArgument(String),
}
