//! Core value types shared by every layer.
//!
//! This module contains the pure, lock-free building blocks:
//! - Typed parameter values and parameter sets
//! - Rules and constraints that validate them
//! - Execution states and resource state history
//! - Masking and monitoring capabilities of resource descendants

mod constraint;
mod error;
mod history;
mod monitoring;
mod parameters;
mod rule;
pub mod rules;
mod state;
mod value;

pub use constraint::{Constraint, ConstraintBuilder};
pub use error::{ParameterError, RuleError};
pub use history::{StateChange, StateHistory, DEFAULT_HISTORY_CAPACITY};
pub use monitoring::{Component, MaskableObject, MonitorableObject, MonitoringStatus};
pub use parameters::{ParameterSet, ReadOnlyParameterSet};
pub use rule::{Match, Rule};
pub(crate) use rule::ErasedRule;
pub use state::{FunctionoidState, State, TerminalState};
pub use value::{Numeric, Parameter, TypedValue, ValueKind};
