//! Multi-parameter constraints.
//!
//! A [`Constraint`] declares the parameters (and their kinds) it needs and a
//! predicate over exactly that subset. It never sees parameters it did not
//! declare.

use super::error::ParameterError;
use super::parameters::{ParameterSet, ReadOnlyParameterSet};
use super::rule::Match;
use super::value::{Parameter, ValueKind};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type ConstraintCheck = Arc<dyn Fn(&ReadOnlyParameterSet) -> Match + Send + Sync>;

/// Fluent builder for a [`Constraint`].
pub struct ConstraintBuilder {
    description: String,
    required: BTreeMap<String, ValueKind>,
}

impl ConstraintBuilder {
    /// Declare a required parameter of type `T`.
    pub fn require<T: Parameter>(mut self, name: impl Into<String>) -> Self {
        self.required.insert(name.into(), T::KIND);
        self
    }

    /// Finish the constraint with its predicate.
    pub fn verify<F>(self, check: F) -> Constraint
    where
        F: Fn(&ReadOnlyParameterSet) -> Match + Send + Sync + 'static,
    {
        Constraint {
            description: self.description,
            required: self.required,
            check: Arc::new(check),
        }
    }
}

/// Predicate over a declared subset of a command's parameters.
///
/// # Example
///
/// ```rust
/// use actionable::core::{Constraint, Match, ParameterSet};
///
/// let ordered = Constraint::new("low < high")
///     .require::<u64>("low")
///     .require::<u64>("high")
///     .verify(|params| {
///         let low = params.get_as::<u64>("low").unwrap();
///         let high = params.get_as::<u64>("high").unwrap();
///         Match::from(low < high)
///     });
///
/// let mut params = ParameterSet::new();
/// params.insert("low", 1_u64).unwrap();
/// params.insert("high", 5_u64).unwrap();
/// params.insert("unrelated", true).unwrap();
///
/// assert!(ordered.check(&params.freeze()).unwrap().ok);
/// ```
#[derive(Clone)]
pub struct Constraint {
    description: String,
    required: BTreeMap<String, ValueKind>,
    check: ConstraintCheck,
}

impl Constraint {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(description: impl Into<String>) -> ConstraintBuilder {
        ConstraintBuilder {
            description: description.into(),
            required: BTreeMap::new(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn required(&self) -> &BTreeMap<String, ValueKind> {
        &self.required
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.required.keys().cloned().collect()
    }

    /// Evaluate against `params`, restricted to the declared names.
    ///
    /// Fails if a declared parameter is missing or has the wrong kind.
    pub fn check(&self, params: &ReadOnlyParameterSet) -> Result<Match, ParameterError> {
        let mut subset = ParameterSet::new();
        for (name, kind) in &self.required {
            let value = params.get(name)?;
            if value.kind() != *kind {
                return Err(ParameterError::TypeMismatch {
                    name: name.clone(),
                    expected: *kind,
                    found: value.kind(),
                });
            }
            subset.set(name.clone(), value.clone());
        }
        Ok((self.check)(&subset.freeze()))
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("description", &self.description)
            .field("required", &self.required)
            .finish()
    }
}
