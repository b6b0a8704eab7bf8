//! Single-parameter validation rules.
//!
//! A [`Rule`] is a pure predicate over one typed parameter value that reports
//! a [`Match`]: whether the value passed, plus optional details explaining
//! the outcome.

use super::value::{Parameter, TypedValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Outcome of applying a rule or constraint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub ok: bool,
    pub details: String,
}

impl Match {
    pub fn new(ok: bool, details: impl Into<String>) -> Self {
        Self {
            ok,
            details: details.into(),
        }
    }

    pub fn pass() -> Self {
        Self::new(true, "")
    }

    pub fn fail(details: impl Into<String>) -> Self {
        Self::new(false, details)
    }
}

impl From<bool> for Match {
    fn from(ok: bool) -> Self {
        Self::new(ok, "")
    }
}

/// Pure predicate over a value of type `T`, with a human-readable description.
///
/// Rules are cheap to clone; clones share the same predicate.
///
/// # Example
///
/// ```rust
/// use actionable::core::{Match, Rule};
///
/// let even = Rule::new("x % 2 == 0", |x: &i64| Match::from(x % 2 == 0));
///
/// assert!(even.check(&4).ok);
/// assert!(!even.check(&5).ok);
/// assert_eq!(even.description(), "x % 2 == 0");
/// ```
pub struct Rule<T> {
    description: String,
    predicate: Arc<dyn Fn(&T) -> Match + Send + Sync>,
}

impl<T> Clone for Rule<T> {
    fn clone(&self) -> Self {
        Self {
            description: self.description.clone(),
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> fmt::Debug for Rule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("description", &self.description)
            .finish()
    }
}

impl<T: Parameter> Rule<T> {
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> Match + Send + Sync + 'static,
    {
        Rule {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, value: &T) -> Match {
        (self.predicate)(value)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Apply the rule to an untyped value.
    ///
    /// Returns the value's actual kind as the error when it is not a `T`.
    pub fn check_value(&self, value: &TypedValue) -> Result<Match, ValueKind> {
        match T::extract(value) {
            Some(typed) => Ok(self.check(typed)),
            None => Err(value.kind()),
        }
    }
}

/// Type-erased rule stored in a command's rule map.
#[derive(Clone)]
pub(crate) struct ErasedRule {
    kind: ValueKind,
    description: String,
    check: Arc<dyn Fn(&TypedValue) -> Result<Match, ValueKind> + Send + Sync>,
}

impl ErasedRule {
    pub(crate) fn kind(&self) -> ValueKind {
        self.kind
    }

    pub(crate) fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn check(&self, value: &TypedValue) -> Result<Match, ValueKind> {
        (self.check)(value)
    }
}

impl<T: Parameter> From<Rule<T>> for ErasedRule {
    fn from(rule: Rule<T>) -> Self {
        let description = rule.description.clone();
        ErasedRule {
            kind: T::KIND,
            description,
            check: Arc::new(move |value| rule.check_value(value)),
        }
    }
}

impl fmt::Debug for ErasedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedRule")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_from_bool_has_no_details() {
        assert_eq!(Match::from(true), Match::pass());
        assert_eq!(Match::from(false), Match::new(false, ""));
    }

    #[test]
    fn rule_check_is_deterministic() {
        let rule = Rule::new("x > 0", |x: &i64| Match::from(*x > 0));
        assert_eq!(rule.check(&3), rule.check(&3));
        assert!(!rule.check(&-3).ok);
    }

    #[test]
    fn check_value_reports_kind_mismatch() {
        let rule = Rule::new("x > 0", |x: &i64| Match::from(*x > 0));
        assert_eq!(rule.check_value(&TypedValue::Int(1)), Ok(Match::pass()));
        assert_eq!(
            rule.check_value(&TypedValue::Str("1".into())),
            Err(ValueKind::Str)
        );
    }

    #[test]
    fn erased_rule_keeps_kind_and_description() {
        let rule = Rule::new("!x.empty()", |x: &String| Match::from(!x.is_empty()));
        let erased = ErasedRule::from(rule);

        assert_eq!(erased.kind(), ValueKind::Str);
        assert_eq!(erased.description(), "!x.empty()");
        assert!(!erased.check(&TypedValue::from("")).unwrap().ok);
        assert!(erased.check(&TypedValue::Bool(true)).is_err());
    }

    #[test]
    fn cloned_rules_share_predicate() {
        let rule = Rule::new("x < 10", |x: &u64| Match::from(*x < 10));
        let cloned = rule.clone();
        assert_eq!(rule.check(&11), cloned.check(&11));
        assert_eq!(rule.description(), cloned.description());
    }
}
