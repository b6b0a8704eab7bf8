//! Standard rule library.
//!
//! Each constructor returns a [`Rule`] whose description mirrors the
//! condition it enforces (`x > 3`, `len(x) = 4`, ...). These descriptions show
//! up verbatim in parameter-check failures.

use super::error::RuleError;
use super::rule::{Match, Rule};
use super::value::{Numeric, Parameter};
use std::path::PathBuf;

/// Rule that accepts every value.
pub fn none<T: Parameter>() -> Rule<T> {
    Rule::new("none", |_: &T| Match::pass())
}

/// Rejects NaN and infinite values. Integers always pass.
pub fn finite_number<T: Numeric>() -> Rule<T> {
    Rule::new("isFinite(x)", |x: &T| Match::from(x.is_finite_value()))
}

/// Rejects vectors containing any non-finite element.
pub fn finite_vector<T: Numeric>() -> Rule<Vec<T>>
where
    Vec<T>: Parameter,
{
    Rule::new("all(x,isFinite)", |x: &Vec<T>| {
        Match::from(x.iter().all(Numeric::is_finite_value))
    })
}

pub fn greater_than<T: Numeric>(bound: T) -> Rule<T> {
    let description = format!("x > {}", bound);
    Rule::new(description, move |x: &T| Match::from(*x > bound))
}

pub fn lesser_than<T: Numeric>(bound: T) -> Rule<T> {
    let description = format!("x < {}", bound);
    Rule::new(description, move |x: &T| Match::from(*x < bound))
}

fn check_bounds<T: Numeric>(lower: &T, upper: &T) -> Result<(), RuleError> {
    if lower >= upper {
        return Err(RuleError::InvalidArgument(format!(
            "Upper bound ({}) is smaller than lower bound ({})",
            upper, lower
        )));
    }
    Ok(())
}

/// Accepts values strictly between `lower` and `upper`.
///
/// # Example
///
/// ```rust
/// use actionable::core::rules;
///
/// let rule = rules::in_range(0.0_f64, 1.0).unwrap();
/// assert_eq!(rule.description(), "0 < x < 1");
/// assert!(rule.check(&0.5).ok);
/// assert!(!rule.check(&1.0).ok);
///
/// assert!(rules::in_range(5_u64, 5).is_err());
/// ```
pub fn in_range<T: Numeric>(lower: T, upper: T) -> Result<Rule<T>, RuleError> {
    check_bounds(&lower, &upper)?;
    let description = format!("{} < x < {}", lower, upper);
    Ok(Rule::new(description, move |x: &T| {
        Match::from(lower < *x && *x < upper)
    }))
}

/// Accepts values strictly below `lower` or strictly above `upper`.
pub fn out_of_range<T: Numeric>(lower: T, upper: T) -> Result<Rule<T>, RuleError> {
    check_bounds(&lower, &upper)?;
    let description = format!("(x < {} || x > {})", lower, upper);
    Ok(Rule::new(description, move |x: &T| {
        Match::from(*x < lower || upper < *x)
    }))
}

pub fn is_among<I, S>(choices: I) -> Rule<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let choices: Vec<String> = choices.into_iter().map(Into::into).collect();
    let description = format!("x in {{{}}}", choices.join(", "));
    Rule::new(description, move |x: &String| {
        Match::from(choices.iter().any(|c| c == x))
    })
}

pub fn non_empty_string() -> Rule<String> {
    Rule::new("!x.empty()", |x: &String| Match::from(!x.is_empty()))
}

/// Accepts vectors of exactly `size` elements.
pub fn of_size<T>(size: usize) -> Rule<Vec<T>>
where
    Vec<T>: Parameter,
{
    let description = format!("len(x) = {}", size);
    Rule::new(description, move |x: &Vec<T>| Match::from(x.len() == size))
}

/// Accepts strings naming an existing filesystem path.
///
/// A non-empty `prefix` is joined in front of the value; a non-empty
/// `extension` replaces the value's extension.
pub fn path_exists(prefix: impl Into<String>, extension: impl Into<String>) -> Rule<String> {
    let prefix = prefix.into();
    let extension = extension.into();
    Rule::new("exists(x)", move |x: &String| {
        if x.is_empty() {
            return Match::fail("Empty path");
        }
        let mut path = if prefix.is_empty() {
            PathBuf::from(x)
        } else {
            PathBuf::from(&prefix).join(x)
        };
        if !extension.is_empty() {
            path.set_extension(&extension);
        }
        Match::from(path.exists())
    })
}

/// Inverts `rule`.
pub fn not<T: Parameter>(rule: Rule<T>) -> Rule<T> {
    let description = format!("!({})", rule.description());
    Rule::new(description, move |x: &T| {
        let inner = rule.check(x);
        Match::new(!inner.ok, inner.details)
    })
}

pub fn and<T: Parameter>(first: Rule<T>, second: Rule<T>) -> Rule<T> {
    let description = format!("({} && {})", first.description(), second.description());
    Rule::new(description, move |x: &T| {
        let lhs = first.check(x);
        if !lhs.ok {
            return lhs;
        }
        second.check(x)
    })
}

pub fn or<T: Parameter>(first: Rule<T>, second: Rule<T>) -> Rule<T> {
    let description = format!("({} || {})", first.description(), second.description());
    Rule::new(description, move |x: &T| {
        let lhs = first.check(x);
        if lhs.ok {
            return lhs;
        }
        let rhs = second.check(x);
        if rhs.ok {
            return rhs;
        }
        let details = [lhs.details, rhs.details]
            .into_iter()
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        Match::fail(details)
    })
}
