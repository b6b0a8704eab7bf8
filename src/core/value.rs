//! Typed parameter values.
//!
//! Every parameter, result and execution detail handled by the framework is a
//! [`TypedValue`]: a closed sum over the supported scalar kinds and vectors of
//! them. The [`Parameter`] trait connects plain Rust types to their variant so
//! that rules and typed lookups stay statically typed.

use super::rule::Rule;
use super::rules;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A parameter value of one of the supported kinds.
///
/// # Example
///
/// ```rust
/// use actionable::core::{TypedValue, ValueKind};
///
/// let value = TypedValue::from(42_i64);
/// assert_eq!(value.kind(), ValueKind::Int);
/// assert_eq!(value.get::<i64>(), Some(&42));
/// assert_eq!(value.to_string(), "42");
///
/// let list = TypedValue::from(vec![1.5_f64, 2.0]);
/// assert_eq!(list.to_string(), "1.5, 2");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    BoolVec(Vec<bool>),
    IntVec(Vec<i64>),
    UIntVec(Vec<u64>),
    FloatVec(Vec<f64>),
    StrVec(Vec<String>),
}

/// Discriminant of a [`TypedValue`], used to declare parameter types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    BoolVec,
    IntVec,
    UIntVec,
    FloatVec,
    StrVec,
}

impl ValueKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Str => "string",
            Self::BoolVec => "vector<bool>",
            Self::IntVec => "vector<int>",
            Self::UIntVec => "vector<uint>",
            Self::FloatVec => "vector<float>",
            Self::StrVec => "vector<string>",
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            Self::BoolVec | Self::IntVec | Self::UIntVec | Self::FloatVec | Self::StrVec
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::UInt(_) => ValueKind::UInt,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::BoolVec(_) => ValueKind::BoolVec,
            Self::IntVec(_) => ValueKind::IntVec,
            Self::UIntVec(_) => ValueKind::UIntVec,
            Self::FloatVec(_) => ValueKind::FloatVec,
            Self::StrVec(_) => ValueKind::StrVec,
        }
    }

    /// Borrow the inner value as `T`, or `None` if the kinds differ.
    pub fn get<T: Parameter>(&self) -> Option<&T> {
        T::extract(self)
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::UInt(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Str(v) => f.write_str(v),
            Self::BoolVec(v) => join(f, v),
            Self::IntVec(v) => join(f, v),
            Self::UIntVec(v) => join(f, v),
            Self::FloatVec(v) => join(f, v),
            Self::StrVec(v) => join(f, v),
        }
    }
}

/// A Rust type that maps onto exactly one [`TypedValue`] variant.
pub trait Parameter: Clone + Send + Sync + 'static {
    const KIND: ValueKind;

    fn extract(value: &TypedValue) -> Option<&Self>;

    fn into_value(self) -> TypedValue;

    /// Rule applied when a parameter is registered without an explicit one.
    fn default_rule() -> Rule<Self>;
}

/// Numeric parameter types, usable with the ordering and finiteness rules.
pub trait Numeric: Parameter + PartialOrd + fmt::Display {
    fn is_finite_value(&self) -> bool;
}

macro_rules! parameter_type {
    ($ty:ty, $scalar:ident, $vector:ident, $scalar_rule:expr, $vector_rule:expr) => {
        impl Parameter for $ty {
            const KIND: ValueKind = ValueKind::$scalar;

            fn extract(value: &TypedValue) -> Option<&Self> {
                match value {
                    TypedValue::$scalar(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> TypedValue {
                TypedValue::$scalar(self)
            }

            fn default_rule() -> Rule<Self> {
                $scalar_rule
            }
        }

        impl Parameter for Vec<$ty> {
            const KIND: ValueKind = ValueKind::$vector;

            fn extract(value: &TypedValue) -> Option<&Self> {
                match value {
                    TypedValue::$vector(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> TypedValue {
                TypedValue::$vector(self)
            }

            fn default_rule() -> Rule<Self> {
                $vector_rule
            }
        }
    };
}

parameter_type!(bool, Bool, BoolVec, rules::none(), rules::none());
parameter_type!(i64, Int, IntVec, rules::finite_number(), rules::finite_vector());
parameter_type!(u64, UInt, UIntVec, rules::finite_number(), rules::finite_vector());
parameter_type!(f64, Float, FloatVec, rules::finite_number(), rules::finite_vector());
parameter_type!(String, Str, StrVec, rules::none(), rules::none());

impl Numeric for i64 {
    fn is_finite_value(&self) -> bool {
        true
    }
}

impl Numeric for u64 {
    fn is_finite_value(&self) -> bool {
        true
    }
}

impl Numeric for f64 {
    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl<T: Parameter> From<T> for TypedValue {
    fn from(value: T) -> Self {
        value.into_value()
    }
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::Str(value.to_string())
    }
}
