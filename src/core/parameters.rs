//! Named, typed parameter containers.
//!
//! [`ParameterSet`] is the mutable builder used to assemble inputs.
//! [`ReadOnlyParameterSet`] is its frozen, shareable form: defaults, running
//! parameters, execution details and anything else that crosses a thread
//! boundary is handed around as a read-only set.

use super::error::ParameterError;
use super::value::{Parameter, TypedValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

fn typed<'a, T: Parameter>(name: &str, value: &'a TypedValue) -> Result<&'a T, ParameterError> {
    T::extract(value).ok_or_else(|| ParameterError::TypeMismatch {
        name: name.to_string(),
        expected: T::KIND,
        found: value.kind(),
    })
}

/// Mutable mapping from parameter name to value. Names are unique.
///
/// # Example
///
/// ```rust
/// use actionable::core::ParameterSet;
///
/// let mut params = ParameterSet::new();
/// params.insert("threshold", 15_i64).unwrap();
/// assert!(params.insert("threshold", 20_i64).is_err());
///
/// params.set("threshold", 20_i64);
/// assert_eq!(params.get_as::<i64>("threshold").unwrap(), &20);
/// assert!(params.get("missing").is_err());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    entries: BTreeMap<String, TypedValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add a new parameter. Fails if the name is already present.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<TypedValue>,
    ) -> Result<(), ParameterError> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(ParameterError::AlreadyExists(name));
        }
        self.entries.insert(name, value.into());
        Ok(())
    }

    /// Add or replace a parameter, returning the previous value.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<TypedValue>,
    ) -> Option<TypedValue> {
        self.entries.insert(name.into(), value.into())
    }

    pub fn erase(&mut self, name: &str) -> Option<TypedValue> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Result<&TypedValue, ParameterError> {
        self.entries
            .get(name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    pub fn get_as<T: Parameter>(&self, name: &str) -> Result<&T, ParameterError> {
        typed(name, self.get(name)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into an immutable, shareable set.
    pub fn freeze(self) -> ReadOnlyParameterSet {
        ReadOnlyParameterSet {
            entries: Arc::new(self.entries),
        }
    }
}

impl FromIterator<(String, TypedValue)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, TypedValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Immutable parameter set. Clones share storage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadOnlyParameterSet {
    entries: Arc<BTreeMap<String, TypedValue>>,
}

impl ReadOnlyParameterSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&TypedValue, ParameterError> {
        self.entries
            .get(name)
            .ok_or_else(|| ParameterError::NotFound(name.to_string()))
    }

    pub fn get_as<T: Parameter>(&self, name: &str) -> Result<&T, ParameterError> {
        typed(name, self.get(name)?)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy into a new mutable set.
    pub fn to_mutable(&self) -> ParameterSet {
        ParameterSet {
            entries: self.entries.as_ref().clone(),
        }
    }
}

impl From<ParameterSet> for ReadOnlyParameterSet {
    fn from(set: ParameterSet) -> Self {
        set.freeze()
    }
}

impl Serialize for ReadOnlyParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReadOnlyParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, TypedValue>::deserialize(deserializer)?;
        Ok(Self {
            entries: Arc::new(entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValueKind;

    #[test]
    fn insert_rejects_duplicates() {
        let mut params = ParameterSet::new();
        params.insert("a", 1_i64).unwrap();

        let err = params.insert("a", 2_i64).unwrap_err();
        assert_eq!(err, ParameterError::AlreadyExists("a".into()));
        assert_eq!(params.get("a").unwrap(), &TypedValue::Int(1));
    }

    #[test]
    fn get_missing_is_not_found() {
        let params = ParameterSet::new();
        assert_eq!(
            params.get("nope").unwrap_err(),
            ParameterError::NotFound("nope".into())
        );
    }

    #[test]
    fn get_as_checks_kind() {
        let mut params = ParameterSet::new();
        params.insert("name", "board").unwrap();

        assert_eq!(params.get_as::<String>("name").unwrap(), "board");
        assert_eq!(
            params.get_as::<u64>("name").unwrap_err(),
            ParameterError::TypeMismatch {
                name: "name".into(),
                expected: ValueKind::UInt,
                found: ValueKind::Str,
            }
        );
    }

    #[test]
    fn set_and_erase() {
        let mut params = ParameterSet::new();
        assert!(params.set("x", 1_u64).is_none());
        assert_eq!(params.set("x", 2_u64), Some(TypedValue::UInt(1)));
        assert_eq!(params.erase("x"), Some(TypedValue::UInt(2)));
        assert!(params.is_empty());
    }

    #[test]
    fn freeze_preserves_entries() {
        let mut params = ParameterSet::new();
        params.insert("b", true).unwrap();
        params.insert("a", 0.5_f64).unwrap();

        let frozen = params.freeze();
        assert_eq!(frozen.len(), 2);
        assert_eq!(frozen.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(frozen.get_as::<bool>("b").unwrap(), &true);
    }

    #[test]
    fn read_only_clones_share_storage() {
        let frozen = ParameterSet::from_iter([("x".to_string(), TypedValue::Int(4))]).freeze();
        let cloned = frozen.clone();
        assert!(Arc::ptr_eq(&frozen.entries, &cloned.entries));
    }

    #[test]
    fn to_mutable_does_not_alias() {
        let frozen = ParameterSet::from_iter([("x".to_string(), TypedValue::Int(4))]).freeze();
        let mut copy = frozen.to_mutable();
        copy.set("x", 5_i64);

        assert_eq!(frozen.get_as::<i64>("x").unwrap(), &4);
        assert_eq!(copy.get_as::<i64>("x").unwrap(), &5);
    }

    #[test]
    fn read_only_set_serializes_as_map() {
        let mut params = ParameterSet::new();
        params.insert("x", 42_i64).unwrap();
        let frozen = params.freeze();

        let json = serde_json::to_string(&frozen).unwrap();
        assert_eq!(json, r#"{"x":{"kind":"Int","value":42}}"#);

        let back: ReadOnlyParameterSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frozen);
    }
}
