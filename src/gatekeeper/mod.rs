//! Layered configuration store.
//!
//! A [`GateKeeper`] holds four independent stores: parameters, monitoring
//! settings, masks and disabled ids. The first three are keyed by *context*,
//! an arbitrary name such as a resource path or a role. Lookups take a list
//! of contexts in priority order and return the first hit. A miss is a normal
//! outcome, never an error.

use crate::core::{MonitoringStatus, ParameterSet, TypedValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

mod view;

pub use view::{GateKeeperView, ViewEntry, DISABLED_CONTEXT};

/// The four stores of a [`GateKeeper`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Store {
    Parameters,
    MonitoringSettings,
    Masks,
    DisabledIds,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parameters => "parameters",
            Self::MonitoringSettings => "monitoring settings",
            Self::Masks => "masks",
            Self::DisabledIds => "disabled ids",
        };
        f.write_str(name)
    }
}

/// Errors raised while populating a [`GateKeeper`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateKeeperError {
    #[error("Context With Id '{context}' already exists in {store}")]
    ContextWithIdAlreadyExists { store: Store, context: String },
}

/// Monitoring status to apply to one metric or monitorable object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringSetting {
    pub id: String,
    pub status: MonitoringStatus,
}

impl MonitoringSetting {
    pub fn new(id: impl Into<String>, status: MonitoringStatus) -> Self {
        Self {
            id: id.into(),
            status,
        }
    }
}

/// Layered, priority-ordered configuration store.
///
/// # Example
///
/// ```rust
/// use actionable::core::{ParameterSet, TypedValue};
/// use actionable::gatekeeper::GateKeeper;
///
/// let mut general = ParameterSet::new();
/// general.insert("threshold", 10_u64).unwrap();
///
/// let mut board = ParameterSet::new();
/// board.insert("reset.threshold", 20_u64).unwrap();
///
/// let mut gk = GateKeeper::new();
/// gk.add_parameters("general", general).unwrap();
/// gk.add_parameters("crate.board1", board).unwrap();
///
/// let contexts = ["crate.board1", "general"];
/// assert_eq!(
///     gk.get_parameter("setup", "reset", "threshold", &contexts),
///     Some(&TypedValue::UInt(20))
/// );
/// assert_eq!(
///     gk.get_parameter("setup", "configure", "threshold", &contexts),
///     Some(&TypedValue::UInt(10))
/// );
/// assert!(gk.get_parameter("setup", "reset", "missing", &contexts).is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateKeeper {
    parameters: BTreeMap<String, BTreeMap<String, TypedValue>>,
    monitoring_settings: BTreeMap<String, BTreeMap<String, MonitoringSetting>>,
    masks: BTreeMap<String, BTreeSet<String>>,
    disabled: BTreeSet<String>,
    updated_at: Option<DateTime<Utc>>,
}

fn ensure_absent<V>(
    store: Store,
    contexts: &BTreeMap<String, V>,
    context: &str,
) -> Result<(), GateKeeperError> {
    if contexts.contains_key(context) {
        return Err(GateKeeperError::ContextWithIdAlreadyExists {
            store,
            context: context.to_string(),
        });
    }
    Ok(())
}

impl GateKeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context of parameter values.
    pub fn add_parameters(
        &mut self,
        context: impl Into<String>,
        parameters: ParameterSet,
    ) -> Result<(), GateKeeperError> {
        let context = context.into();
        ensure_absent(Store::Parameters, &self.parameters, &context)?;
        let entries = parameters
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        self.parameters.insert(context, entries);
        self.touch();
        Ok(())
    }

    /// Register a context of monitoring settings, keyed by setting id.
    pub fn add_monitoring_settings<I>(
        &mut self,
        context: impl Into<String>,
        settings: I,
    ) -> Result<(), GateKeeperError>
    where
        I: IntoIterator<Item = MonitoringSetting>,
    {
        let context = context.into();
        ensure_absent(Store::MonitoringSettings, &self.monitoring_settings, &context)?;
        let entries = settings
            .into_iter()
            .map(|setting| (setting.id.clone(), setting))
            .collect();
        self.monitoring_settings.insert(context, entries);
        self.touch();
        Ok(())
    }

    /// Register a context of masked object ids.
    pub fn add_masks<I, S>(
        &mut self,
        context: impl Into<String>,
        ids: I,
    ) -> Result<(), GateKeeperError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let context = context.into();
        ensure_absent(Store::Masks, &self.masks, &context)?;
        self.masks
            .insert(context, ids.into_iter().map(Into::into).collect());
        self.touch();
        Ok(())
    }

    pub fn add_to_disabled_set(&mut self, id: impl Into<String>) -> Result<(), GateKeeperError> {
        let id = id.into();
        if self.disabled.contains(&id) {
            return Err(GateKeeperError::ContextWithIdAlreadyExists {
                store: Store::DisabledIds,
                context: id,
            });
        }
        self.disabled.insert(id);
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    /// Value of `item` in a single context.
    pub fn get(&self, item: &str, context: &str) -> Option<&TypedValue> {
        self.parameters.get(context)?.get(item)
    }

    /// Resolve a command parameter across `contexts`, highest priority first.
    ///
    /// Within each context the keys `namespace.command.item`, `command.item`
    /// and `item` are tried in that order.
    pub fn get_parameter<S: AsRef<str>>(
        &self,
        namespace: &str,
        command: &str,
        item: &str,
        contexts: &[S],
    ) -> Option<&TypedValue> {
        let command_key = format!("{}.{}", command, item);
        let namespace_key = format!("{}.{}", namespace, command_key);
        contexts.iter().find_map(|context| {
            let context = context.as_ref();
            self.get(&namespace_key, context)
                .or_else(|| self.get(&command_key, context))
                .or_else(|| self.get(item, context))
        })
    }

    /// Resolve a monitoring setting for `metric` while in `state`.
    ///
    /// Within each context `state.metric` is tried before `metric`.
    pub fn get_monitoring_setting<S: AsRef<str>>(
        &self,
        state: &str,
        metric: &str,
        contexts: &[S],
    ) -> Option<&MonitoringSetting> {
        let state_key = format!("{}.{}", state, metric);
        contexts.iter().find_map(|context| {
            let settings = self.monitoring_settings.get(context.as_ref())?;
            settings.get(&state_key).or_else(|| settings.get(metric))
        })
    }

    /// True if any of `contexts` masks `id`.
    pub fn get_mask<S: AsRef<str>>(&self, id: &str, contexts: &[S]) -> bool {
        contexts.iter().any(|context| {
            self.masks
                .get(context.as_ref())
                .is_some_and(|ids| ids.contains(id))
        })
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        !self.disabled.contains(id)
    }

    /// Time of the most recent successful mutation.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub(crate) fn parameter_contexts(&self) -> &BTreeMap<String, BTreeMap<String, TypedValue>> {
        &self.parameters
    }

    pub(crate) fn monitoring_contexts(
        &self,
    ) -> &BTreeMap<String, BTreeMap<String, MonitoringSetting>> {
        &self.monitoring_settings
    }

    pub(crate) fn mask_contexts(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.masks
    }

    pub(crate) fn disabled_ids(&self) -> &BTreeSet<String> {
        &self.disabled
    }
}

impl fmt::Display for GateKeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let delimiter = "-".repeat(100);
        writeln!(f, "{}", delimiter)?;
        for id in &self.disabled {
            writeln!(f, "DISABLE : {}", id)?;
        }

        for (context, entries) in &self.parameters {
            writeln!(f, "{}", delimiter)?;
            writeln!(f, "CONTEXT (parameters) : {}", context)?;
            writeln!(f, "{}", delimiter)?;
            for (name, value) in entries {
                writeln!(f, " {} : {}", name, value)?;
            }
            writeln!(f, "{}", delimiter)?;
        }

        for (context, entries) in &self.monitoring_settings {
            writeln!(f, "{}", delimiter)?;
            writeln!(f, "CONTEXT (monitoring settings) : {}", context)?;
            writeln!(f, "{}", delimiter)?;
            for (name, setting) in entries {
                writeln!(f, " {} : {}", name, setting.status)?;
            }
            writeln!(f, "{}", delimiter)?;
        }

        for (context, ids) in &self.masks {
            writeln!(f, "{}", delimiter)?;
            writeln!(f, "CONTEXT (masks) : {}", context)?;
            writeln!(f, "{}", delimiter)?;
            for id in ids {
                writeln!(f, " {}", id)?;
            }
            writeln!(f, "{}", delimiter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, i64)]) -> ParameterSet {
        let mut set = ParameterSet::new();
        for (name, value) in entries {
            set.insert(*name, *value).unwrap();
        }
        set
    }

    fn populated() -> GateKeeper {
        let mut gk = GateKeeper::new();
        gk.add_parameters("common", params(&[("x", 1), ("cmd.x", 2)]))
            .unwrap();
        gk.add_parameters("board", params(&[("seq.cmd.x", 3), ("y", 4)]))
            .unwrap();
        gk
    }

    #[test]
    fn get_in_missing_context_is_absent() {
        let gk = populated();
        assert!(gk.get("x", "nowhere").is_none());
        assert!(gk.get("nothing", "common").is_none());
        assert_eq!(gk.get("x", "common"), Some(&TypedValue::Int(1)));
    }

    #[test]
    fn namespace_key_wins_within_a_context() {
        let gk = populated();
        let value = gk.get_parameter("seq", "cmd", "x", &["board", "common"]);
        assert_eq!(value, Some(&TypedValue::Int(3)));
    }

    #[test]
    fn higher_priority_context_wins_over_more_specific_key() {
        let gk = populated();
        // board's seq.cmd.x is never reached: common resolves cmd.x first
        let value = gk.get_parameter("seq", "cmd", "x", &["common", "board"]);
        assert_eq!(value, Some(&TypedValue::Int(2)));
    }

    #[test]
    fn falls_back_to_lower_priority_context() {
        let gk = populated();
        let value = gk.get_parameter("other", "reset", "y", &["common", "board"]);
        assert_eq!(value, Some(&TypedValue::Int(4)));
        assert!(gk
            .get_parameter("other", "reset", "z", &["common", "board"])
            .is_none());
    }

    #[test]
    fn duplicate_contexts_are_rejected() {
        let mut gk = populated();
        let err = gk.add_parameters("common", ParameterSet::new()).unwrap_err();
        assert_eq!(
            err,
            GateKeeperError::ContextWithIdAlreadyExists {
                store: Store::Parameters,
                context: "common".into(),
            }
        );
        assert_eq!(err.to_string(), "Context With Id 'common' already exists in parameters");

        gk.add_masks("common", ["a"]).unwrap();
        assert!(gk.add_masks("common", ["b"]).is_err());
        assert!(gk.get_mask("a", &["common"]));
        assert!(!gk.get_mask("b", &["common"]));
    }

    #[test]
    fn monitoring_settings_prefer_state_key() {
        let mut gk = GateKeeper::new();
        gk.add_monitoring_settings(
            "board",
            [
                MonitoringSetting::new("temp", MonitoringStatus::NonCritical),
                MonitoringSetting::new("running.temp", MonitoringStatus::Disabled),
            ],
        )
        .unwrap();

        let running = gk.get_monitoring_setting("running", "temp", &["board"]).unwrap();
        assert_eq!(running.status, MonitoringStatus::Disabled);

        let halted = gk.get_monitoring_setting("halted", "temp", &["board"]).unwrap();
        assert_eq!(halted.status, MonitoringStatus::NonCritical);

        assert!(gk.get_monitoring_setting("halted", "power", &["board"]).is_none());
        assert!(gk
            .add_monitoring_settings("board", Vec::new())
            .is_err());
    }

    #[test]
    fn masks_match_any_context() {
        let mut gk = GateKeeper::new();
        gk.add_masks("a", ["link0"]).unwrap();
        gk.add_masks("b", ["link1"]).unwrap();

        assert!(gk.get_mask("link1", &["a", "b"]));
        assert!(!gk.get_mask("link1", &["a"]));
        assert!(!gk.get_mask("link0", &Vec::<String>::new()));
    }

    #[test]
    fn disabled_set_controls_enabled_flag() {
        let mut gk = GateKeeper::new();
        assert!(gk.is_enabled("sys.board"));
        gk.add_to_disabled_set("sys.board").unwrap();
        assert!(!gk.is_enabled("sys.board"));
        assert!(gk.add_to_disabled_set("sys.board").is_err());
    }

    #[test]
    fn mutations_update_timestamp() {
        let mut gk = GateKeeper::new();
        assert!(gk.last_updated().is_none());
        gk.add_to_disabled_set("x").unwrap();
        let first = gk.last_updated().unwrap();
        gk.add_masks("ctx", ["m"]).unwrap();
        assert!(gk.last_updated().unwrap() >= first);
    }

    #[test]
    fn display_lists_every_store() {
        let mut gk = populated();
        gk.add_to_disabled_set("sys.off").unwrap();
        gk.add_masks("board", ["link0"]).unwrap();

        let dump = gk.to_string();
        assert!(dump.contains("DISABLE : sys.off"));
        assert!(dump.contains("CONTEXT (parameters) : board"));
        assert!(dump.contains(" seq.cmd.x : 3"));
        assert!(dump.contains("CONTEXT (masks) : board"));
    }

    #[test]
    fn gatekeeper_round_trips_through_json() {
        let gk = populated();
        let json = serde_json::to_string(&gk).unwrap();
        let back: GateKeeper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gk);
    }
}
