//! Flattened, read-only projection of a [`GateKeeper`].

use super::GateKeeper;
use crate::core::{MonitoringStatus, TypedValue};
use serde::Serialize;

/// Context reported for entries of the disabled-id set, which has none.
pub const DISABLED_CONTEXT: &str = "none";

/// One `(context, id, value)` entry of a [`GateKeeperView`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViewEntry<T> {
    pub context: String,
    pub id: String,
    pub value: T,
}

/// Snapshot of a gatekeeper's stores, sorted by context priority then id.
///
/// Built once; later changes to the gatekeeper are not reflected.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GateKeeperView {
    parameters: Vec<ViewEntry<TypedValue>>,
    monitoring_settings: Vec<ViewEntry<MonitoringStatus>>,
    masks: Vec<ViewEntry<String>>,
    disabled: Vec<ViewEntry<String>>,
}

impl GateKeeperView {
    /// View over every context, in lexical context order.
    pub fn new(gatekeeper: &GateKeeper) -> Self {
        let mut contexts: Vec<&str> = gatekeeper
            .parameter_contexts()
            .keys()
            .chain(gatekeeper.monitoring_contexts().keys())
            .chain(gatekeeper.mask_contexts().keys())
            .map(String::as_str)
            .collect();
        contexts.sort_unstable();
        contexts.dedup();
        Self::with_contexts(gatekeeper, &contexts)
    }

    /// View restricted to `contexts`, which are listed highest priority first.
    ///
    /// Contexts unknown to the gatekeeper are skipped.
    pub fn with_contexts<S: AsRef<str>>(gatekeeper: &GateKeeper, contexts: &[S]) -> Self {
        let mut view = Self::default();

        for context in contexts.iter().map(AsRef::as_ref) {
            if let Some(entries) = gatekeeper.parameter_contexts().get(context) {
                view.parameters.extend(entries.iter().map(|(id, value)| ViewEntry {
                    context: context.to_string(),
                    id: id.clone(),
                    value: value.clone(),
                }));
            }
            if let Some(entries) = gatekeeper.monitoring_contexts().get(context) {
                view.monitoring_settings
                    .extend(entries.iter().map(|(id, setting)| ViewEntry {
                        context: context.to_string(),
                        id: id.clone(),
                        value: setting.status,
                    }));
            }
            if let Some(ids) = gatekeeper.mask_contexts().get(context) {
                view.masks.extend(ids.iter().map(|id| ViewEntry {
                    context: context.to_string(),
                    id: id.clone(),
                    value: id.clone(),
                }));
            }
        }

        view.disabled = gatekeeper
            .disabled_ids()
            .iter()
            .map(|id| ViewEntry {
                context: DISABLED_CONTEXT.to_string(),
                id: id.clone(),
                value: id.clone(),
            })
            .collect();

        view
    }

    pub fn parameters(&self) -> &[ViewEntry<TypedValue>] {
        &self.parameters
    }

    pub fn monitoring_settings(&self) -> &[ViewEntry<MonitoringStatus>] {
        &self.monitoring_settings
    }

    pub fn masks(&self) -> &[ViewEntry<String>] {
        &self.masks
    }

    pub fn disabled_flags(&self) -> &[ViewEntry<String>] {
        &self.disabled
    }
}
