//! Busy guard spanning a system and its participating children.

use crate::action::{ActionError, BusyGuard, ResourceStatus, Result, RunningAction, StatusData};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Check a system-level action against the system's own status.
///
/// Identical to [`BusyGuard::check`] except that a busy system is reported
/// as [`ActionError::ActionableSystemIsBusy`].
pub(crate) fn check_system(
    status: &Arc<ResourceStatus>,
    data: &StatusData,
    action: &RunningAction,
) -> Result<()> {
    BusyGuard::check(status, data, action, None).map_err(|err| match err {
        ActionError::ActionableObjectIsBusy(message) => {
            ActionError::ActionableSystemIsBusy(message)
        }
        other => other,
    })
}

/// Guards held by a system transition: one on the system, one per enabled child.
///
/// Child guards are released before the system guard.
pub struct SystemBusyGuard {
    children: BTreeMap<String, BusyGuard>,
    system: BusyGuard,
}

impl SystemBusyGuard {
    /// Claim the system and every listed child. All checks must already have passed
    /// with the statuses locked.
    pub(crate) fn claim(
        system: (&Arc<ResourceStatus>, &mut StatusData),
        children: Vec<(&Arc<ResourceStatus>, &mut StatusData)>,
        action: RunningAction,
    ) -> Self {
        let children = children
            .into_iter()
            .map(|(status, data)| {
                let guard = BusyGuard::claim(status, data, action.clone());
                (status.path().to_string(), guard)
            })
            .collect();
        let (status, data) = system;
        Self {
            children,
            system: BusyGuard::claim(status, data, action),
        }
    }

    pub fn system(&self) -> &BusyGuard {
        &self.system
    }

    /// Guard held on the child at `path`, if it is enabled and participating.
    pub fn child(&self, path: &str) -> Option<&BusyGuard> {
        self.children.get(path)
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Register the system state update applied when the system guard is released.
    pub(crate) fn on_release<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut StatusData) + Send + Sync + 'static,
    {
        self.system.on_release(callback);
    }
}

impl fmt::Debug for SystemBusyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemBusyGuard")
            .field("system", &self.system)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .finish()
    }
}
