//! Exclusive-control token for a resource.
//!
//! A [`BusyGuard`] is pushed onto a resource's running-action stack when
//! acquired and popped when dropped. Nested actions (commands run by a
//! transition, child transitions run by a system transition) present the
//! outer action's guard to be stacked on top of it instead of being refused.

use super::error::{ActionError, Result};
use super::status::{ResourceStatus, RunningAction, StatusData};
use std::fmt;
use std::sync::Arc;

type ReleaseCallback = Box<dyn FnOnce(&mut StatusData) + Send + Sync>;

/// Proof that an action currently owns a resource.
pub struct BusyGuard {
    status: Arc<ResourceStatus>,
    action: RunningAction,
    on_release: Option<ReleaseCallback>,
}

impl BusyGuard {
    /// Check whether `action` may start on the resource in its current state.
    pub(crate) fn check(
        status: &Arc<ResourceStatus>,
        data: &StatusData,
        action: &RunningAction,
        outer: Option<&BusyGuard>,
    ) -> Result<()> {
        if let Some(outer) = outer {
            if !Arc::ptr_eq(&outer.status, status) {
                return Err(ActionError::WrongBusyGuard(format!(
                    "Incompatible outer BusyGuard, resource='{}'. Inner guard resource is '{}'",
                    outer.status.path(),
                    status.path()
                )));
            }
            match data.last_running() {
                None => {
                    return Err(ActionError::WrongBusyGuard(format!(
                        "Outer BusyGuard used (resource: '{}', action: '{}'), \
                         but resource not busy",
                        status.path(),
                        outer.action.path
                    )))
                }
                Some(last) if last.id != outer.action.id => {
                    return Err(ActionError::WrongBusyGuard(format!(
                        "Outer BusyGuard (resource: '{}', action: '{}') \
                         is not for current action '{}'",
                        status.path(),
                        outer.action.path,
                        last.path
                    )))
                }
                Some(_) => {}
            }
        }

        if data.running.iter().any(|running| running.id == action.id) {
            return Err(ActionError::ActionableObjectIsBusy(format!(
                "Action '{}' is already running on resource '{}'",
                action.path,
                status.path()
            )));
        }

        if !data.alive || (outer.is_none() && data.is_running()) {
            let reason = match data.last_running() {
                Some(last) => {
                    format!("Resource currently busy running functionoid '{}'.", last.path)
                }
                None => "Actions currently disabled on this resource.".to_string(),
            };
            let message = format!(
                "Could not run action '{}' on resource '{}'. {}",
                action.path,
                status.path(),
                reason
            );
            tracing::warn!(resource = %status.path(), action = %action.path, "{}", message);
            return Err(ActionError::ActionableObjectIsBusy(message));
        }

        Ok(())
    }

    /// Push `action` onto the running stack. The caller has already run [`BusyGuard::check`].
    pub(crate) fn claim(
        status: &Arc<ResourceStatus>,
        data: &mut StatusData,
        action: RunningAction,
    ) -> Self {
        match data.last_running() {
            Some(outer) => tracing::info!(
                resource = %status.path(),
                kind = %action.kind,
                action = %action.path,
                within = %outer.path,
                "Starting action"
            ),
            None => tracing::info!(
                resource = %status.path(),
                kind = %action.kind,
                action = %action.path,
                "Starting action"
            ),
        }
        data.running.push(action.clone());
        Self {
            status: Arc::clone(status),
            action,
            on_release: None,
        }
    }

    /// Check and claim in one step under the status lock.
    pub(crate) fn acquire(
        status: &Arc<ResourceStatus>,
        action: RunningAction,
        outer: Option<&BusyGuard>,
    ) -> Result<Self> {
        let mut data = status.lock();
        Self::check(status, &data, &action, outer)?;
        Ok(Self::claim(status, &mut data, action))
    }

    /// Register a state update applied under the status lock on release.
    pub(crate) fn on_release<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut StatusData) + Send + Sync + 'static,
    {
        self.on_release = Some(Box::new(callback));
    }

    pub fn resource_path(&self) -> &str {
        self.status.path()
    }

    pub fn action(&self) -> &RunningAction {
        &self.action
    }
}

impl fmt::Debug for BusyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyGuard")
            .field("resource", &self.status.path())
            .field("action", &self.action)
            .finish()
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut data = self.status.lock();
        let is_top = data
            .last_running()
            .is_some_and(|last| last.id == self.action.id);

        if is_top {
            data.running.pop();
            if let Some(callback) = self.on_release.take() {
                callback(&mut data);
            }
            tracing::info!(
                resource = %self.status.path(),
                kind = %self.action.kind,
                action = %self.action.path,
                state = ?data.state,
                "Finished action"
            );
        } else {
            tracing::error!(
                resource = %self.status.path(),
                action = %self.action.path,
                active = ?data.last_running().map(|a| a.path.as_str()),
                "Unexpected active action when releasing busy guard"
            );
            data.running.retain(|running| running.id != self.action.id);
        }

        if !data.is_running() {
            self.status.notify_idle();
        }
    }
}
