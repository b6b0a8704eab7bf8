//! Mutable status of a resource, shared between the resource and its actions.

use super::functionoid::{ActionId, ActionKind};
use crate::core::{StateChange, StateHistory};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use std::time::{Duration, Instant};

/// An entry of a resource's running-action stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunningAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub path: String,
}

#[derive(Clone, Debug)]
pub(crate) struct StatusData {
    pub state_machine: Option<String>,
    pub state: Option<String>,
    pub enabled: bool,
    pub alive: bool,
    pub running: Vec<RunningAction>,
    pub history: StateHistory,
}

impl StatusData {
    fn new() -> Self {
        Self {
            state_machine: None,
            state: None,
            enabled: true,
            alive: true,
            running: Vec::new(),
            history: StateHistory::new(),
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.state_machine.is_some()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }

    pub fn last_running(&self) -> Option<&RunningAction> {
        self.running.last()
    }

    pub fn is_engaged_in(&self, machine: &str) -> bool {
        self.state_machine.as_deref() == Some(machine)
    }

    pub fn engage(&mut self, machine: &str, state: &str, cause: &str) {
        self.state_machine = Some(machine.to_string());
        self.change_state(Some(state.to_string()), cause);
    }

    pub fn disengage(&mut self, cause: &str) {
        self.state_machine = None;
        self.change_state(None, cause);
    }

    pub fn set_state(&mut self, state: &str, cause: &str) {
        self.change_state(Some(state.to_string()), cause);
    }

    fn change_state(&mut self, to: Option<String>, cause: &str) {
        let change = StateChange {
            machine: self.state_machine.clone(),
            from: self.state.take(),
            to: to.clone(),
            timestamp: Utc::now(),
            cause: cause.to_string(),
        };
        self.state = to;
        self.history.push(change);
    }
}

/// Point-in-time copy of a resource's status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub path: String,
    pub state_machine: Option<String>,
    pub state: Option<String>,
    pub enabled: bool,
    pub alive: bool,
    pub running: Vec<RunningAction>,
    pub history: StateHistory,
}

impl StatusSnapshot {
    pub fn is_engaged(&self) -> bool {
        self.state_machine.is_some()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_empty()
    }
}

/// Lock-protected status plus a condition variable signalled when idle.
#[derive(Debug)]
pub(crate) struct ResourceStatus {
    path: String,
    data: Mutex<StatusData>,
    idle: Condvar,
}

impl ResourceStatus {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: Mutex::new(StatusData::new()),
            idle: Condvar::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn lock(&self) -> MutexGuard<'_, StatusData> {
        self.data.lock()
    }

    pub fn snapshot_of(&self, data: &StatusData) -> StatusSnapshot {
        StatusSnapshot {
            path: self.path.clone(),
            state_machine: data.state_machine.clone(),
            state: data.state.clone(),
            enabled: data.enabled,
            alive: data.alive,
            running: data.running.clone(),
            history: data.history.clone(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let data = self.lock();
        self.snapshot_of(&data)
    }

    pub fn notify_idle(&self) {
        self.idle.notify_all();
    }

    /// Wait until no action is running. Returns whether that happened in time.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut data = self.lock();
        while data.is_running() {
            if self.idle.wait_until(&mut data, deadline).timed_out() {
                return !data.is_running();
            }
        }
        true
    }
}

/// Lock several statuses without risking lock-order inversion.
///
/// Locks are taken in address order; guards are returned in input order.
/// The statuses must be distinct.
pub(crate) fn lock_ordered<'a>(statuses: &[&'a ResourceStatus]) -> Vec<MutexGuard<'a, StatusData>> {
    let mut order: Vec<usize> = (0..statuses.len()).collect();
    order.sort_by_key(|&i| statuses[i] as *const ResourceStatus as usize);

    let mut slots: Vec<Option<MutexGuard<'a, StatusData>>> =
        statuses.iter().map(|_| None).collect();
    for i in order {
        slots[i] = Some(statuses[i].lock());
    }
    slots.into_iter().flatten().collect()
}
