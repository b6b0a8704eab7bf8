//! Resource state-change history.
//!
//! Every time a resource's state machine or state changes, a [`StateChange`]
//! is appended to its [`StateHistory`]. A history keeps at most `capacity`
//! changes; the oldest are evicted first. `record` returns a new history,
//! `push` appends in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Changes kept per resource unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;

/// Record of a single state change on a resource.
///
/// `None` for a state means "not engaged in any state machine".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// State machine the resource is engaged in after the change
    pub machine: Option<String>,
    /// The state being left
    pub from: Option<String>,
    /// The state being entered
    pub to: Option<String>,
    /// When the change happened
    pub timestamp: DateTime<Utc>,
    /// What triggered it: "engage", "disengage", "reset" or a transition id
    pub cause: String,
}

/// Bounded, ordered history of state changes.
///
/// # Example
///
/// ```rust
/// use actionable::core::{StateChange, StateHistory};
/// use chrono::Utc;
///
/// let history = StateHistory::new().record(StateChange {
///     machine: Some("run".into()),
///     from: None,
///     to: Some("halted".into()),
///     timestamp: Utc::now(),
///     cause: "engage".into(),
/// });
///
/// assert_eq!(history.get_path(), vec![None, Some("halted")]);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateHistory {
    changes: VecDeque<StateChange>,
    #[serde(default = "StateHistory::default_capacity")]
    capacity: usize,
    /// Number of changes evicted so far
    #[serde(default)]
    evicted: u64,
}

impl StateHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// History keeping the last `capacity` changes (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            changes: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    fn default_capacity() -> usize {
        DEFAULT_HISTORY_CAPACITY
    }

    /// Record a change, returning a new history.
    pub fn record(&self, change: StateChange) -> Self {
        let mut history = self.clone();
        history.push(change);
        history
    }

    /// Append a change, evicting the oldest one when full.
    pub fn push(&mut self, change: StateChange) {
        if self.changes.len() == self.capacity {
            self.changes.pop_front();
            self.evicted += 1;
        }
        self.changes.push_back(change);
    }

    /// States traversed: the first `from`, then every `to`.
    pub fn get_path(&self) -> Vec<Option<&str>> {
        let mut path = Vec::with_capacity(self.changes.len() + 1);
        if let Some(first) = self.changes.front() {
            path.push(first.from.as_deref());
        }
        path.extend(self.changes.iter().map(|change| change.to.as_deref()));
        path
    }

    /// Time between the first and last retained change.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.changes.front()?, self.changes.back()?);
        last.timestamp.signed_duration_since(first.timestamp).to_std().ok()
    }

    pub fn changes(&self) -> impl Iterator<Item = &StateChange> + '_ {
        self.changes.iter()
    }

    pub fn last(&self) -> Option<&StateChange> {
        self.changes.back()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new()
    }
}
