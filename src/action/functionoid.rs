//! Shared execution bookkeeping for every kind of action.
//!
//! Commands, transitions and system transitions all embed the same
//! [`Progress`] record behind a [`Tracker`], and expose it through the
//! [`Functionoid`] trait.

use crate::core::{FunctionoidState, State};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Unique identity of one action object, used to track the running stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What sort of action occupies a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Command,
    Transition,
    SystemTransition,
    StateMachine,
    SystemStateMachine,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Transition => "transition",
            Self::SystemTransition => "system transition",
            Self::StateMachine => "state machine",
            Self::SystemStateMachine => "system state machine",
        })
    }
}

/// Where an action's work runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecMode {
    /// Submit the work to the resource's worker pool and return immediately.
    #[default]
    Async,
    /// Run the work on the calling thread.
    Sync,
}

/// Uniform status-polling contract of executable actions.
pub trait Functionoid {
    /// Immutable status record returned by [`Functionoid::status`].
    type Snapshot;

    fn id(&self) -> &str;

    /// Fully qualified path: owning resource path followed by the id.
    fn path(&self) -> String;

    fn action_id(&self) -> ActionId;

    fn status(&self) -> Self::Snapshot;

    fn state(&self) -> FunctionoidState;

    /// Block until the current execution has settled or `timeout` elapses.
    ///
    /// Returns `false` immediately if the action has never been executed.
    fn wait(&self, timeout: Duration) -> bool;
}

/// State, progress and timing of the current or last execution.
#[derive(Clone, Debug, Default)]
pub(crate) struct Progress {
    pub state: FunctionoidState,
    pub progress: f32,
    pub status_msg: String,
    started: Option<Instant>,
    finished: Option<Instant>,
    settled: bool,
    generation: u64,
}

impl Progress {
    /// Re-arm for a new execution and return its generation.
    pub fn schedule(&mut self) -> u64 {
        self.state = FunctionoidState::Scheduled;
        self.progress = 0.0;
        self.status_msg.clear();
        self.started = None;
        self.finished = None;
        self.settled = false;
        self.generation += 1;
        self.generation
    }

    pub fn start(&mut self) {
        self.state = FunctionoidState::Running;
        self.started = Some(Instant::now());
    }

    pub fn finish(&mut self, state: FunctionoidState) {
        let now = Instant::now();
        self.state = state;
        if matches!(state, FunctionoidState::Done | FunctionoidState::Warning) {
            self.progress = 1.0;
        }
        self.started.get_or_insert(now);
        self.finished = Some(now);
    }

    pub fn running_time(&self) -> Duration {
        match (self.state, self.started, self.finished) {
            (FunctionoidState::Initial | FunctionoidState::Scheduled, _, _) => Duration::ZERO,
            (FunctionoidState::Running, Some(start), _) => start.elapsed(),
            (_, Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

impl AsRef<Progress> for Progress {
    fn as_ref(&self) -> &Progress {
        self
    }
}

impl AsMut<Progress> for Progress {
    fn as_mut(&mut self) -> &mut Progress {
        self
    }
}

/// Lock-protected execution record with a condition variable for `wait`.
#[derive(Debug, Default)]
pub(crate) struct Tracker<T> {
    data: Mutex<T>,
    settled: Condvar,
}

impl<T: AsRef<Progress> + AsMut<Progress>> Tracker<T> {
    pub fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
            settled: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock()
    }

    pub fn state(&self) -> FunctionoidState {
        self.data.lock().as_ref().state
    }

    /// Mark execution `generation` as fully finished and wake waiters.
    ///
    /// Called after the busy guard has been released. A later execution may
    /// already have been scheduled by then; its generation differs and it
    /// stays unsettled.
    pub fn settle(&self, generation: u64) {
        let mut data = self.data.lock();
        let progress = data.as_mut();
        if progress.generation == generation {
            progress.settled = true;
            self.settled.notify_all();
        }
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut data = self.data.lock();
        if data.as_ref().state == FunctionoidState::Initial {
            return false;
        }
        while !data.as_ref().settled {
            if self.settled.wait_until(&mut data, deadline).timed_out() {
                return data.as_ref().settled;
            }
        }
        debug_assert!(data.as_ref().state.is_final());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn running_time_is_zero_before_start() {
        let mut progress = Progress::default();
        assert_eq!(progress.running_time(), Duration::ZERO);
        progress.schedule();
        assert_eq!(progress.running_time(), Duration::ZERO);
    }

    #[test]
    fn finish_freezes_running_time() {
        let mut progress = Progress::default();
        progress.schedule();
        progress.start();
        thread::sleep(Duration::from_millis(5));
        progress.finish(FunctionoidState::Done);

        let first = progress.running_time();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(progress.running_time(), first);
        assert!(first >= Duration::from_millis(5));
        assert_eq!(progress.progress, 1.0);
    }

    #[test]
    fn error_keeps_partial_progress() {
        let mut progress = Progress::default();
        progress.schedule();
        progress.start();
        progress.progress = 0.25;
        progress.finish(FunctionoidState::Error);
        assert_eq!(progress.progress, 0.25);
    }

    #[test]
    fn wait_on_unexecuted_action_returns_false() {
        let tracker = Tracker::new(Progress::default());
        assert!(!tracker.wait(Duration::from_millis(1)));
    }

    #[test]
    fn wait_times_out_while_running() {
        let tracker = Tracker::new(Progress::default());
        tracker.lock().schedule();
        assert!(!tracker.wait(Duration::from_millis(10)));
    }

    #[test]
    fn wait_returns_once_settled() {
        let tracker = Arc::new(Tracker::new(Progress::default()));
        let generation = tracker.lock().schedule();

        let worker = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            worker.lock().finish(FunctionoidState::Done);
            worker.settle(generation);
        });

        assert!(tracker.wait(Duration::from_secs(5)));
        assert_eq!(tracker.state(), FunctionoidState::Done);
        handle.join().unwrap();
    }

    #[test]
    fn stale_settle_leaves_new_execution_pending() {
        let tracker = Tracker::new(Progress::default());
        let first = tracker.lock().schedule();
        tracker.lock().finish(FunctionoidState::Done);

        let second = tracker.lock().schedule();
        tracker.lock().start();
        tracker.settle(first);

        assert_ne!(first, second);
        assert!(!tracker.wait(Duration::from_millis(10)));
        assert_eq!(tracker.state(), FunctionoidState::Running);

        tracker.lock().finish(FunctionoidState::Done);
        tracker.settle(second);
        assert!(tracker.wait(Duration::from_millis(10)));
    }

    #[test]
    fn action_ids_are_unique() {
        assert_ne!(ActionId::new(), ActionId::new());
    }
}
