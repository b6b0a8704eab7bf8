//! State-machine transitions: ordered command lists run against one resource.

use super::command::{Command, CommandSnapshot};
use super::error::{ActionError, MissingParam, ParamRuleViolationList, Result};
use super::functionoid::{ActionId, ActionKind, ExecMode, Functionoid, Progress, Tracker};
use super::guard::BusyGuard;
use super::pool::{Dispatch, PoolError};
use super::resource::ResourceCore;
use super::sequence::{
    check_owner, find_invalid_parameters, invalid_parameters_error, missing_parameters_error,
    resolve_parameters, CommandSequence, Entry,
};
use super::status::{RunningAction, StatusData};
use crate::core::{FunctionoidState, ParameterSet, TypedValue};
use crate::gatekeeper::GateKeeper;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct TransitionRun {
    progress: Progress,
    total: usize,
    completed: Vec<CommandSnapshot>,
    current: Option<Arc<Command>>,
}

impl AsRef<Progress> for TransitionRun {
    fn as_ref(&self) -> &Progress {
        &self.progress
    }
}

impl AsMut<Progress> for TransitionRun {
    fn as_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }
}

/// Immutable view of a transition's current or last execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionSnapshot {
    pub path: String,
    pub id: String,
    pub resource: String,
    pub state_machine: String,
    pub start_state: String,
    pub end_state: String,
    pub state: FunctionoidState,
    pub running_time: Duration,
    pub progress: f32,
    pub status_msg: String,
    /// Number of commands in the transition
    pub total: usize,
    /// Number of commands that have finished
    pub num_completed: usize,
    /// Snapshots of finished commands, followed by the running one if any
    pub commands: Vec<CommandSnapshot>,
    /// Results of finished commands, in execution order
    pub results: Vec<Option<TypedValue>>,
}

/// Everything an execution needs, detached from the transition object.
struct Plan {
    cause: String,
    end_state: String,
    error_state: String,
    entries: Vec<Entry>,
    params: Vec<ParameterSet>,
    run: Arc<Tracker<TransitionRun>>,
    generation: u64,
}

impl Plan {
    fn execute(self, mut guard: BusyGuard) {
        self.run.lock().progress.start();
        let mut outcome = FunctionoidState::Done;

        for (entry, params) in self.entries.iter().zip(&self.params) {
            self.run.lock().current = Some(Arc::clone(&entry.command));
            let executed = entry.command.exec_with_guard(&guard, params, ExecMode::Sync);
            let snapshot = entry.command.status();

            let mut run = self.run.lock();
            run.current = None;
            let state = match executed {
                Ok(()) => snapshot.state,
                Err(err) => {
                    run.progress.status_msg =
                        format!("Command '{}' could not be run: {}", entry.command.id(), err);
                    FunctionoidState::Error
                }
            };
            run.completed.push(snapshot);

            match state {
                FunctionoidState::Error => {
                    outcome = FunctionoidState::Error;
                    break;
                }
                FunctionoidState::Warning => outcome = FunctionoidState::Warning,
                _ => {}
            }
        }

        let target = if outcome == FunctionoidState::Error {
            self.error_state
        } else {
            self.end_state
        };
        let cause = self.cause;
        guard.on_release(move |data: &mut StatusData| data.set_state(&target, &cause));

        self.run.lock().progress.finish(outcome);
        drop(guard);
        self.run.settle(self.generation);
    }

    /// The pool will never run this plan. The resource keeps its state.
    fn discard(self, reason: &PoolError, guard: BusyGuard) {
        {
            let mut run = self.run.lock();
            run.progress.status_msg = format!("Could not schedule transition: {}", reason);
            run.progress.finish(FunctionoidState::Error);
        }
        drop(guard);
        self.run.settle(self.generation);
        tracing::warn!(transition = %self.cause, error = %reason, "Transition not run");
    }
}

/// Ordered command invocations taking a resource from one state to another.
///
/// Built through [`StateMachine::add_transition`](super::StateMachine::add_transition).
pub struct Transition {
    id: String,
    machine: String,
    start_state: String,
    end_state: String,
    error_state: String,
    core: Arc<ResourceCore>,
    action_id: ActionId,
    entries: RwLock<Vec<Entry>>,
    run: Arc<Tracker<TransitionRun>>,
}

impl Transition {
    pub(crate) fn new(
        id: impl Into<String>,
        machine: impl Into<String>,
        start_state: impl Into<String>,
        end_state: impl Into<String>,
        error_state: impl Into<String>,
        core: Arc<ResourceCore>,
    ) -> Self {
        Self {
            id: id.into(),
            machine: machine.into(),
            start_state: start_state.into(),
            end_state: end_state.into(),
            error_state: error_state.into(),
            core,
            action_id: ActionId::new(),
            entries: RwLock::new(Vec::new()),
            run: Arc::new(Tracker::new(TransitionRun::default())),
        }
    }

    pub fn state_machine_id(&self) -> &str {
        &self.machine
    }

    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    pub fn end_state(&self) -> &str {
        &self.end_state
    }

    pub fn resource_path(&self) -> &str {
        &self.core.path
    }

    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    /// Append a command whose parameters are looked up under `namespace`.
    pub fn add(&self, command: &Arc<Command>, namespace: &str) -> Result<&Self> {
        check_owner(&self.core, command, &self.id)?;
        self.entries.write().push(Entry {
            command: Arc::clone(command),
            namespace: namespace.to_string(),
        });
        Ok(self)
    }

    /// Append a command, using the transition id as namespace.
    pub fn then(&self, command: &Arc<Command>) -> Result<&Self> {
        self.add(command, &self.id)
    }

    /// Append every command of `sequence`, keeping its namespace.
    pub fn add_sequence(&self, sequence: &CommandSequence) -> Result<&Self> {
        if !Arc::ptr_eq(sequence.core(), &self.core) {
            return Err(ActionError::InvalidResource(format!(
                "Cannot add sequence '{}' to transition '{}' of resource '{}'",
                sequence.path(),
                self.id,
                self.core.path
            )));
        }
        self.entries.write().extend(sequence.entries());
        Ok(self)
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.entries.read().iter().map(|e| Arc::clone(&e.command)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn check_for_missing_parameters(&self, gatekeeper: &GateKeeper) -> Vec<MissingParam> {
        self.resolve(gatekeeper).2
    }

    pub fn check_for_invalid_parameters(
        &self,
        gatekeeper: &GateKeeper,
    ) -> Vec<ParamRuleViolationList> {
        let (entries, sets, _) = self.resolve(gatekeeper);
        find_invalid_parameters(&entries, &sets)
    }

    /// Entries with their resolved parameter sets, plus the parameters no context provided.
    pub(crate) fn resolve(
        &self,
        gatekeeper: &GateKeeper,
    ) -> (Vec<Entry>, Vec<ParameterSet>, Vec<MissingParam>) {
        let entries = self.entries.read().clone();
        let (params, missing) = resolve_parameters(&self.core, &entries, gatekeeper);
        (entries, params, missing)
    }

    /// Resolve and validate parameters for every entry.
    pub(crate) fn prepare(
        &self,
        gatekeeper: &GateKeeper,
    ) -> Result<(Vec<Entry>, Vec<ParameterSet>)> {
        let (entries, params, missing) = self.resolve(gatekeeper);
        if !missing.is_empty() {
            return Err(missing_parameters_error(&self.core.path, missing));
        }
        let invalid = find_invalid_parameters(&entries, &params);
        if !invalid.is_empty() {
            return Err(invalid_parameters_error(&self.path(), invalid));
        }
        Ok((entries, params))
    }

    /// Check the resource is engaged in this transition's machine and start state.
    pub(crate) fn check_state(&self, data: &StatusData) -> Result<()> {
        if !data.is_engaged_in(&self.machine) {
            let message = format!(
                "Cannot run transition '{}' on resource '{}': \
                 engaged state machine is {:?}, not '{}'",
                self.id, self.core.path, data.state_machine, self.machine
            );
            tracing::warn!(transition = %self.path(), "{}", message);
            return Err(ActionError::ResourceInWrongStateMachine(message));
        }
        if data.state.as_deref() != Some(self.start_state.as_str()) {
            let message = format!(
                "Cannot run transition '{}' on resource '{}': resource is in state {:?}, not '{}'",
                self.id, self.core.path, data.state, self.start_state
            );
            tracing::warn!(transition = %self.path(), "{}", message);
            return Err(ActionError::ResourceInWrongState(message));
        }
        Ok(())
    }

    pub(crate) fn running_action(&self) -> RunningAction {
        RunningAction {
            id: self.action_id,
            kind: ActionKind::Transition,
            path: self.path(),
        }
    }

    /// Run the transition, moving the resource to the end state (or error state).
    pub fn exec(&self, gatekeeper: &GateKeeper, mode: ExecMode) -> Result<()> {
        self.exec_inner(None, gatekeeper, mode)
    }

    /// Run as a nested action of the one holding `guard`.
    pub fn exec_with_guard(
        &self,
        guard: &BusyGuard,
        gatekeeper: &GateKeeper,
        mode: ExecMode,
    ) -> Result<()> {
        self.exec_inner(Some(guard), gatekeeper, mode)
    }

    fn exec_inner(
        &self,
        outer: Option<&BusyGuard>,
        gatekeeper: &GateKeeper,
        mode: ExecMode,
    ) -> Result<()> {
        let (entries, params) = self.prepare(gatekeeper)?;
        self.launch(outer, entries, params, mode)
    }

    /// Claim the resource and run already resolved and validated entries.
    pub(crate) fn launch(
        &self,
        outer: Option<&BusyGuard>,
        entries: Vec<Entry>,
        params: Vec<ParameterSet>,
        mode: ExecMode,
    ) -> Result<()> {
        let guard = {
            let status = &self.core.status;
            let mut data = status.lock();
            self.check_state(&data)?;
            let action = self.running_action();
            BusyGuard::check(status, &data, &action, outer)?;
            BusyGuard::claim(status, &mut data, action)
        };

        let generation = {
            let mut run = self.run.lock();
            run.total = entries.len();
            run.completed.clear();
            run.current = None;
            run.progress.schedule()
        };

        let plan = Plan {
            cause: self.id.clone(),
            end_state: self.end_state.clone(),
            error_state: self.error_state.clone(),
            entries,
            params,
            run: Arc::clone(&self.run),
            generation,
        };

        match mode {
            ExecMode::Sync => {
                plan.execute(guard);
                Ok(())
            }
            ExecMode::Async => {
                self.core.pool.submit_task(Box::new(move |dispatch| match dispatch {
                    Dispatch::Run => plan.execute(guard),
                    Dispatch::Discard(reason) => plan.discard(&reason, guard),
                }))?;
                Ok(())
            }
        }
    }
}

fn overall_progress(run: &TransitionRun, commands: &[CommandSnapshot]) -> f32 {
    let state = run.progress.state;
    if run.total == 0 {
        return if state == FunctionoidState::Done { 1.0 } else { 0.0 };
    }
    match commands.last() {
        None => 0.0,
        Some(_) if matches!(state, FunctionoidState::Done | FunctionoidState::Warning) => 1.0,
        Some(last) => ((commands.len() - 1) as f32 + last.progress) / run.total as f32,
    }
}

impl Functionoid for Transition {
    type Snapshot = TransitionSnapshot;

    fn id(&self) -> &str {
        &self.id
    }

    fn path(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.core.path, self.machine, self.start_state, self.id
        )
    }

    fn action_id(&self) -> ActionId {
        self.action_id
    }

    fn status(&self) -> TransitionSnapshot {
        let run = self.run.lock();
        let mut commands = run.completed.clone();
        if let Some(current) = &run.current {
            commands.push(current.status());
        }
        let progress = overall_progress(&run, &commands);

        TransitionSnapshot {
            path: self.path(),
            id: self.id.clone(),
            resource: self.core.path.clone(),
            state_machine: self.machine.clone(),
            start_state: self.start_state.clone(),
            end_state: self.end_state.clone(),
            state: run.progress.state,
            running_time: run.progress.running_time(),
            progress,
            status_msg: run.progress.status_msg.clone(),
            total: run.total,
            num_completed: run.completed.len(),
            results: run.completed.iter().map(|c| c.result.clone()).collect(),
            commands,
        }
    }

    fn state(&self) -> FunctionoidState {
        self.run.state()
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.run.wait(timeout)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("path", &self.path())
            .field("end_state", &self.end_state)
            .field("commands", &self.len())
            .finish()
    }
}
