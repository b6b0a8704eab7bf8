//! System transitions: steps of child transitions run across a system.
//!
//! Steps run one after the other. Within a step the transitions of all
//! enabled children run concurrently, each on its own scoped thread, nested
//! under the child guard held by the system transition. Disabled children
//! are skipped and appear as `None` in the snapshot.

use super::guard::{check_system, SystemBusyGuard};
use super::machine::Participants;
use super::resource::SystemCore;
use crate::action::{
    find_invalid_parameters, lock_ordered, panic_message, ActionError, ActionId, ActionKind,
    BusyGuard, Dispatch, Entry, ExecMode, ExecutionFailure, Functionoid, MissingParam,
    ParamRuleViolationList, PoolError, Progress, ResourceStatus, Result, RunningAction, StatusData,
    Tracker, Transition, TransitionSnapshot,
};
use crate::core::{FunctionoidState, ParameterSet};
use crate::gatekeeper::GateKeeper;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Callback turning a finished snapshot into a human-readable message.
pub type SnapshotAnalyser = Arc<
    dyn Fn(&SystemTransitionSnapshot) -> std::result::Result<String, ExecutionFailure>
        + Send
        + Sync,
>;

/// One step's child snapshots; `None` for disabled children.
pub type StepSnapshot = Vec<Option<TransitionSnapshot>>;

/// Immutable view of a system transition's current or last execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemTransitionSnapshot {
    pub path: String,
    pub id: String,
    pub system: String,
    pub state_machine: String,
    pub start_state: String,
    pub end_state: String,
    pub state: FunctionoidState,
    pub running_time: Duration,
    pub progress: f32,
    /// Message produced by the warning or error analyser
    pub message: String,
    pub total_steps: usize,
    pub num_completed_steps: usize,
    /// Paths of the children that were enabled when execution started
    pub enabled_children: BTreeSet<String>,
    /// Completed steps, followed by the running step if any
    pub steps: Vec<StepSnapshot>,
}

#[derive(Debug, Default)]
struct SystemRun {
    progress: Progress,
    total: usize,
    enabled: BTreeSet<String>,
    completed: Vec<StepSnapshot>,
    current: Option<Vec<Arc<Transition>>>,
}

impl AsRef<Progress> for SystemRun {
    fn as_ref(&self) -> &Progress {
        &self.progress
    }
}

impl AsMut<Progress> for SystemRun {
    fn as_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }
}

/// Identity fields copied into every snapshot.
#[derive(Clone, Debug)]
struct Header {
    path: String,
    id: String,
    system: String,
    state_machine: String,
    start_state: String,
    end_state: String,
}

impl Header {
    fn snapshot(&self, run: &SystemRun, state: FunctionoidState) -> SystemTransitionSnapshot {
        let mut steps = run.completed.clone();
        if state == FunctionoidState::Running {
            if let Some(current) = &run.current {
                steps.push(step_snapshot(current, &run.enabled));
            }
        }

        SystemTransitionSnapshot {
            path: self.path.clone(),
            id: self.id.clone(),
            system: self.system.clone(),
            state_machine: self.state_machine.clone(),
            start_state: self.start_state.clone(),
            end_state: self.end_state.clone(),
            state,
            running_time: run.progress.running_time(),
            progress: overall_progress(state, run.total, &steps),
            message: run.progress.status_msg.clone(),
            total_steps: run.total,
            num_completed_steps: run.completed.len(),
            enabled_children: run.enabled.clone(),
            steps,
        }
    }
}

fn step_snapshot(step: &[Arc<Transition>], enabled: &BTreeSet<String>) -> StepSnapshot {
    step.iter()
        .map(|t| enabled.contains(t.resource_path()).then(|| t.status()))
        .collect()
}

/// Completed steps count fully; a running or failed step counts as far as its slowest child.
fn overall_progress(state: FunctionoidState, total: usize, steps: &[StepSnapshot]) -> f32 {
    if total == 0 {
        return if state == FunctionoidState::Done { 1.0 } else { 0.0 };
    }
    let Some(last) = steps.last() else { return 0.0 };
    match state {
        FunctionoidState::Running | FunctionoidState::Error => {
            let slowest = last
                .iter()
                .flatten()
                .map(|snapshot| snapshot.progress)
                .fold(1.0_f32, f32::min);
            ((steps.len() - 1) as f32 + slowest) / total as f32
        }
        _ => 1.0,
    }
}

/// A child transition with its parameters resolved; `prepared` is `None` for disabled children.
struct Slot {
    transition: Arc<Transition>,
    prepared: Option<(Vec<Entry>, Vec<ParameterSet>)>,
}

/// Everything an execution needs, detached from the transition object.
struct Plan {
    header: Header,
    error_state: String,
    slots: Vec<Vec<Slot>>,
    run: Arc<Tracker<SystemRun>>,
    warning_analyser: Option<SnapshotAnalyser>,
    error_analyser: Option<SnapshotAnalyser>,
    generation: u64,
}

impl Plan {
    fn execute(self, mut guard: SystemBusyGuard) {
        let enabled = {
            let mut run = self.run.lock();
            run.progress.start();
            run.enabled.clone()
        };
        let mut outcome = FunctionoidState::Done;

        for step in self.slots {
            let transitions: Vec<Arc<Transition>> =
                step.iter().map(|s| Arc::clone(&s.transition)).collect();
            self.run.lock().current = Some(transitions.clone());

            let guard_ref = &guard;
            let states: Vec<FunctionoidState> = thread::scope(|scope| {
                let handles: Vec<_> = step
                    .into_iter()
                    .filter_map(|slot| {
                        let (entries, params) = slot.prepared?;
                        let transition = slot.transition;
                        Some(scope.spawn(move || {
                            let child_guard = guard_ref.child(transition.resource_path());
                            run_child(&transition, child_guard, entries, params)
                        }))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap_or(FunctionoidState::Error))
                    .collect()
            });

            let snapshot = step_snapshot(&transitions, &enabled);
            let mut run = self.run.lock();
            run.current = None;
            run.completed.push(snapshot);

            if states.contains(&FunctionoidState::Error) {
                outcome = FunctionoidState::Error;
                break;
            }
            if states.contains(&FunctionoidState::Warning) {
                outcome = FunctionoidState::Warning;
            }
        }

        let analyser = match outcome {
            FunctionoidState::Error => self.error_analyser.map(|a| (a, "error")),
            FunctionoidState::Warning => self.warning_analyser.map(|a| (a, "warning")),
            _ => None,
        };
        if let Some((analyser, label)) = analyser {
            let snapshot = self.header.snapshot(&self.run.lock(), outcome);
            let message = run_analyser(&analyser, &snapshot, label);
            self.run.lock().progress.status_msg = message;
        }

        let target = if outcome == FunctionoidState::Error {
            self.error_state
        } else {
            self.header.end_state.clone()
        };
        let cause = self.header.id.clone();
        guard.on_release(move |data: &mut StatusData| data.set_state(&target, &cause));

        self.run.lock().progress.finish(outcome);
        drop(guard);
        tracing::info!(
            system_transition = %self.header.path,
            state = %outcome,
            "System transition finished"
        );
        self.run.settle(self.generation);
    }

    /// The pool will never run this plan. The system keeps its state.
    fn discard(self, reason: &PoolError, guard: SystemBusyGuard) {
        {
            let mut run = self.run.lock();
            run.progress.status_msg = format!("Could not schedule system transition: {}", reason);
            run.progress.finish(FunctionoidState::Error);
        }
        drop(guard);
        self.run.settle(self.generation);
        tracing::warn!(
            system_transition = %self.header.path,
            error = %reason,
            "System transition not run"
        );
    }
}

fn run_child(
    transition: &Transition,
    guard: Option<&BusyGuard>,
    entries: Vec<Entry>,
    params: Vec<ParameterSet>,
) -> FunctionoidState {
    match transition.launch(guard, entries, params, ExecMode::Sync) {
        Ok(()) => transition.state(),
        Err(err) => {
            tracing::warn!(
                transition = %transition.path(),
                error = %err,
                "Child transition could not run"
            );
            FunctionoidState::Error
        }
    }
}

fn run_analyser(
    analyser: &SnapshotAnalyser,
    snapshot: &SystemTransitionSnapshot,
    label: &str,
) -> String {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyser(snapshot)))
        .unwrap_or_else(|payload| {
            Err(ExecutionFailure::new("panic", panic_message(payload.as_ref())))
        });
    match outcome {
        Ok(message) => message,
        Err(failure) => format!(
            "Exception of type '{}' thrown by {} analyser function. Details: {}",
            failure.kind(),
            label,
            failure.message()
        ),
    }
}

/// Steps of child transitions taking a system from one state to another.
///
/// Built through [`SystemStateMachine::add_transition`](super::SystemStateMachine::add_transition).
pub struct SystemTransition {
    header: Header,
    error_state: String,
    system: Arc<SystemCore>,
    participants: Arc<RwLock<Participants>>,
    action_id: ActionId,
    steps: RwLock<Vec<Vec<Arc<Transition>>>>,
    run: Arc<Tracker<SystemRun>>,
    warning_analyser: RwLock<Option<SnapshotAnalyser>>,
    error_analyser: RwLock<Option<SnapshotAnalyser>>,
}

impl SystemTransition {
    pub(crate) fn new(
        id: impl Into<String>,
        machine: impl Into<String>,
        start_state: impl Into<String>,
        end_state: impl Into<String>,
        error_state: impl Into<String>,
        system: Arc<SystemCore>,
        participants: Arc<RwLock<Participants>>,
    ) -> Self {
        let id = id.into();
        let machine = machine.into();
        let start_state = start_state.into();
        let header = Header {
            path: format!("{}.{}.{}.{}", system.resource.path, machine, start_state, id),
            id,
            system: system.resource.path.clone(),
            state_machine: machine,
            start_state,
            end_state: end_state.into(),
        };

        Self {
            header,
            error_state: error_state.into(),
            system,
            participants,
            action_id: ActionId::new(),
            steps: RwLock::new(Vec::new()),
            run: Arc::new(Tracker::new(SystemRun::default())),
            warning_analyser: RwLock::new(None),
            error_analyser: RwLock::new(None),
        }
    }

    pub fn state_machine_id(&self) -> &str {
        &self.header.state_machine
    }

    pub fn start_state(&self) -> &str {
        &self.header.start_state
    }

    pub fn end_state(&self) -> &str {
        &self.header.end_state
    }

    pub fn steps(&self) -> Vec<Vec<Arc<Transition>>> {
        self.steps.read().clone()
    }

    pub fn len(&self) -> usize {
        self.steps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.read().is_empty()
    }

    /// Append a step of child transitions that run concurrently.
    ///
    /// Each transition must belong to a different child of this system, use
    /// the same child state machine as every other transition of this system
    /// state machine, and start where the child's previous transition ended.
    pub fn add_step(&self, transitions: Vec<Arc<Transition>>) -> Result<&Self> {
        if transitions.is_empty() {
            return Err(self.invalid(format!(
                "Cannot add empty step to system transition '{}'",
                self.header.path
            )));
        }

        let mut steps = self.steps.write();
        let mut participants = self.participants.write();
        let mut additions = Vec::with_capacity(transitions.len());

        for (index, transition) in transitions.iter().enumerate() {
            let child = self.system.child_with_core(transition.core()).ok_or_else(|| {
                self.invalid(format!(
                    "Cannot add transition on non-child object '{}' to system state machine '{}'",
                    transition.resource_path(),
                    self.header.state_machine
                ))
            })?;

            if transitions[..index]
                .iter()
                .any(|other| Arc::ptr_eq(other.core(), transition.core()))
            {
                return Err(self.invalid(format!(
                    "Multiple transitions requested for same child object '{}' \
                     in system-level transition",
                    child.path()
                )));
            }

            if let Some(machine) = participants.get(child.path()) {
                if machine.id() != transition.state_machine_id() {
                    return Err(self.invalid(format!(
                        "Object '{}', transition '{}' is inconsistent with transitions \
                         already in system-level state machine '{}'",
                        child.path(),
                        transition.id(),
                        self.header.state_machine
                    )));
                }
            }

            let previous = steps
                .iter()
                .flatten()
                .filter(|other| Arc::ptr_eq(other.core(), transition.core()))
                .last();
            if let Some(previous) = previous {
                if previous.end_state() != transition.start_state() {
                    return Err(self.invalid(format!(
                        "Object '{}', transition '{}' (start state: '{}') is incompatible \
                         with last transition in same step, '{}' (end state: '{}')",
                        child.path(),
                        transition.id(),
                        transition.start_state(),
                        previous.id(),
                        previous.end_state()
                    )));
                }
            }

            let machine = child.state_machine(transition.state_machine_id())?;
            additions.push((child.path().to_string(), machine));
        }

        for (path, machine) in additions {
            participants.entry(path).or_insert(machine);
        }
        steps.push(transitions);
        Ok(self)
    }

    fn invalid(&self, message: String) -> ActionError {
        tracing::warn!(system_transition = %self.header.path, "{}", message);
        ActionError::InvalidSystemTransition(message)
    }

    pub fn register_warning_analyser<F>(&self, analyser: F)
    where
        F: Fn(&SystemTransitionSnapshot) -> std::result::Result<String, ExecutionFailure>
            + Send
            + Sync
            + 'static,
    {
        *self.warning_analyser.write() = Some(Arc::new(analyser));
    }

    pub fn register_error_analyser<F>(&self, analyser: F)
    where
        F: Fn(&SystemTransitionSnapshot) -> std::result::Result<String, ExecutionFailure>
            + Send
            + Sync
            + 'static,
    {
        *self.error_analyser.write() = Some(Arc::new(analyser));
    }

    /// First transition of each child, keyed by child path.
    fn first_transitions(steps: &[Vec<Arc<Transition>>]) -> BTreeMap<String, Arc<Transition>> {
        let mut first = BTreeMap::new();
        for transition in steps.iter().flatten() {
            first
                .entry(transition.resource_path().to_string())
                .or_insert_with(|| Arc::clone(transition));
        }
        first
    }

    fn enabled_children(&self) -> BTreeSet<String> {
        let steps = self.steps.read();
        Self::first_transitions(&steps)
            .into_iter()
            .filter(|(_, t)| t.core().status.lock().enabled)
            .map(|(path, _)| path)
            .collect()
    }

    /// Missing parameters of enabled children, keyed by child transition path.
    pub fn check_for_missing_parameters(
        &self,
        gatekeeper: &GateKeeper,
    ) -> BTreeMap<String, Vec<MissingParam>> {
        let enabled = self.enabled_children();
        let steps = self.steps.read();
        steps
            .iter()
            .flatten()
            .filter(|t| enabled.contains(t.resource_path()))
            .filter_map(|t| {
                let missing = t.check_for_missing_parameters(gatekeeper);
                (!missing.is_empty()).then(|| (t.path(), missing))
            })
            .collect()
    }

    /// Rule and constraint violations of enabled children, keyed by child transition path.
    pub fn check_for_invalid_parameters(
        &self,
        gatekeeper: &GateKeeper,
    ) -> BTreeMap<String, Vec<ParamRuleViolationList>> {
        let enabled = self.enabled_children();
        let steps = self.steps.read();
        steps
            .iter()
            .flatten()
            .filter(|t| enabled.contains(t.resource_path()))
            .filter_map(|t| {
                let invalid = t.check_for_invalid_parameters(gatekeeper);
                (!invalid.is_empty()).then(|| (t.path(), invalid))
            })
            .collect()
    }

    fn running_action(&self) -> RunningAction {
        RunningAction {
            id: self.action_id,
            kind: ActionKind::SystemTransition,
            path: self.header.path.clone(),
        }
    }

    /// Resolve and validate parameters of every enabled child transition.
    fn prepare(
        steps: &[Vec<Arc<Transition>>],
        enabled: &BTreeSet<String>,
        gatekeeper: &GateKeeper,
    ) -> Result<Vec<Vec<Slot>>> {
        let mut slots = Vec::with_capacity(steps.len());
        let mut missing = Vec::new();
        let mut transitions_missing = 0;

        for step in steps {
            let mut step_slots = Vec::with_capacity(step.len());
            for transition in step {
                let prepared = if enabled.contains(transition.resource_path()) {
                    let (entries, params, step_missing) = transition.resolve(gatekeeper);
                    if !step_missing.is_empty() {
                        transitions_missing += 1;
                        missing.extend(step_missing);
                    }
                    Some((entries, params))
                } else {
                    None
                };
                step_slots.push(Slot {
                    transition: Arc::clone(transition),
                    prepared,
                });
            }
            slots.push(step_slots);
        }

        if transitions_missing > 0 {
            return Err(ActionError::ParameterNotFound {
                message: format!(
                    "Could not find value of parameters for {} transitions",
                    transitions_missing
                ),
                missing,
            });
        }

        let mut violations = Vec::new();
        let mut transitions_invalid = 0;
        for slot in slots.iter().flatten() {
            if let Some((entries, params)) = &slot.prepared {
                let invalid = find_invalid_parameters(entries, params);
                if !invalid.is_empty() {
                    transitions_invalid += 1;
                    violations.extend(invalid);
                }
            }
        }
        if transitions_invalid > 0 {
            return Err(ActionError::CommandParameterCheckFailed {
                message: format!(
                    "Parameter values fail rules and/or constraints in {} transitions",
                    transitions_invalid
                ),
                violations,
            });
        }

        Ok(slots)
    }

    fn check_system_state(&self, data: &StatusData) -> Result<()> {
        if !data.is_engaged_in(&self.header.state_machine) {
            return Err(ActionError::ResourceInWrongStateMachine(format!(
                "System '{}' is not yet engaged in state machine '{}'",
                self.header.system, self.header.state_machine
            )));
        }
        if data.state.as_deref() != Some(self.header.start_state.as_str()) {
            return Err(ActionError::ResourceInWrongState(format!(
                "System '{}' is in state {:?}; transition '{}' cannot be run",
                self.header.system, data.state, self.header.id
            )));
        }
        Ok(())
    }

    /// Run every step, moving the system to the end state (or error state).
    ///
    /// All checks run with the system and child statuses locked together,
    /// and all guards are claimed at once before anything changes.
    pub fn exec(&self, gatekeeper: &GateKeeper, mode: ExecMode) -> Result<()> {
        let steps = self.steps.read().clone();
        let children = Self::first_transitions(&steps);
        let action = self.running_action();

        let system_status = Arc::clone(&self.system.resource.status);
        let child_statuses: Vec<Arc<ResourceStatus>> = children
            .values()
            .map(|t| Arc::clone(&t.core().status))
            .collect();

        let (guard, slots, enabled) = {
            let mut refs: Vec<&ResourceStatus> = vec![system_status.as_ref()];
            refs.extend(child_statuses.iter().map(|s| s.as_ref()));
            let mut locked = lock_ordered(&refs);
            let (system_data, child_data) = locked.split_first_mut().ok_or_else(|| {
                ActionError::InvalidSystemTransition(format!(
                    "No status locked for '{}'",
                    self.header.path
                ))
            })?;
            let system_data: &mut StatusData = system_data;

            let enabled: BTreeSet<String> = children
                .keys()
                .zip(child_data.iter())
                .filter(|(_, data)| data.enabled)
                .map(|(path, _)| path.clone())
                .collect();

            let slots = Self::prepare(&steps, &enabled, gatekeeper)?;

            self.check_system_state(system_data)?;
            for ((path, transition), data) in children.iter().zip(child_data.iter()) {
                if enabled.contains(path) {
                    transition.check_state(data)?;
                }
            }

            check_system(&system_status, system_data, &action)?;
            let statuses = children.keys().zip(&child_statuses).zip(child_data.iter());
            for ((path, status), data) in statuses {
                if enabled.contains(path) {
                    BusyGuard::check(status, data, &action, None)?;
                }
            }

            let claimed: Vec<(&Arc<ResourceStatus>, &mut StatusData)> = children
                .keys()
                .zip(&child_statuses)
                .zip(child_data.iter_mut())
                .filter(|((path, _), _)| enabled.contains(*path))
                .map(|((_, status), data)| (status, &mut **data))
                .collect();
            let guard = SystemBusyGuard::claim((&system_status, system_data), claimed, action);
            (guard, slots, enabled)
        };

        let generation = {
            let mut run = self.run.lock();
            run.total = steps.len();
            run.enabled = enabled;
            run.completed.clear();
            run.current = None;
            run.progress.schedule()
        };

        let plan = Plan {
            header: self.header.clone(),
            error_state: self.error_state.clone(),
            slots,
            run: Arc::clone(&self.run),
            warning_analyser: self.warning_analyser.read().clone(),
            error_analyser: self.error_analyser.read().clone(),
            generation,
        };

        match mode {
            ExecMode::Sync => {
                plan.execute(guard);
                Ok(())
            }
            ExecMode::Async => {
                self.system.resource.pool.submit_task(Box::new(move |dispatch| match dispatch {
                    Dispatch::Run => plan.execute(guard),
                    Dispatch::Discard(reason) => plan.discard(&reason, guard),
                }))?;
                Ok(())
            }
        }
    }
}

impl Functionoid for SystemTransition {
    type Snapshot = SystemTransitionSnapshot;

    fn id(&self) -> &str {
        &self.header.id
    }

    fn path(&self) -> String {
        self.header.path.clone()
    }

    fn action_id(&self) -> ActionId {
        self.action_id
    }

    fn status(&self) -> SystemTransitionSnapshot {
        let run = self.run.lock();
        self.header.snapshot(&run, run.progress.state)
    }

    fn state(&self) -> FunctionoidState {
        self.run.state()
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.run.wait(timeout)
    }
}

impl fmt::Debug for SystemTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTransition")
            .field("path", &self.header.path)
            .field("end_state", &self.header.end_state)
            .field("steps", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Command, Resource, ResourceBuilder, StateMachine, WorkerPool};
    use crate::config::PoolConfig;
    use crate::core::{rules, TerminalState};
    use crate::system::{System, SystemStateMachine};

    struct Fixture {
        system: System,
        a: Arc<Resource>,
        b: Arc<Resource>,
        machine: Arc<SystemStateMachine>,
        gatekeeper: GateKeeper,
    }

    fn child(pool: &Arc<WorkerPool>, id: &str) -> Resource {
        let resource = ResourceBuilder::new(id, Arc::clone(pool))
            .path(format!("crate.{id}"))
            .contexts([format!("crate.{id}"), "crate".to_string()])
            .build();
        let machine = resource.register_state_machine("run", "s0", "sErr").unwrap();
        machine.add_state("sA").unwrap();
        machine.add_state("sB").unwrap();
        resource
    }

    fn fixture() -> Fixture {
        let pool = WorkerPool::started(PoolConfig::default().with_workers(2)).unwrap();
        let system = ResourceBuilder::new("crate", Arc::clone(&pool)).build_system();
        let a = system.add_child(child(&pool, "a")).unwrap();
        let b = system.add_child(child(&pool, "b")).unwrap();
        let machine = system.register_state_machine("sys", "S0", "SErr").unwrap();
        machine.add_state("SA").unwrap();

        let mut values = ParameterSet::new();
        values.insert("x", 3_i64).unwrap();
        let mut gatekeeper = GateKeeper::new();
        gatekeeper.add_parameters("crate", values).unwrap();

        Fixture {
            system,
            a,
            b,
            machine,
            gatekeeper,
        }
    }

    fn machine(resource: &Resource) -> Arc<StateMachine> {
        resource.state_machine("run").unwrap()
    }

    fn child_transition(
        resource: &Resource,
        id: &str,
        from: &str,
        to: &str,
        terminal: TerminalState,
    ) -> Arc<Transition> {
        let command = Command::new(format!("{id}_cmd"), 0_i64, move |ctx, params| {
            ctx.set_result(*params.get_as::<i64>("x")?);
            Ok(terminal)
        });
        command
            .register_parameter("x", 1_i64, rules::greater_than(0_i64))
            .unwrap();
        let command = resource.register_command(command).unwrap();
        let transition = machine(resource).add_transition(id, from, to).unwrap();
        transition.then(&command).unwrap();
        transition
    }

    fn state_of(resource: &Resource) -> Option<String> {
        resource.status().state
    }

    #[test]
    fn steps_run_in_order_and_move_everything_to_end_states() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![
            child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done),
            child_transition(&f.b, "t1", "s0", "sA", TerminalState::Done),
        ])
        .unwrap()
        .add_step(vec![child_transition(&f.a, "t2", "sA", "sB", TerminalState::Done)])
        .unwrap();
        f.machine.engage(&f.gatekeeper).unwrap();

        t.exec(&f.gatekeeper, ExecMode::Async).unwrap();
        assert!(t.wait(Duration::from_secs(5)));

        let snapshot = t.status();
        assert_eq!(snapshot.state, FunctionoidState::Done);
        assert_eq!(snapshot.total_steps, 2);
        assert_eq!(snapshot.num_completed_steps, 2);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.steps[0].len(), 2);
        assert_eq!(snapshot.steps[1].len(), 1);
        assert!(snapshot.steps.iter().flatten().all(Option::is_some));
        assert_eq!(f.system.status().state.as_deref(), Some("SA"));
        assert_eq!(state_of(&f.a).as_deref(), Some("sB"));
        assert_eq!(state_of(&f.b).as_deref(), Some("sA"));
        assert!(!f.system.status().is_running());
    }

    #[test]
    fn disabled_children_are_skipped() {
        let mut f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![
            child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done),
            child_transition(&f.b, "t1", "s0", "sA", TerminalState::Done),
        ])
        .unwrap();
        f.gatekeeper.add_to_disabled_set("crate.b").unwrap();
        f.machine.engage(&f.gatekeeper).unwrap();
        assert!(!f.b.is_enabled());

        t.exec(&f.gatekeeper, ExecMode::Sync).unwrap();

        let snapshot = t.status();
        assert_eq!(snapshot.state, FunctionoidState::Done);
        assert!(snapshot.steps[0][0].is_some());
        assert!(snapshot.steps[0][1].is_none());
        assert_eq!(snapshot.enabled_children, BTreeSet::from(["crate.a".to_string()]));
        assert_eq!(state_of(&f.a).as_deref(), Some("sA"));
        assert_eq!(state_of(&f.b), None);
    }

    #[test]
    fn child_error_stops_remaining_steps() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![
            child_transition(&f.a, "t1", "s0", "sA", TerminalState::Error),
            child_transition(&f.b, "t1", "s0", "sA", TerminalState::Done),
        ])
        .unwrap()
        .add_step(vec![child_transition(&f.b, "t2", "sA", "sB", TerminalState::Done)])
        .unwrap();
        f.machine.engage(&f.gatekeeper).unwrap();

        t.exec(&f.gatekeeper, ExecMode::Sync).unwrap();

        let snapshot = t.status();
        assert_eq!(snapshot.state, FunctionoidState::Error);
        assert_eq!(snapshot.num_completed_steps, 1);
        assert_eq!(f.system.status().state.as_deref(), Some("SErr"));
        assert_eq!(state_of(&f.a).as_deref(), Some("sErr"));
        assert_eq!(state_of(&f.b).as_deref(), Some("sA"));
        assert_eq!(
            machine(&f.b).transition("sA", "t2").unwrap().state(),
            FunctionoidState::Initial
        );
    }

    #[test]
    fn warning_analyser_sets_message() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![child_transition(&f.a, "t1", "s0", "sA", TerminalState::Warning)])
            .unwrap();
        t.register_warning_analyser(|snapshot| {
            Ok(format!("{} step(s) finished", snapshot.num_completed_steps))
        });
        f.machine.engage(&f.gatekeeper).unwrap();

        t.exec(&f.gatekeeper, ExecMode::Sync).unwrap();
        let snapshot = t.status();
        assert_eq!(snapshot.state, FunctionoidState::Warning);
        assert_eq!(snapshot.message, "1 step(s) finished");
        assert_eq!(f.system.status().state.as_deref(), Some("SA"));
    }

    #[test]
    fn failing_error_analyser_is_reported_in_message() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![child_transition(&f.a, "t1", "s0", "sA", TerminalState::Error)])
            .unwrap();
        t.register_error_analyser(|_| Err(ExecutionFailure::new("Timeout", "board unreachable")));
        f.machine.engage(&f.gatekeeper).unwrap();

        t.exec(&f.gatekeeper, ExecMode::Sync).unwrap();
        assert_eq!(
            t.status().message,
            "Exception of type 'Timeout' thrown by error analyser function. \
             Details: board unreachable"
        );
    }

    #[test]
    fn invalid_steps_are_rejected() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();

        assert!(matches!(t.add_step(Vec::new()), Err(ActionError::InvalidSystemTransition(_))));

        let first = child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done);
        let duplicate = child_transition(&f.a, "t2", "sA", "sB", TerminalState::Done);
        assert!(matches!(
            t.add_step(vec![Arc::clone(&first), duplicate]),
            Err(ActionError::InvalidSystemTransition(_))
        ));

        let pool = WorkerPool::started(PoolConfig::default().with_workers(1)).unwrap();
        let stranger = child(&pool, "stranger");
        let foreign = child_transition(&stranger, "t1", "s0", "sA", TerminalState::Done);
        assert!(matches!(
            t.add_step(vec![foreign]),
            Err(ActionError::InvalidSystemTransition(_))
        ));

        t.add_step(vec![first]).unwrap();
        let mismatched = child_transition(&f.a, "t3", "sB", "sA", TerminalState::Done);
        assert!(matches!(
            t.add_step(vec![mismatched]),
            Err(ActionError::InvalidSystemTransition(_))
        ));

        assert_eq!(t.len(), 1);
        assert_eq!(f.machine.participants().keys().collect::<Vec<_>>(), vec!["crate.a"]);
    }

    #[test]
    fn system_must_be_engaged_in_start_state() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "SA", "S0").unwrap();
        t.add_step(vec![child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done)])
            .unwrap();

        assert!(matches!(
            t.exec(&f.gatekeeper, ExecMode::Sync),
            Err(ActionError::ResourceInWrongStateMachine(_))
        ));

        f.machine.engage(&f.gatekeeper).unwrap();
        assert!(matches!(
            t.exec(&f.gatekeeper, ExecMode::Sync),
            Err(ActionError::ResourceInWrongState(_))
        ));
        assert_eq!(t.state(), FunctionoidState::Initial);
    }

    #[test]
    fn missing_parameters_are_counted_per_transition() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![
            child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done),
            child_transition(&f.b, "t1", "s0", "sA", TerminalState::Done),
        ])
        .unwrap();
        f.machine.engage(&f.gatekeeper).unwrap();

        let empty = GateKeeper::new();
        assert_eq!(t.check_for_missing_parameters(&empty).len(), 2);
        assert!(t.check_for_missing_parameters(&f.gatekeeper).is_empty());

        match t.exec(&empty, ExecMode::Sync).unwrap_err() {
            ActionError::ParameterNotFound { message, missing } => {
                assert_eq!(message, "Could not find value of parameters for 2 transitions");
                assert_eq!(missing.len(), 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.system.status().state.as_deref(), Some("S0"));
    }

    #[test]
    fn invalid_parameters_are_reported_before_running() {
        let f = fixture();
        let t = f.machine.add_transition("configure", "S0", "SA").unwrap();
        t.add_step(vec![child_transition(&f.a, "t1", "s0", "sA", TerminalState::Done)])
            .unwrap();
        f.machine.engage(&f.gatekeeper).unwrap();

        let mut values = ParameterSet::new();
        values.insert("x", -1_i64).unwrap();
        let mut gk = GateKeeper::new();
        gk.add_parameters("crate", values).unwrap();

        assert_eq!(t.check_for_invalid_parameters(&gk).len(), 1);
        assert!(matches!(
            t.exec(&gk, ExecMode::Sync),
            Err(ActionError::CommandParameterCheckFailed { .. })
        ));
        assert_eq!(state_of(&f.a).as_deref(), Some("s0"));
    }

    #[test]
    fn progress_counts_slowest_child_of_running_step() {
        let snapshot = |progress: f32| TransitionSnapshot {
            path: String::new(),
            id: String::new(),
            resource: String::new(),
            state_machine: String::new(),
            start_state: String::new(),
            end_state: String::new(),
            state: FunctionoidState::Running,
            running_time: Duration::ZERO,
            progress,
            status_msg: String::new(),
            total: 1,
            num_completed: 0,
            commands: Vec::new(),
            results: Vec::new(),
        };
        let steps = vec![
            vec![Some(snapshot(1.0))],
            vec![Some(snapshot(0.5)), None, Some(snapshot(0.25))],
        ];
        assert_eq!(overall_progress(FunctionoidState::Running, 4, &steps), 1.25 / 4.0);
        assert_eq!(overall_progress(FunctionoidState::Done, 4, &steps), 1.0);
        assert_eq!(overall_progress(FunctionoidState::Done, 0, &[]), 1.0);
    }
}
