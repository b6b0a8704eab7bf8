//! Actionable resources: the objects commands and state machines act upon.

use super::command::Command;
use super::error::{ActionError, Result};
use super::functionoid::Functionoid;
use super::machine::StateMachine;
use super::pool::WorkerPool;
use super::sequence::CommandSequence;
use super::status::{ResourceStatus, StatusSnapshot};
use crate::checkpoint::StatusCheckpoint;
use crate::core::{Component, MaskableObject, MonitorableObject, MonitoringStatus, StateHistory};
use crate::gatekeeper::GateKeeper;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// State shared by a resource and every action registered on it.
///
/// Actions hold an `Arc` to the core, so an asynchronous command can finish
/// reporting status after the owning [`Resource`] has been dropped.
pub(crate) struct ResourceCore {
    pub id: String,
    pub path: String,
    pub status: Arc<ResourceStatus>,
    pub pool: Arc<WorkerPool>,
    pub contexts: Vec<String>,
    driver: Option<Arc<dyn Any + Send + Sync>>,
    maskables: Vec<Arc<dyn MaskableObject>>,
    monitorables: Vec<Arc<dyn MonitorableObject>>,
    monitoring_status: Mutex<MonitoringStatus>,
}

impl ResourceCore {
    pub fn new(id: impl Into<String>, path: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            status: Arc::new(ResourceStatus::new(path.clone())),
            contexts: vec![path.clone()],
            path,
            pool,
            driver: None,
            maskables: Vec::new(),
            monitorables: Vec::new(),
            monitoring_status: Mutex::new(MonitoringStatus::Enabled),
        }
    }

    pub fn driver<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let driver = Arc::clone(self.driver.as_ref()?);
        driver.downcast::<T>().ok()
    }

    /// Mask exactly the descendants the gatekeeper lists for this resource.
    pub fn reset_and_apply_masks(&self, gatekeeper: &GateKeeper) {
        for maskable in &self.maskables {
            maskable.set_masked(gatekeeper.get_mask(maskable.id(), &self.contexts));
        }
    }

    /// Apply per-descendant monitoring settings for `state`; unlisted descendants are enabled.
    pub fn apply_monitoring_settings(&self, gatekeeper: &GateKeeper, state: &str) {
        for monitorable in &self.monitorables {
            let status = gatekeeper
                .get_monitoring_setting(state, monitorable.id(), &self.contexts)
                .map(|setting| setting.status)
                .unwrap_or_default();
            monitorable.set_monitoring_status(status);
        }
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        *self.monitoring_status.lock()
    }

    pub fn set_monitoring_status(&self, status: MonitoringStatus) {
        *self.monitoring_status.lock() = status;
    }

    pub fn kill(&self) {
        let mut data = self.status.lock();
        if data.alive {
            data.alive = false;
            tracing::info!(resource = %self.path, "Resource killed; new actions are refused");
        }
    }
}

impl fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCore")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("contexts", &self.contexts)
            .finish()
    }
}

/// Fluent builder for [`Resource`].
///
/// # Example
///
/// ```rust
/// use actionable::action::{ResourceBuilder, WorkerPool};
/// use actionable::config::PoolConfig;
/// use actionable::core::Component;
/// use std::sync::Arc;
///
/// let pool = WorkerPool::started(PoolConfig::default()).unwrap();
/// let board = ResourceBuilder::new("board0", pool)
///     .path("crate1.board0")
///     .contexts(["crate1.board0", "boards"])
///     .component(Arc::new(Component::new("link0")))
///     .build();
///
/// assert_eq!(board.path(), "crate1.board0");
/// assert_eq!(board.contexts(), ["crate1.board0", "boards"]);
/// ```
pub struct ResourceBuilder {
    core: ResourceCore,
    contexts: Option<Vec<String>>,
    history_capacity: Option<usize>,
}

impl ResourceBuilder {
    pub fn new(id: impl Into<String>, pool: Arc<WorkerPool>) -> Self {
        let id = id.into();
        Self {
            core: ResourceCore::new(id.clone(), id, pool),
            contexts: None,
            history_capacity: None,
        }
    }

    /// Full dotted path. Defaults to the id.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.core.status = Arc::new(ResourceStatus::new(path.clone()));
        self.core.contexts = vec![path.clone()];
        self.core.path = path;
        self
    }

    /// GateKeeper contexts, highest priority first. Defaults to `[path]`.
    pub fn contexts<I, S>(mut self, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contexts = Some(contexts.into_iter().map(Into::into).collect());
        self
    }

    /// Number of state changes kept in the status history.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = Some(capacity);
        self
    }

    /// Hardware access object handed to command code.
    pub fn driver<T: Any + Send + Sync>(mut self, driver: T) -> Self {
        self.core.driver = Some(Arc::new(driver));
        self
    }

    /// Register a descendant that is both maskable and monitorable.
    pub fn component(self, component: Arc<Component>) -> Self {
        self.maskable(component.clone()).monitorable(component)
    }

    pub fn maskable(mut self, object: Arc<dyn MaskableObject>) -> Self {
        self.core.maskables.push(object);
        self
    }

    pub fn monitorable(mut self, object: Arc<dyn MonitorableObject>) -> Self {
        self.core.monitorables.push(object);
        self
    }

    pub fn build(self) -> Resource {
        Resource::from_core(Arc::new(self.into_core()))
    }

    pub(crate) fn into_core(mut self) -> ResourceCore {
        if let Some(contexts) = self.contexts.take() {
            self.core.contexts = contexts;
        }
        if let Some(capacity) = self.history_capacity {
            self.core.status.lock().history = StateHistory::with_capacity(capacity);
        }
        self.core
    }
}

/// A controllable resource owning commands, sequences and state machines.
pub struct Resource {
    core: Arc<ResourceCore>,
    commands: RwLock<BTreeMap<String, Arc<Command>>>,
    sequences: RwLock<BTreeMap<String, Arc<CommandSequence>>>,
    state_machines: RwLock<BTreeMap<String, Arc<StateMachine>>>,
}

impl Resource {
    fn from_core(core: Arc<ResourceCore>) -> Self {
        Self {
            core,
            commands: RwLock::new(BTreeMap::new()),
            sequences: RwLock::new(BTreeMap::new()),
            state_machines: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn path(&self) -> &str {
        &self.core.path
    }

    pub fn contexts(&self) -> &[String] {
        &self.core.contexts
    }

    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    /// Attach `command` to this resource. Its parameters are frozen from now on.
    pub fn register_command(&self, command: Command) -> Result<Arc<Command>> {
        let mut commands = self.commands.write();
        if commands.contains_key(command.id()) {
            return Err(ActionError::CommandAlreadyExists(command.id().to_string()));
        }
        command.attach(Arc::clone(&self.core))?;
        let command = Arc::new(command);
        commands.insert(command.id().to_string(), Arc::clone(&command));
        Ok(command)
    }

    pub fn command(&self, id: &str) -> Result<Arc<Command>> {
        self.commands
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ActionError::CommandNotFound(id.to_string()))
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Register a command sequence starting with `first`.
    pub fn register_sequence(
        &self,
        id: &str,
        first: &Arc<Command>,
    ) -> Result<Arc<CommandSequence>> {
        let mut sequences = self.sequences.write();
        if sequences.contains_key(id) {
            return Err(ActionError::SequenceAlreadyExists(id.to_string()));
        }
        let sequence = Arc::new(CommandSequence::new(id, Arc::clone(&self.core), first)?);
        sequences.insert(id.to_string(), Arc::clone(&sequence));
        Ok(sequence)
    }

    pub fn sequence(&self, id: &str) -> Result<Arc<CommandSequence>> {
        self.sequences
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ActionError::SequenceNotFound(id.to_string()))
    }

    pub fn sequences(&self) -> Vec<String> {
        self.sequences.read().keys().cloned().collect()
    }

    pub fn register_state_machine(
        &self,
        id: &str,
        initial_state: &str,
        error_state: &str,
    ) -> Result<Arc<StateMachine>> {
        let mut machines = self.state_machines.write();
        if machines.contains_key(id) {
            return Err(ActionError::StateMachineAlreadyExists(id.to_string()));
        }
        let machine = Arc::new(StateMachine::new(
            id,
            Arc::clone(&self.core),
            initial_state,
            error_state,
        ));
        machines.insert(id.to_string(), Arc::clone(&machine));
        Ok(machine)
    }

    pub fn state_machine(&self, id: &str) -> Result<Arc<StateMachine>> {
        self.state_machines
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ActionError::StateMachineNotFound(id.to_string()))
    }

    pub fn state_machines(&self) -> Vec<String> {
        self.state_machines.read().keys().cloned().collect()
    }

    pub fn enable(&self) {
        self.core.status.lock().enabled = true;
    }

    pub fn disable(&self) {
        self.core.status.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.core.status.lock().enabled
    }

    /// Refuse all new actions. Running actions are left to finish.
    pub fn kill(&self) {
        self.core.kill();
    }

    /// Kill the resource and wait for running actions to finish.
    ///
    /// Returns `false` if actions were still running after the pool's
    /// shutdown timeout.
    pub fn shutdown(&self) -> bool {
        self.core.kill();
        let idle = self
            .core
            .status
            .wait_until_idle(self.core.pool.config().shutdown_timeout());
        if !idle {
            tracing::warn!(
                resource = %self.core.path,
                "Actions still running after shutdown timeout"
            );
        }
        idle
    }

    pub fn reset_and_apply_masks(&self, gatekeeper: &GateKeeper) {
        self.core.reset_and_apply_masks(gatekeeper);
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        self.core.monitoring_status()
    }

    pub fn set_monitoring_status(&self, status: MonitoringStatus) {
        self.core.set_monitoring_status(status);
    }

    pub fn status(&self) -> StatusSnapshot {
        self.core.status.snapshot()
    }

    pub fn checkpoint(&self) -> StatusCheckpoint {
        StatusCheckpoint::from_snapshot(self.status())
    }

    /// Restore engagement, state and enabled flag from a checkpoint.
    ///
    /// The checkpoint must have been taken from a resource with this path,
    /// and the resource must be idle and disengaged.
    pub fn restore(&self, checkpoint: &StatusCheckpoint) -> Result<()> {
        if checkpoint.path != self.core.path {
            return Err(ActionError::InvalidResource(format!(
                "Checkpoint of resource '{}' cannot be restored onto resource '{}'",
                checkpoint.path, self.core.path
            )));
        }
        let machine = match &checkpoint.state_machine {
            Some(id) => Some(self.state_machine(id)?),
            None => None,
        };
        if let (Some(machine), Some(state)) = (&machine, &checkpoint.state) {
            if !machine.has_state(state) {
                return Err(ActionError::StateNotDefined(state.clone()));
            }
        }

        let mut data = self.core.status.lock();
        if data.is_running() {
            return Err(ActionError::ActionableObjectIsBusy(format!(
                "Cannot restore resource '{}' while actions are running",
                self.core.path
            )));
        }
        if data.is_engaged() {
            return Err(ActionError::ResourceInWrongStateMachine(format!(
                "Cannot restore resource '{}': already engaged in state machine '{}'",
                self.core.path,
                data.state_machine.as_deref().unwrap_or_default()
            )));
        }

        data.enabled = checkpoint.enabled;
        data.history = checkpoint.history.clone();
        if let (Some(machine), Some(state)) = (machine, &checkpoint.state) {
            data.engage(machine.id(), state, "restore");
        }
        tracing::info!(
            resource = %self.core.path,
            checkpoint = %checkpoint.id,
            state = ?data.state,
            "Restored resource status"
        );
        Ok(())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("core", &self.core)
            .field("commands", &self.commands())
            .field("state_machines", &self.state_machines())
            .finish()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        self.core.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ExecMode;
    use crate::config::PoolConfig;
    use crate::core::{ParameterSet, TerminalState};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn pool() -> Arc<WorkerPool> {
        WorkerPool::started(PoolConfig::default().with_workers(1)).unwrap()
    }

    fn noop(id: &str) -> Command {
        Command::new(id, false, |_, _| Ok(TerminalState::Done))
    }

    #[test]
    fn path_defaults_to_id() {
        let resource = ResourceBuilder::new("board", pool()).build();
        assert_eq!(resource.path(), "board");
        assert_eq!(resource.contexts(), ["board"]);
        assert_eq!(resource.status().path, "board");
    }

    #[test]
    fn duplicate_registrations_fail() {
        let resource = ResourceBuilder::new("board", pool()).build();
        let first = resource.register_command(noop("reset")).unwrap();

        assert_eq!(
            resource.register_command(noop("reset")).unwrap_err(),
            ActionError::CommandAlreadyExists("reset".into())
        );

        resource.register_sequence("seq", &first).unwrap();
        assert!(matches!(
            resource.register_sequence("seq", &first),
            Err(ActionError::SequenceAlreadyExists(_))
        ));

        resource.register_state_machine("run", "halted", "error").unwrap();
        assert!(matches!(
            resource.register_state_machine("run", "halted", "error"),
            Err(ActionError::StateMachineAlreadyExists(_))
        ));
    }

    #[test]
    fn unknown_lookups_fail() {
        let resource = ResourceBuilder::new("board", pool()).build();
        assert!(matches!(resource.command("x"), Err(ActionError::CommandNotFound(_))));
        assert!(matches!(resource.sequence("x"), Err(ActionError::SequenceNotFound(_))));
        assert!(matches!(
            resource.state_machine("x"),
            Err(ActionError::StateMachineNotFound(_))
        ));
    }

    #[test]
    fn enable_and_disable_toggle_flag() {
        let resource = ResourceBuilder::new("board", pool()).build();
        assert!(resource.is_enabled());
        resource.disable();
        assert!(!resource.is_enabled());
        resource.enable();
        assert!(resource.status().enabled);
    }

    #[test]
    fn masks_follow_gatekeeper() {
        let link0 = Arc::new(Component::new("link0"));
        let link1 = Arc::new(Component::new("link1"));
        link1.set_masked(true);
        let resource = ResourceBuilder::new("board", pool())
            .component(link0.clone())
            .component(link1.clone())
            .build();

        let mut gk = GateKeeper::new();
        gk.add_masks("board", ["link0"]).unwrap();
        resource.reset_and_apply_masks(&gk);

        assert!(link0.is_masked());
        assert!(!link1.is_masked());
    }

    #[test]
    fn driver_is_reachable_by_type() {
        struct Driver {
            address: u32,
        }
        let resource = ResourceBuilder::new("board", pool())
            .driver(Driver { address: 0x40 })
            .build();

        assert_eq!(resource.core().driver::<Driver>().unwrap().address, 0x40);
        assert!(resource.core().driver::<String>().is_none());
    }

    #[test]
    fn killed_resource_refuses_commands() {
        let resource = ResourceBuilder::new("board", pool()).build();
        let command = resource.register_command(noop("reset")).unwrap();
        assert!(resource.shutdown());

        let err = command.exec(&Default::default(), Default::default()).unwrap_err();
        assert!(matches!(err, ActionError::ActionableObjectIsBusy(_)));
        assert!(!resource.status().alive);
    }

    #[test]
    fn restore_reengages_recorded_state() {
        let source = ResourceBuilder::new("board", pool()).build();
        let machine = source.register_state_machine("run", "halted", "error").unwrap();
        machine.add_state("configured").unwrap();
        source.core().status.lock().engage("run", "configured", "test");
        source.disable();
        let checkpoint = source.checkpoint();

        let target = ResourceBuilder::new("board", pool()).build();
        let machine = target.register_state_machine("run", "halted", "error").unwrap();
        machine.add_state("configured").unwrap();
        target.restore(&checkpoint).unwrap();

        let status = target.status();
        assert_eq!(status.state_machine.as_deref(), Some("run"));
        assert_eq!(status.state.as_deref(), Some("configured"));
        assert!(!status.enabled);
        assert_eq!(status.history.last().unwrap().cause, "restore");
    }

    #[test]
    fn restore_rejects_unknown_state() {
        let source = ResourceBuilder::new("board", pool()).build();
        source.register_state_machine("run", "halted", "error").unwrap();
        source.core().status.lock().engage("run", "ghost", "test");
        let checkpoint = source.checkpoint();

        let target = ResourceBuilder::new("board", pool()).build();
        target.register_state_machine("run", "halted", "error").unwrap();
        assert_eq!(
            target.restore(&checkpoint).unwrap_err(),
            ActionError::StateNotDefined("ghost".into())
        );
    }

    #[test]
    fn restore_requires_disengaged_resource() {
        let resource = ResourceBuilder::new("board", pool()).build();
        resource.register_state_machine("run", "halted", "error").unwrap();
        let checkpoint = resource.checkpoint();
        resource.core().status.lock().engage("run", "halted", "test");

        assert!(matches!(
            resource.restore(&checkpoint),
            Err(ActionError::ResourceInWrongStateMachine(_))
        ));
    }

    #[test]
    fn history_is_bounded_by_capacity() {
        let resource = ResourceBuilder::new("board", pool()).history_capacity(3).build();
        for _ in 0..5 {
            let mut data = resource.core().status.lock();
            data.engage("run", "halted", "engage");
            data.disengage("disengage");
        }

        let history = resource.status().history;
        assert_eq!(history.len(), 3);
        assert_eq!(history.evicted(), 7);
        assert_eq!(history.last().unwrap().cause, "disengage");
    }

    #[test]
    fn restore_rejects_checkpoint_of_other_resource() {
        let source = ResourceBuilder::new("board0", pool()).build();
        source.register_state_machine("run", "halted", "error").unwrap();
        let checkpoint = source.checkpoint();

        let target = ResourceBuilder::new("board1", pool()).build();
        target.register_state_machine("run", "halted", "error").unwrap();
        assert!(matches!(
            target.restore(&checkpoint),
            Err(ActionError::InvalidResource(_))
        ));
        assert!(target.status().history.is_empty());
    }

    #[test]
    fn dropped_resource_lets_in_flight_command_finish() {
        let pool = pool();
        let pool_ref = Arc::downgrade(&pool);
        let board = ResourceBuilder::new("board", pool).build();

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = Mutex::new((started_tx, release_rx));
        let command = board
            .register_command(Command::new("hold", false, move |ctx, _| {
                let gate = gate.lock();
                gate.0.send(())?;
                gate.1.recv()?;
                ctx.set_result(true);
                Ok(TerminalState::Done)
            }))
            .unwrap();

        command.exec(&ParameterSet::new(), ExecMode::Async).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();
        drop(command);
        drop(board);
        release_tx.send(()).unwrap();

        // The finishing task drops the last handle on the pool.
        let deadline = Instant::now() + TIMEOUT;
        while pool_ref.strong_count() > 0 {
            assert!(Instant::now() < deadline, "worker pool was never released");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
