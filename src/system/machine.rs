//! System-level state machines.

use super::guard::check_system;
use super::resource::SystemCore;
use super::transition::SystemTransition;
use crate::action::{
    lock_ordered, ActionError, ActionId, ActionKind, ResourceStatus, Result, RunningAction,
    StateMachine, StatusData,
};
use crate::core::MonitoringStatus;
use crate::gatekeeper::GateKeeper;
use parking_lot::{MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Child state machines taking part in a system state machine, keyed by child path.
pub(crate) type Participants = BTreeMap<String, Arc<StateMachine>>;

/// State machine of a [`System`](super::System) whose transitions drive children.
pub struct SystemStateMachine {
    id: String,
    system: Arc<SystemCore>,
    initial_state: String,
    error_state: String,
    action_id: ActionId,
    participants: Arc<RwLock<Participants>>,
    states: RwLock<BTreeMap<String, BTreeMap<String, Arc<SystemTransition>>>>,
}

/// Statuses of the system (first) and the given children, locked together.
struct Locked<'a> {
    guards: Vec<MutexGuard<'a, StatusData>>,
}

impl<'a> Locked<'a> {
    fn new(statuses: &'a [Arc<ResourceStatus>]) -> Self {
        let refs: Vec<&ResourceStatus> = statuses.iter().map(|s| s.as_ref()).collect();
        Self {
            guards: lock_ordered(&refs),
        }
    }

    fn system(&mut self) -> &mut StatusData {
        &mut self.guards[0]
    }

    fn child(&mut self, index: usize) -> &mut StatusData {
        &mut self.guards[index + 1]
    }
}

impl SystemStateMachine {
    pub(crate) fn new(
        id: impl Into<String>,
        system: Arc<SystemCore>,
        initial_state: impl Into<String>,
        error_state: impl Into<String>,
    ) -> Self {
        let initial_state = initial_state.into();
        let error_state = error_state.into();
        let mut states = BTreeMap::new();
        states.insert(initial_state.clone(), BTreeMap::new());
        states.insert(error_state.clone(), BTreeMap::new());

        Self {
            id: id.into(),
            system,
            initial_state,
            error_state,
            action_id: ActionId::new(),
            participants: Arc::new(RwLock::new(Participants::new())),
            states: RwLock::new(states),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}.{}", self.system.resource.path, self.id)
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn error_state(&self) -> &str {
        &self.error_state
    }

    pub fn states(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.read().contains_key(state)
    }

    /// Child state machines used by any transition, keyed by child path.
    pub fn participants(&self) -> BTreeMap<String, Arc<StateMachine>> {
        self.participants.read().clone()
    }

    pub fn add_state(&self, state: &str) -> Result<()> {
        let mut states = self.states.write();
        if states.contains_key(state) {
            return Err(ActionError::StateAlreadyDefined(format!(
                "{} (system state machine '{}')",
                state,
                self.path()
            )));
        }
        states.insert(state.to_string(), BTreeMap::new());
        Ok(())
    }

    pub fn add_transition(&self, id: &str, from: &str, to: &str) -> Result<Arc<SystemTransition>> {
        let mut states = self.states.write();
        if !states.contains_key(to) {
            return Err(ActionError::StateNotDefined(format!(
                "{} (system state machine '{}')",
                to,
                self.path()
            )));
        }
        let path = self.path();
        let outgoing = states.get_mut(from).ok_or_else(|| {
            ActionError::StateNotDefined(format!("{} (system state machine '{}')", from, path))
        })?;
        if outgoing.contains_key(id) {
            return Err(ActionError::TransitionAlreadyDefined(format!(
                "{} from state '{}' (system state machine '{}')",
                id, from, path
            )));
        }

        let transition = Arc::new(SystemTransition::new(
            id,
            self.id.clone(),
            from,
            to,
            self.error_state.clone(),
            Arc::clone(&self.system),
            Arc::clone(&self.participants),
        ));
        outgoing.insert(id.to_string(), Arc::clone(&transition));
        Ok(transition)
    }

    pub fn transition(&self, from: &str, id: &str) -> Result<Arc<SystemTransition>> {
        let states = self.states.read();
        let outgoing = states.get(from).ok_or_else(|| {
            ActionError::StateNotDefined(format!(
                "{} (system state machine '{}')",
                from,
                self.path()
            ))
        })?;
        outgoing.get(id).cloned().ok_or_else(|| {
            ActionError::TransitionNotFound(format!(
                "{} from state '{}' (system state machine '{}')",
                id,
                from,
                self.path()
            ))
        })
    }

    pub fn transitions(&self, from: &str) -> Result<BTreeMap<String, Arc<SystemTransition>>> {
        self.states.read().get(from).cloned().ok_or_else(|| {
            ActionError::StateNotDefined(format!(
                "{} (system state machine '{}')",
                from,
                self.path()
            ))
        })
    }

    fn running_action(&self) -> RunningAction {
        RunningAction {
            id: self.action_id,
            kind: ActionKind::SystemStateMachine,
            path: self.path(),
        }
    }

    /// Statuses to lock: the system, then every child in id order.
    fn statuses(&self) -> (Vec<Arc<ResourceStatus>>, Vec<String>) {
        let children = self.system.children();
        let mut statuses = vec![Arc::clone(&self.system.resource.status)];
        statuses.extend(children.iter().map(|child| Arc::clone(&child.core().status)));
        let paths = children.iter().map(|child| child.path().to_string()).collect();
        (statuses, paths)
    }

    fn check_system_engaged(&self, data: &StatusData, operation: &str) -> Result<()> {
        let system = &self.system.resource;
        check_system(&system.status, data, &self.running_action())?;
        if !data.is_engaged_in(&self.id) {
            let reason = match &data.state_machine {
                None => "NOT in any state machine.".to_string(),
                Some(other) => format!("currently in state machine '{}'", other),
            };
            let message = format!(
                "Cannot {} state machine '{}' of '{}'; {}",
                operation, self.id, system.path, reason
            );
            tracing::warn!(system = %system.path, "{}", message);
            return Err(ActionError::ResourceInWrongStateMachine(message));
        }
        Ok(())
    }

    /// Set each child's enabled flag from the gatekeeper.
    fn apply_enabled_flags(
        &self,
        locked: &mut Locked<'_>,
        paths: &[String],
        gatekeeper: &GateKeeper,
    ) {
        for (index, path) in paths.iter().enumerate() {
            let enabled = gatekeeper.is_enabled(path);
            let data = locked.child(index);
            if data.enabled != enabled {
                tracing::info!(child = %path, enabled, "Setting enabled flag from gatekeeper");
            }
            data.enabled = enabled;
        }
    }

    /// Engage the system and every enabled participant at their initial states.
    ///
    /// Every check runs before anything changes, so a failure leaves the
    /// system and all children untouched.
    pub fn engage(&self, gatekeeper: &GateKeeper) -> Result<()> {
        let participants = self.participants();
        let (statuses, paths) = self.statuses();
        let mut locked = Locked::new(&statuses);

        {
            let data = locked.system();
            check_system(&self.system.resource.status, data, &self.running_action())?;
            if let Some(engaged) = &data.state_machine {
                let message = format!(
                    "Cannot engage other state machine; \
                     system '{}' currently in state machine '{}'",
                    self.system.resource.path, engaged
                );
                tracing::warn!(system = %self.system.resource.path, "{}", message);
                return Err(ActionError::ResourceInWrongStateMachine(message));
            }
        }
        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.enabled && gatekeeper.is_enabled(path) {
                machine.check_engage(data)?;
            }
        }

        tracing::info!(
            system = %self.system.resource.path,
            state_machine = %self.id,
            state = %self.initial_state,
            "Engaging system state machine"
        );
        locked.system().engage(&self.id, &self.initial_state, "engage");
        self.apply_enabled_flags(&mut locked, &paths, gatekeeper);

        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.enabled {
                machine.apply_engage(data, gatekeeper);
                machine.core().set_monitoring_status(MonitoringStatus::Enabled);
            } else {
                machine.core().set_monitoring_status(MonitoringStatus::NonCritical);
            }
        }

        self.system
            .resource
            .apply_monitoring_settings(gatekeeper, &self.initial_state);
        Ok(())
    }

    /// Disengage the system and every enabled participant.
    pub fn disengage(&self) -> Result<()> {
        let participants = self.participants();
        let (statuses, paths) = self.statuses();
        let mut locked = Locked::new(&statuses);

        self.check_system_engaged(locked.system(), "disengage")?;
        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.enabled {
                machine.check_engaged(data, "disengage")?;
            }
        }

        tracing::info!(
            system = %self.system.resource.path,
            state_machine = %self.id,
            "Disengaging system state machine"
        );
        locked.system().disengage("disengage");
        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.is_engaged_in(machine.id()) {
                machine.apply_disengage(data);
            }
        }
        Ok(())
    }

    /// Return the system and every enabled participant to their initial states.
    pub fn reset(&self, gatekeeper: &GateKeeper) -> Result<()> {
        let participants = self.participants();
        let (statuses, paths) = self.statuses();
        let mut locked = Locked::new(&statuses);

        self.check_system_engaged(locked.system(), "reset")?;
        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.enabled && gatekeeper.is_enabled(path) {
                machine.check_engaged(data, "reset")?;
            }
        }

        tracing::info!(
            system = %self.system.resource.path,
            state_machine = %self.id,
            state = %self.initial_state,
            "Resetting system state machine"
        );
        locked.system().set_state(&self.initial_state, "reset");
        self.apply_enabled_flags(&mut locked, &paths, gatekeeper);

        for (index, path) in paths.iter().enumerate() {
            let Some(machine) = participants.get(path) else { continue };
            let data = locked.child(index);
            if data.enabled && data.is_engaged_in(machine.id()) {
                machine.apply_reset(data, gatekeeper);
                machine.core().set_monitoring_status(MonitoringStatus::Enabled);
            } else if data.enabled && !data.is_engaged() {
                machine.apply_engage(data, gatekeeper);
                machine.core().set_monitoring_status(MonitoringStatus::Enabled);
            } else {
                if data.enabled {
                    tracing::warn!(
                        child = %path,
                        engaged = ?data.state_machine,
                        "Child engaged in another state machine; disabling it"
                    );
                    data.enabled = false;
                }
                machine.core().set_monitoring_status(MonitoringStatus::NonCritical);
            }
        }

        self.system
            .resource
            .apply_monitoring_settings(gatekeeper, &self.initial_state);
        Ok(())
    }
}

impl fmt::Debug for SystemStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemStateMachine")
            .field("path", &self.path())
            .field("initial_state", &self.initial_state)
            .field("error_state", &self.error_state)
            .field("participants", &self.participants.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
