//! Per-resource state machines.

use super::error::{ActionError, Result};
use super::functionoid::{ActionId, ActionKind};
use super::guard::BusyGuard;
use super::resource::ResourceCore;
use super::status::{RunningAction, StatusData};
use super::transition::Transition;
use crate::gatekeeper::GateKeeper;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type TransitionTable = BTreeMap<String, BTreeMap<String, Arc<Transition>>>;

/// States of one resource and the transitions between them.
///
/// The initial and error states exist from construction. States and
/// transitions can only be added, never removed.
pub struct StateMachine {
    id: String,
    core: Arc<ResourceCore>,
    initial_state: String,
    error_state: String,
    action_id: ActionId,
    states: RwLock<TransitionTable>,
}

impl StateMachine {
    pub(crate) fn new(
        id: impl Into<String>,
        core: Arc<ResourceCore>,
        initial_state: impl Into<String>,
        error_state: impl Into<String>,
    ) -> Self {
        let initial_state = initial_state.into();
        let error_state = error_state.into();
        let mut states = TransitionTable::new();
        states.insert(initial_state.clone(), BTreeMap::new());
        states.insert(error_state.clone(), BTreeMap::new());

        Self {
            id: id.into(),
            core,
            initial_state,
            error_state,
            action_id: ActionId::new(),
            states: RwLock::new(states),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}.{}", self.core.path, self.id)
    }

    pub fn resource_path(&self) -> &str {
        &self.core.path
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

    pub(crate) fn core(&self) -> &Arc<ResourceCore> {
        &self.core
    }

    pub fn add_state(&self, state: &str) -> Result<()> {
        let mut states = self.states.write();
        if states.contains_key(state) {
            return Err(ActionError::StateAlreadyDefined(format!(
                "{} (state machine '{}')",
                state,
                self.path()
            )));
        }
        states.insert(state.to_string(), BTreeMap::new());
        Ok(())
    }

    /// Define transition `id` from `from` to `to`. Both states must exist.
    pub fn add_transition(&self, id: &str, from: &str, to: &str) -> Result<Arc<Transition>> {
        let mut states = self.states.write();
        if !states.contains_key(to) {
            return Err(ActionError::StateNotDefined(format!(
                "{} (state machine '{}')",
                to,
                self.path()
            )));
        }
        let outgoing = states.get_mut(from).ok_or_else(|| {
            ActionError::StateNotDefined(format!("{} (state machine '{}')", from, self.path()))
        })?;
        if outgoing.contains_key(id) {
            return Err(ActionError::TransitionAlreadyDefined(format!(
                "{} from state '{}' (state machine '{}')",
                id,
                from,
                self.path()
            )));
        }

        let transition = Arc::new(Transition::new(
            id,
            self.id.clone(),
            from,
            to,
            self.error_state.clone(),
            Arc::clone(&self.core),
        ));
        outgoing.insert(id.to_string(), Arc::clone(&transition));
        Ok(transition)
    }

    pub fn transition(&self, from: &str, id: &str) -> Result<Arc<Transition>> {
        let states = self.states.read();
        let outgoing = states.get(from).ok_or_else(|| {
            ActionError::StateNotDefined(format!("{} (state machine '{}')", from, self.path()))
        })?;
        outgoing.get(id).cloned().ok_or_else(|| {
            ActionError::TransitionNotFound(format!(
                "{} from state '{}' (state machine '{}')",
                id,
                from,
                self.path()
            ))
        })
    }

    /// Transitions leaving `from`, keyed by id.
    pub fn transitions(&self, from: &str) -> Result<BTreeMap<String, Arc<Transition>>> {
        self.states.read().get(from).cloned().ok_or_else(|| {
            ActionError::StateNotDefined(format!("{} (state machine '{}')", from, self.path()))
        })
    }

    fn running_action(&self) -> RunningAction {
        RunningAction {
            id: self.action_id,
            kind: ActionKind::StateMachine,
            path: self.path(),
        }
    }

    /// Engage the resource in this state machine at its initial state.
    ///
    /// Masks and monitoring settings for the initial state are applied
    /// from the gatekeeper.
    pub fn engage(&self, gatekeeper: &GateKeeper) -> Result<()> {
        let mut data = self.core.status.lock();
        self.check_engage(&data)?;
        self.apply_engage(&mut data, gatekeeper);
        Ok(())
    }

    /// Return the resource to the disengaged null state.
    pub fn disengage(&self) -> Result<()> {
        let mut data = self.core.status.lock();
        self.check_engaged(&data, "disengage")?;
        self.apply_disengage(&mut data);
        Ok(())
    }

    /// Move back to the initial state and re-apply its masks and monitoring settings.
    pub fn reset(&self, gatekeeper: &GateKeeper) -> Result<()> {
        let mut data = self.core.status.lock();
        self.check_engaged(&data, "reset")?;
        self.apply_reset(&mut data, gatekeeper);
        Ok(())
    }

    pub(crate) fn check_engage(&self, data: &StatusData) -> Result<()> {
        BusyGuard::check(&self.core.status, data, &self.running_action(), None)?;
        if let Some(engaged) = &data.state_machine {
            let message = format!(
                "Cannot engage state machine '{}': resource '{}' is already engaged in '{}'",
                self.id, self.core.path, engaged
            );
            tracing::warn!(resource = %self.core.path, "{}", message);
            return Err(ActionError::ResourceInWrongStateMachine(message));
        }
        Ok(())
    }

    pub(crate) fn check_engaged(&self, data: &StatusData, operation: &str) -> Result<()> {
        BusyGuard::check(&self.core.status, data, &self.running_action(), None)?;
        if !data.is_engaged_in(&self.id) {
            let message = format!(
                "Cannot {} state machine '{}': resource '{}' is engaged in {:?}",
                operation, self.id, self.core.path, data.state_machine
            );
            tracing::warn!(resource = %self.core.path, "{}", message);
            return Err(ActionError::ResourceInWrongStateMachine(message));
        }
        Ok(())
    }

    pub(crate) fn apply_engage(&self, data: &mut StatusData, gatekeeper: &GateKeeper) {
        data.engage(&self.id, &self.initial_state, "engage");
        self.core.reset_and_apply_masks(gatekeeper);
        self.core.apply_monitoring_settings(gatekeeper, &self.initial_state);
        tracing::info!(
            resource = %self.core.path,
            state_machine = %self.id,
            state = %self.initial_state,
            "Engaged state machine"
        );
    }

    pub(crate) fn apply_disengage(&self, data: &mut StatusData) {
        data.disengage("disengage");
        tracing::info!(
            resource = %self.core.path,
            state_machine = %self.id,
            "Disengaged state machine"
        );
    }

    pub(crate) fn apply_reset(&self, data: &mut StatusData, gatekeeper: &GateKeeper) {
        data.set_state(&self.initial_state, "reset");
        self.core.reset_and_apply_masks(gatekeeper);
        self.core.apply_monitoring_settings(gatekeeper, &self.initial_state);
        tracing::info!(
            resource = %self.core.path,
            state_machine = %self.id,
            state = %self.initial_state,
            "Reset state machine"
        );
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("path", &self.path())
            .field("initial_state", &self.initial_state)
            .field("error_state", &self.error_state)
            .field("states", &self.states())
            .finish()
    }
}
