//! Systems: resources composed of child resources.

use super::machine::SystemStateMachine;
use crate::action::{ActionError, Resource, ResourceBuilder, ResourceCore, Result, StatusSnapshot};
use crate::core::MonitoringStatus;
use crate::gatekeeper::GateKeeper;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The system's own resource core plus its children, shared with its state machines.
pub(crate) struct SystemCore {
    pub resource: Arc<ResourceCore>,
    children: RwLock<BTreeMap<String, Arc<Resource>>>,
}

impl SystemCore {
    pub fn children(&self) -> Vec<Arc<Resource>> {
        self.children.read().values().cloned().collect()
    }

    /// The child whose core is `core`, if any.
    pub fn child_with_core(&self, core: &Arc<ResourceCore>) -> Option<Arc<Resource>> {
        self.children
            .read()
            .values()
            .find(|child| Arc::ptr_eq(child.core(), core))
            .cloned()
    }
}

impl ResourceBuilder {
    /// Build a [`System`] instead of a plain resource.
    pub fn build_system(self) -> System {
        System {
            core: Arc::new(SystemCore {
                resource: Arc::new(self.into_core()),
                children: RwLock::new(BTreeMap::new()),
            }),
            state_machines: RwLock::new(BTreeMap::new()),
        }
    }
}

/// A resource driving a set of child resources through coordinated state machines.
///
/// # Example
///
/// ```rust
/// use actionable::action::{ResourceBuilder, WorkerPool};
/// use actionable::config::PoolConfig;
///
/// let pool = WorkerPool::started(PoolConfig::default()).unwrap();
/// let system = ResourceBuilder::new("crate1", pool.clone()).build_system();
/// system
///     .add_child(ResourceBuilder::new("board0", pool).path("crate1.board0").build())
///     .unwrap();
///
/// assert_eq!(system.children(), vec!["board0"]);
/// ```
pub struct System {
    core: Arc<SystemCore>,
    state_machines: RwLock<BTreeMap<String, Arc<SystemStateMachine>>>,
}

impl System {
    pub fn id(&self) -> &str {
        &self.core.resource.id
    }

    pub fn path(&self) -> &str {
        &self.core.resource.path
    }

    pub fn contexts(&self) -> &[String] {
        &self.core.resource.contexts
    }

    pub fn add_child(&self, child: Resource) -> Result<Arc<Resource>> {
        let mut children = self.core.children.write();
        if children.contains_key(child.id()) {
            return Err(ActionError::ChildAlreadyExists(format!(
                "{} (system '{}')",
                child.id(),
                self.path()
            )));
        }
        let child = Arc::new(child);
        children.insert(child.id().to_string(), Arc::clone(&child));
        tracing::debug!(system = %self.path(), child = %child.path(), "Added child resource");
        Ok(child)
    }

    pub fn child(&self, id: &str) -> Result<Arc<Resource>> {
        self.core
            .children
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ActionError::ChildNotFound(format!("{} (system '{}')", id, self.path())))
    }

    pub fn children(&self) -> Vec<String> {
        self.core.children.read().keys().cloned().collect()
    }

    pub fn register_state_machine(
        &self,
        id: &str,
        initial_state: &str,
        error_state: &str,
    ) -> Result<Arc<SystemStateMachine>> {
        let mut machines = self.state_machines.write();
        if machines.contains_key(id) {
            return Err(ActionError::StateMachineAlreadyExists(id.to_string()));
        }
        let machine = Arc::new(SystemStateMachine::new(
            id,
            Arc::clone(&self.core),
            initial_state,
            error_state,
        ));
        machines.insert(id.to_string(), Arc::clone(&machine));
        Ok(machine)
    }

    pub fn state_machine(&self, id: &str) -> Result<Arc<SystemStateMachine>> {
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
        self.core.resource.status.lock().enabled = true;
    }

    pub fn disable(&self) {
        self.core.resource.status.lock().enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.core.resource.status.lock().enabled
    }

    pub fn reset_and_apply_masks(&self, gatekeeper: &GateKeeper) {
        self.core.resource.reset_and_apply_masks(gatekeeper);
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        self.core.resource.monitoring_status()
    }

    pub fn set_monitoring_status(&self, status: MonitoringStatus) {
        self.core.resource.set_monitoring_status(status);
    }

    pub fn status(&self) -> StatusSnapshot {
        self.core.resource.status.snapshot()
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("core", &self.core.resource)
            .field("children", &self.children())
            .field("state_machines", &self.state_machines())
            .finish()
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.core.resource.kill();
    }
}
