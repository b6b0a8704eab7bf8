//! Actionable resources and the actions that drive them.
//!
//! A [`Resource`] owns [`Command`]s, [`CommandSequence`]s and
//! [`StateMachine`]s. Every action that changes a resource holds a
//! [`BusyGuard`] for its whole duration, so at most one top-level action
//! runs per resource; nested actions stack on the outer action's guard.
//! Asynchronous work is submitted to an injected [`WorkerPool`].

mod command;
mod error;
mod functionoid;
mod guard;
mod machine;
mod pool;
mod resource;
mod sequence;
mod status;
mod transition;

pub use command::{
    CodeResult, Command, CommandCode, CommandContext, CommandSnapshot, ExecutionFailure,
};
pub use error::{ActionError, MissingParam, ParamRuleViolation, ParamRuleViolationList, Result};
pub use functionoid::{ActionId, ActionKind, ExecMode, Functionoid};
pub use guard::BusyGuard;
pub use machine::StateMachine;
pub use pool::{Dispatch, PoolError, Task, WorkerPool};
pub use resource::{Resource, ResourceBuilder};
pub use sequence::CommandSequence;
pub use status::{RunningAction, StatusSnapshot};
pub use transition::{Transition, TransitionSnapshot};

pub(crate) use functionoid::{Progress, Tracker};
pub(crate) use pool::panic_message;
pub(crate) use resource::ResourceCore;
pub(crate) use sequence::{find_invalid_parameters, Entry};
pub(crate) use status::{lock_ordered, ResourceStatus, StatusData};
