//! Systems of resources driven together.
//!
//! A [`System`] is a resource that owns child resources. Its
//! [`SystemStateMachine`]s coordinate the children's own state machines:
//! engaging, resetting or disengaging the system does the same to every
//! enabled participant, and each [`SystemTransition`] runs steps of child
//! transitions under a single [`SystemBusyGuard`].

mod guard;
mod machine;
mod resource;
mod transition;

pub use guard::SystemBusyGuard;
pub use machine::SystemStateMachine;
pub use resource::System;
pub use transition::{SnapshotAnalyser, StepSnapshot, SystemTransition, SystemTransitionSnapshot};
