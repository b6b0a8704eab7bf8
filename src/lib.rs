//! Actionable: busy-guarded control of hardware resources
//!
//! Actionable drives a hierarchy of independently controllable resources
//! through operator-defined workflows. Configuration comes from a layered
//! [`GateKeeper`](gatekeeper::GateKeeper) instead of hard-coded values, and
//! every control operation holds a busy guard so at most one top-level
//! action runs per resource.
//!
//! # Core Concepts
//!
//! - **Command**: one-shot user code with typed, validated parameters
//! - **Transition**: ordered commands taking a resource between states
//! - **StateMachine**: states and transitions a resource can be engaged in
//! - **System**: a resource whose state machines drive its children in steps
//!
//! # Example
//!
//! ```rust
//! use actionable::action::{Command, ExecMode, Functionoid, ResourceBuilder, WorkerPool};
//! use actionable::config::PoolConfig;
//! use actionable::core::{rules, ParameterSet, TerminalState, TypedValue};
//!
//! let pool = WorkerPool::started(PoolConfig::default()).unwrap();
//! let board = ResourceBuilder::new("board0", pool).build();
//!
//! let square = Command::new("square", 0_i64, |ctx, params| {
//!     let x = *params.get_as::<i64>("x")?;
//!     ctx.set_result(x * x);
//!     Ok(TerminalState::Done)
//! });
//! square.register_parameter("x", 2_i64, rules::greater_than(0_i64)).unwrap();
//! let square = board.register_command(square).unwrap();
//!
//! let mut params = ParameterSet::new();
//! params.insert("x", 7_i64).unwrap();
//! square.exec(&params, ExecMode::Sync).unwrap();
//!
//! assert_eq!(square.status().result, Some(TypedValue::Int(49)));
//! ```

pub mod action;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod gatekeeper;
pub mod system;

// Re-export commonly used types
pub use action::{
    ActionError, Command, ExecMode, Functionoid, Resource, ResourceBuilder, WorkerPool,
};
pub use gatekeeper::GateKeeper;
pub use system::System;
