//! System Steps
//!
//! This example configures a crate of three boards with one system-level
//! transition.
//!
//! Key concepts:
//! - A system whose state machine drives its children's transitions
//! - Steps run in order, children within a step run concurrently
//! - Children disabled through the GateKeeper are skipped
//! - A warning analyser summarising the finished run
//!
//! Run with: cargo run --example system_steps

use actionable::action::{Command, ExecMode, Functionoid, ResourceBuilder, WorkerPool};
use actionable::config::PoolConfig;
use actionable::core::{ParameterSet, TerminalState};
use actionable::gatekeeper::GateKeeper;
use actionable::system::System;
use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn add_board(system: &System, pool: &Arc<WorkerPool>, id: &str) -> Result<(), Box<dyn Error>> {
    let path = format!("crate.{id}");
    let board = ResourceBuilder::new(id, Arc::clone(pool))
        .path(path.clone())
        .contexts([path, "crate".to_string()])
        .build();

    let align = Command::new("align", 0_i64, |ctx, params| {
        let delay = *params.get_as::<i64>("delay_ms")?;
        thread::sleep(Duration::from_millis(delay.unsigned_abs()));
        ctx.set_result(delay);
        Ok(TerminalState::Done)
    });
    align.register_parameter_with_default_rule("delay_ms", 20_i64)?;
    let align = board.register_command(align)?;

    let start = Command::new("start", false, |ctx, _| {
        ctx.set_result(true);
        Ok(TerminalState::Warning)
    });
    let start = board.register_command(start)?;

    let machine = board.register_state_machine("run", "halted", "error")?;
    machine.add_state("aligned")?;
    machine.add_state("running")?;
    machine.add_transition("align", "halted", "aligned")?.then(&align)?;
    machine.add_transition("start", "aligned", "running")?.then(&start)?;

    system.add_child(board)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== System Steps ===\n");

    let pool = WorkerPool::started(PoolConfig::default().with_workers(4))?;
    let system = ResourceBuilder::new("crate", Arc::clone(&pool)).build_system();
    for id in ["b0", "b1", "b2"] {
        add_board(&system, &pool, id)?;
    }

    let machine = system.register_state_machine("daq", "halted", "error")?;
    machine.add_state("running")?;
    let go = machine.add_transition("go", "halted", "running")?;

    let children: Vec<_> = system
        .children()
        .iter()
        .map(|id| system.child(id))
        .collect::<Result<_, _>>()?;
    let align: Vec<_> = children
        .iter()
        .map(|board| board.state_machine("run")?.transition("halted", "align"))
        .collect::<Result<_, _>>()?;
    let start: Vec<_> = children
        .iter()
        .map(|board| board.state_machine("run")?.transition("aligned", "start"))
        .collect::<Result<_, _>>()?;
    go.add_step(align)?.add_step(start)?;
    go.register_warning_analyser(|snapshot| {
        Ok(format!(
            "{} of {} step(s) finished with warnings",
            snapshot.num_completed_steps, snapshot.total_steps
        ))
    });

    let mut site = ParameterSet::new();
    site.insert("delay_ms", 30_i64)?;
    let mut slow = ParameterSet::new();
    slow.insert("align.delay_ms", 120_i64)?;
    let mut gatekeeper = GateKeeper::new();
    gatekeeper.add_parameters("crate", site)?;
    gatekeeper.add_parameters("crate.b1", slow)?;
    gatekeeper.add_to_disabled_set("crate.b2")?;

    machine.engage(&gatekeeper)?;
    go.exec(&gatekeeper, ExecMode::Async)?;
    while !go.wait(Duration::from_millis(40)) {
        let snapshot = go.status();
        println!(
            "  progress {:>5.1}% (step {}/{})",
            snapshot.progress * 100.0,
            snapshot.num_completed_steps,
            snapshot.total_steps
        );
    }

    let snapshot = go.status();
    println!("\n'{}' finished as {:?}: {}", snapshot.path, snapshot.state, snapshot.message);
    for (index, step) in snapshot.steps.iter().enumerate() {
        println!("Step {index}:");
        for child in step {
            match child {
                Some(t) => println!("  {} -> {:?} in {:?}", t.resource, t.state, t.running_time),
                None => println!("  (disabled)"),
            }
        }
    }

    println!("\nSystem state: {:?}", system.status().state);
    for board in &children {
        println!("  {} state: {:?}", board.path(), board.status().state);
    }
    Ok(())
}
