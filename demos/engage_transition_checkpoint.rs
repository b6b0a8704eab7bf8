//! Engage, Transition and Checkpoint
//!
//! This example drives a single board through its state machine.
//!
//! Key concepts:
//! - Commands with typed parameters and rules
//! - Parameters looked up from GateKeeper contexts
//! - A transition run on the worker pool and awaited with `wait`
//! - Checkpointing the board's status and restoring it later
//!
//! Run with: cargo run --example engage_transition_checkpoint

use actionable::action::{Command, ExecMode, Functionoid, ResourceBuilder, WorkerPool};
use actionable::checkpoint::StatusCheckpoint;
use actionable::config::PoolConfig;
use actionable::core::{rules, ParameterSet, TerminalState};
use actionable::gatekeeper::GateKeeper;
use std::error::Error;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Engage, Transition and Checkpoint ===\n");

    let pool = WorkerPool::started(PoolConfig::default().with_workers(2))?;
    let board = ResourceBuilder::new("board0", pool)
        .path("crate.board0")
        .contexts(["crate.board0", "crate"])
        .build();

    // Commands
    let power_on = Command::new("power_on", 0_i64, |ctx, params| {
        let volts = *params.get_as::<i64>("volts")?;
        ctx.set_progress_with_msg(0.5, format!("ramping to {volts} V"))?;
        thread::sleep(Duration::from_millis(50));
        ctx.set_result(volts);
        Ok(TerminalState::Done)
    });
    power_on.register_parameter("volts", 5_i64, rules::in_range(1_i64, 12_i64)?)?;
    let power_on = board.register_command(power_on)?;

    let load_firmware = Command::new("load_firmware", String::new(), |ctx, params| {
        let image = params.get_as::<String>("image")?.clone();
        ctx.add_execution_details("image", image.clone());
        thread::sleep(Duration::from_millis(50));
        ctx.set_result(format!("loaded {image}"));
        Ok(TerminalState::Done)
    });
    load_firmware.register_parameter_with_default_rule("image", "golden.bin".to_string())?;
    let load_firmware = board.register_command(load_firmware)?;

    // State machine
    let machine = board.register_state_machine("run", "halted", "error")?;
    machine.add_state("configured")?;
    let configure = machine.add_transition("configure", "halted", "configured")?;
    configure.then(&power_on)?.then(&load_firmware)?;

    // Configuration
    let mut site = ParameterSet::new();
    site.insert("volts", 3_i64)?;
    let mut board_params = ParameterSet::new();
    board_params.insert("load_firmware.image", "board0-v2.bin".to_string())?;
    let mut gatekeeper = GateKeeper::new();
    gatekeeper.add_parameters("crate", site)?;
    gatekeeper.add_parameters("crate.board0", board_params)?;

    println!("Missing parameters: {:?}", configure.check_for_missing_parameters(&gatekeeper));

    machine.engage(&gatekeeper)?;
    println!("Engaged: {:?}", board.status().state);

    configure.exec(&gatekeeper, ExecMode::Async)?;
    if !configure.wait(Duration::from_secs(5)) {
        return Err("transition did not finish in time".into());
    }

    let snapshot = configure.status();
    println!(
        "Transition '{}' finished as {:?} after {:?}",
        snapshot.path, snapshot.state, snapshot.running_time
    );
    for command in &snapshot.commands {
        println!("  {} -> {:?} (result: {:?})", command.id, command.state, command.result);
    }
    println!("Board state: {:?}\n", board.status().state);

    // Checkpoint and restore
    let checkpoint = board.checkpoint();
    let json = checkpoint.to_json()?;
    println!("Checkpoint ({} bytes of JSON):\n{}\n", json.len(), json);

    machine.disengage()?;
    println!("After disengage: {:?}", board.status().state);

    let restored = StatusCheckpoint::from_json(&json)?;
    board.restore(&restored)?;
    let status = board.status();
    println!(
        "After restore: machine {:?}, state {:?}",
        status.state_machine, status.state
    );
    println!("History path: {:?}", status.history.get_path());

    board.shutdown();
    Ok(())
}
