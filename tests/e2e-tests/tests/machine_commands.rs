//! A small stateful app bound onto the command socket.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use drover_ipc::{reply, reply_with_payload, CommandTable, Flow};
use drover_timer::Timer;
use e2e_tests::{session, wait_until, TestWorker};

fn app_commands() -> CommandTable {
    let mut commands = CommandTable::new();
    commands.sync("state", |worker, out, _params| {
        let state = Value::String(worker.machine().current_state());
        reply_with_payload(out, 200, "OK", &state)?;
        Ok(Flow::Continue)
    });
    commands.asynch("run", |worker, out, params| {
        let request = params.as_value().clone();
        match worker.machine().trigger_event("run", &[request]) {
            Ok(()) => reply(out, 200, "OK")?,
            Err(err) => reply(out, 400, &format!("Bad Request. {}", err))?,
        }
        Ok(Flow::Continue)
    });
    commands
}

fn wire(fixture: &TestWorker) {
    let machine = fixture.worker.machine();
    machine.set_state("idle");
    machine.on_state_event("idle", "run", |machine, _args| {
        machine.set_state("busy");
        Ok(())
    });
    machine.on_event("reset", |machine, _args| {
        machine.set_state("idle");
        Ok(())
    });
}

#[test]
fn test_bound_commands_drive_the_machine() {
    println!("\n========================================");
    println!("TEST: Bound Commands Drive The Machine");
    println!("========================================\n");

    let fixture = TestWorker::start_with("e2e-machine", app_commands());
    wire(&fixture);
    let path = fixture.socket_path();

    println!("Step 1: The machine starts idle...");
    assert_eq!(session(&path, "state\n"), "200. OK\n\"idle\"\n\n");
    println!("✓ Idle\n");

    println!("Step 2: A run request makes it busy...");
    assert_eq!(session(&path, "run\n"), "200 OK\n");
    assert_eq!(session(&path, "state\n"), "200. OK\n\"busy\"\n\n");
    println!("✓ Busy\n");

    println!("Step 3: A second run has no handler while busy...");
    assert_eq!(
        session(&path, "run\n"),
        "400 Bad Request. No action defined. state: busy, event: run\n"
    );
    println!("✓ Refused\n");

    println!("Step 4: An any-state event resets it...");
    fixture
        .worker
        .machine()
        .trigger_event("reset", &[])
        .expect("reset");
    assert_eq!(session(&path, "state\n"), "200. OK\n\"idle\"\n\n");
    println!("✓ Idle again\n");
}

#[test]
fn test_timer_ticks_show_up_over_the_socket() {
    let fixture = TestWorker::start("e2e-timer");
    let values = Arc::clone(fixture.worker.values());

    let timer = Timer::periodic(Duration::from_millis(50), fixture.worker.gate());
    let ticker = Arc::clone(&values);
    timer
        .start(move || {
            let n = ticker.get("ticks").and_then(|v| v.as_u64()).unwrap_or(0);
            ticker.set("ticks", Value::from(n + 1));
        })
        .expect("start timer");

    assert!(wait_until(Duration::from_secs(3), || {
        values.get("ticks").and_then(|v| v.as_u64()).unwrap_or(0) >= 3
    }));
    timer.stop();

    let output = session(&fixture.socket_path(), "get_values ticks\n");
    assert!(output.starts_with("200. OK\n{\"ticks\":"));
}
