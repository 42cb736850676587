//! Supervising child programs end to end.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use drover_common::SyncGate;
use drover_program::{Program, ProgramError, Signal, Supervisor, WaitOutcome};
use e2e_tests::wait_until;

fn supervisor() -> Arc<Supervisor> {
    Arc::new(Supervisor::new(Arc::new(SyncGate::new())))
}

#[test]
fn test_completion_hook_runs_after_reap() {
    println!("\n========================================");
    println!("TEST: Completion Hook");
    println!("========================================\n");

    let supervisor = supervisor();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    println!("Step 1: Running a short program with a hook...");
    supervisor
        .run_with(Program::new("true"), move |handle| {
            let success = handle.exit_status().map(|status| status.success());
            tx.lock().expect("lock").send(success).ok();
        })
        .expect("spawn");

    println!("Step 2: Waiting for the hook...");
    let success = rx.recv_timeout(Duration::from_secs(5)).expect("hook ran");
    assert_eq!(success, Some(true));
    println!("✓ Hook saw a clean exit\n");

    println!("Step 3: The registry forgets finished programs...");
    assert!(wait_until(Duration::from_secs(2), || supervisor.is_empty()));
    println!("✓ Registry is empty\n");
}

#[test]
fn test_single_run_policy_rejects_second_instance() {
    let supervisor = supervisor();
    let handle = supervisor
        .run(Program::new("sleep").arg("10").name("lone"))
        .expect("spawn");

    let err = supervisor
        .run(Program::new("sleep").arg("10").name("lone"))
        .expect_err("second instance refused");
    assert!(matches!(err, ProgramError::AlreadyRunning { .. }));

    handle.kill(Signal::SIGTERM);
    assert!(matches!(
        handle.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
}

#[test]
fn test_plural_instances_share_a_command() {
    let supervisor = supervisor();
    let first = supervisor
        .run(Program::new("sleep").arg("10").plural())
        .expect("spawn first");
    let second = supervisor
        .run(Program::new("sleep").arg("10").plural())
        .expect("spawn second");
    assert_ne!(first.name(), second.name());
    assert_eq!(supervisor.len(), 2);

    // One signal call reaches every instance of the command.
    assert_eq!(supervisor.kill("sleep", Signal::SIGTERM), 2);
    assert!(matches!(
        first.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
    assert!(matches!(
        second.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
    assert!(wait_until(Duration::from_secs(2), || supervisor.is_empty()));
}

#[test]
fn test_shutdown_escalates_to_kill() {
    println!("\n========================================");
    println!("TEST: Shutdown Escalation");
    println!("========================================\n");

    let supervisor = supervisor();

    println!("Step 1: One polite child, one that ignores SIGTERM...");
    let stubborn = supervisor
        .run(
            Program::new("sh")
                .arg("-c")
                .arg("trap '' TERM; exec sleep 60")
                .name("stubborn"),
        )
        .expect("spawn stubborn");
    let polite = supervisor
        .run(Program::new("sleep").arg("60").name("polite"))
        .expect("spawn polite");
    println!("✓ Both running\n");

    println!("Step 2: Shutdown with a short grace period...");
    supervisor.shutdown(Duration::from_millis(500));
    println!("✓ Shutdown returned\n");

    println!("Step 3: Both children are gone...");
    assert!(matches!(
        stubborn.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
    assert!(matches!(
        polite.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
    assert!(wait_until(Duration::from_secs(2), || supervisor.is_empty()));
    println!("✓ Registry drained\n");
}

#[test]
fn test_stay_on_exit_survives_shutdown() {
    let supervisor = supervisor();
    let keeper = supervisor
        .run(Program::new("sleep").arg("30").name("keeper").stay_on_exit())
        .expect("spawn keeper");

    supervisor.shutdown(Duration::from_millis(200));
    assert!(keeper.is_alive());

    keeper.kill(Signal::SIGKILL);
    assert!(matches!(
        keeper.wait(Some(Duration::from_secs(5))),
        WaitOutcome::Exited(_)
    ));
}
