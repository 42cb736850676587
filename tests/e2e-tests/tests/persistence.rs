//! Snapshot save and restore across worker generations.

use serde_json::json;

use drover_worker::{Worker, WorkerConfig};
use e2e_tests::{session, TestWorker};

#[test]
fn test_values_survive_a_worker_generation() {
    println!("\n========================================");
    println!("TEST: Snapshot Persistence");
    println!("========================================\n");

    let fixture = TestWorker::start("e2e-persist");

    println!("Step 1: Writing values over the command socket...");
    assert_eq!(
        session(&fixture.socket_path(), "set_values stored=yes\n"),
        "200 OK\n"
    );
    println!("✓ Value stored\n");

    println!("Step 2: Saving through the maintenance socket...");
    assert_eq!(session(&fixture.debug_socket_path(), "save\n"), "200 OK\n");
    println!("✓ Snapshot written\n");

    println!("Step 3: A new worker in the same directory restores it...");
    let config = WorkerConfig::new("e2e-persist").workdir(fixture.workdir());
    let reborn = Worker::new(config);
    reborn.load_values().expect("load snapshot");
    assert_eq!(reborn.values().get("stored"), Some(json!("yes")));
    println!("✓ Value restored\n");
}

#[test]
fn test_maintenance_socket_speaks_its_own_vocabulary() {
    let fixture = TestWorker::start("e2e-maint");
    fixture.worker.machine().set_state("ready");

    let output = session(&fixture.debug_socket_path(), "state\n");
    assert_eq!(output, "200. OK\n\"ready\"\n\n");

    let output = session(&fixture.debug_socket_path(), "dump\n");
    assert!(output.starts_with("200. OK\n"));

    // Store commands stay off the maintenance socket.
    let output = session(&fixture.debug_socket_path(), "set_values a=1\n");
    assert_eq!(output, "501 Error Command not implemented.\n");
}
