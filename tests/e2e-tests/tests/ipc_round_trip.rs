//! Full client/server round trips over the Unix command socket.

use serde_json::{json, Map, Value};

use drover_ipc::IpcClient;
use e2e_tests::{session, TestWorker};

#[test]
fn test_client_set_and_get_round_trip() {
    println!("\n========================================");
    println!("TEST: Client Set/Get Round Trip");
    println!("========================================\n");

    let fixture = TestWorker::start("e2e-ipc");
    let mut client = IpcClient::connect(fixture.socket_path()).expect("connect");

    println!("Step 1: Setting a value...");
    client.set_value("alpha", json!("1")).expect("set alpha");
    assert_eq!(client.status(), "200 OK");
    println!("✓ Set accepted\n");

    println!("Step 2: Reading it back through the server...");
    assert_eq!(client.get_value("alpha"), Some(json!("1")));
    println!("✓ Value round-tripped\n");

    println!("Step 3: Server side sees the same value...");
    assert_eq!(fixture.worker.values().get("alpha"), Some(json!("1")));
    println!("✓ Shared state updated\n");

    println!("Step 4: Batch set, then select a subset...");
    let mut batch = Map::new();
    batch.insert("beta".to_string(), json!(2));
    batch.insert("gamma".to_string(), json!([3, 4]));
    client.set_values(batch).expect("set batch");

    let picked = client.get_values(&["alpha", "gamma", "ghost"]).expect("get");
    assert_eq!(picked.get("alpha"), Some(&json!("1")));
    assert_eq!(picked.get("gamma"), Some(&json!([3, 4])));
    assert_eq!(picked.get("ghost"), Some(&Value::Null));
    println!("✓ Selection with a missing key behaves\n");

    println!("Step 5: get_all replaces the local cache...");
    let all = client.get_all().expect("get_all");
    assert_eq!(all.len(), 3);
    assert_eq!(client.values().len(), 3);
    println!("✓ Cache matches the server\n");
}

#[test]
fn test_bare_assignment_and_wire_shapes() {
    let fixture = TestWorker::start("e2e-wire");
    let path = fixture.socket_path();

    // Bare k=v stores the raw string.
    let output = session(&path, "set_values answer=42\n");
    assert_eq!(output, "200 OK\n");
    assert_eq!(fixture.worker.values().get("answer"), Some(json!("42")));

    // JSON object parameters keep their types.
    let output = session(&path, "set_values {\"count\": 7}\n");
    assert_eq!(output, "200 OK\n");
    assert_eq!(fixture.worker.values().get("count"), Some(json!(7)));

    // A payload reply is status line, JSON, blank line.
    let output = session(&path, "get_values count\n");
    assert_eq!(output, "200. OK\n{\"count\":7}\n\n");

    // Unknown commands keep the connection open for the next line.
    let output = session(&path, "no_such_command\nget_values answer\n");
    assert_eq!(
        output,
        "501 Error Command not implemented.\n200. OK\n{\"answer\":\"42\"}\n\n"
    );
}

#[test]
fn test_get_values_wt_reports_lock_state() {
    println!("\n========================================");
    println!("TEST: Timed Get Lock Reporting");
    println!("========================================\n");

    let fixture = TestWorker::start("e2e-wt");
    let mut client = IpcClient::connect(fixture.socket_path()).expect("connect");
    client.set_value("a", json!("1")).expect("set");

    println!("Step 1: Uncontended read locks fine...");
    let (value, locked) = client.get_value_wt("a", None).expect("get_value_wt");
    assert_eq!(value, json!("1"));
    assert!(locked);
    println!("✓ Lock acquired\n");

    println!("Step 2: A zero timeout never waits, so it reports no lock...");
    let (value, locked) = client.get_value_wt("a", Some(0.0)).expect("get_value_wt");
    assert_eq!(value, json!("1"));
    assert!(!locked);
    assert_eq!(client.status(), "200. OK But no lock.");
    println!("✓ Value still served, lock honestly denied\n");
}

#[test]
fn test_quit_closes_and_client_reports_closed() {
    let fixture = TestWorker::start("e2e-quit");
    let mut client = IpcClient::connect(fixture.socket_path()).expect("connect");

    assert_eq!(client.call_raw("quit", ""), Some("{}".to_string()));
    assert_eq!(client.status(), "200 OK quit.");

    // The next call finds the peer gone.
    assert!(client.call_raw("get_values", "").is_none());
    assert_eq!(client.status(), "503 Service Unavailable. IPC was closed.");
}
