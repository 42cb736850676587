//! Maintenance socket.
//!
//! A second Unix socket at `<workdir>/<name>.debug` with its own small
//! command set for poking a live worker: inspect the machine state,
//! dump or persist the value store, or terminate the process. Kept
//! separate from the application socket so operational access can be
//! locked down independently.

use std::sync::Arc;

use serde_json::Value;

use drover_state::Selector;
use drover_worker::Worker;

use crate::command::{CommandTable, Flow};
use crate::errors::IpcResult;
use crate::protocol::{reply, reply_with_payload};
use crate::unix::UnixIpcServer;

/// Starts the maintenance server for `worker`.
pub fn start(worker: &Arc<Worker>) -> IpcResult<()> {
    UnixIpcServer::new()
        .at(worker.config().debug_socket_path())
        .with_builtins(maintenance_table())
        .start(worker)
}

/// The maintenance vocabulary. The application built-ins are absent on
/// purpose; this socket is for operators, not for value traffic.
fn maintenance_table() -> CommandTable {
    let mut table = CommandTable::new();

    table.asynch("state", |worker, out, _| {
        reply_with_payload(
            out,
            200,
            "OK",
            &Value::String(worker.machine().current_state()),
        )?;
        Ok(Flow::Continue)
    });

    table.asynch("dump", |worker, out, _| {
        let map = worker.values().select(&Selector::All);
        reply_with_payload(out, 200, "OK", &Value::Object(map))?;
        Ok(Flow::Continue)
    });

    table.asynch("save", |worker, out, _| {
        match worker.save_values() {
            Ok(()) => reply(out, 200, "OK")?,
            Err(err) => reply(out, 400, &format!("Bad Request. {}", err))?,
        }
        Ok(Flow::Continue)
    });

    table.asynch("terminate", |worker, out, _| {
        reply(out, 200, "OK program terminate.")?;
        worker.shutdown();
    });

    table.asynch("quit", |_, out, _| {
        reply(out, 200, "OK quit.")?;
        Ok(Flow::Close)
    });

    table
}

// ========================================================================
// Tests
// ========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use drover_worker::WorkerConfig;
    use serde_json::json;
    use std::io::{BufReader, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::Duration;
    use tempfile::tempdir;

    fn maintenance_session(send: &str) -> (tempfile::TempDir, Arc<Worker>, String) {
        let dir = tempdir().expect("tempdir");
        let worker = Arc::new(Worker::new(WorkerConfig::new("w").workdir(dir.path())));
        worker.machine().set_state("idle");
        worker.values().set("a", json!(1));
        start(&worker).expect("maintenance server");

        let path = worker.config().debug_socket_path();
        let mut stream = None;
        for _ in 0..50 {
            match UnixStream::connect(&path) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(20)),
            }
        }
        let mut client = BufReader::new(stream.expect("maintenance socket up"));
        client.get_mut().write_all(send.as_bytes()).expect("send");
        client
            .get_mut()
            .shutdown(std::net::Shutdown::Write)
            .expect("half close");
        let mut received = String::new();
        client.read_to_string(&mut received).expect("replies");
        (dir, worker, received)
    }

    #[test]
    fn test_state_and_dump() {
        let (_dir, _worker, received) = maintenance_session("state\ndump\nquit\n");
        assert_eq!(
            received,
            "200. OK\n\"idle\"\n\n200. OK\n{\"a\":1}\n\n200 OK quit.\n"
        );
    }

    #[test]
    fn test_save_writes_the_snapshot() {
        let (_dir, worker, received) = maintenance_session("save\nquit\n");
        assert_eq!(received, "200 OK\n200 OK quit.\n");
        assert!(worker.snapshot().path().exists());
    }

    #[test]
    fn test_value_commands_are_not_served_here() {
        let (_dir, _worker, received) = maintenance_session("get_values\nquit\n");
        assert_eq!(
            received,
            "501 Error Command not implemented.\n200 OK quit.\n"
        );
    }
}
