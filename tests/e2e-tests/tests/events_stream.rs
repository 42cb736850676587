//! Streaming queue messages to a socket client.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};

use drover_ipc::{CommandTable, Flow};
use drover_message::NumberedQueue;
use e2e_tests::TestWorker;

fn streaming_commands(queue: &Arc<NumberedQueue>) -> CommandTable {
    let mut commands = CommandTable::new();
    let events = Arc::clone(queue);
    commands.asynch("events", move |_worker, out, params| {
        let timeout = params.timeout();
        writeln!(out, "200. OK")?;
        out.flush()?;

        let mut failed = false;
        events.cycle(1, Some(timeout), |message| {
            if failed {
                return;
            }
            let outcome = serde_json::to_string(message)
                .map_err(std::io::Error::from)
                .and_then(|text| writeln!(out, "{}", text))
                .and_then(|_| out.flush());
            failed = outcome.is_err();
        });

        writeln!(out)?;
        out.flush()?;
        Ok(Flow::Continue)
    });
    commands
}

fn publish(queue: &NumberedQueue, seq: u64) {
    let mut fields = Map::new();
    fields.insert("seq".to_string(), json!(seq));
    queue.send(fields);
}

#[test]
fn test_events_stream_follows_the_queue() {
    let queue = Arc::new(NumberedQueue::default());
    let fixture = TestWorker::start_with("e2e-events", streaming_commands(&queue));

    // One message waits in the queue before the client asks.
    publish(&queue, 1);

    let mut stream = UnixStream::connect(fixture.socket_path()).expect("connect");
    stream.write_all(b"events\n").expect("write");
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));

    let mut status = String::new();
    reader.read_line(&mut status).expect("status");
    assert_eq!(status, "200. OK\n");

    // Two more arrive while the stream is live.
    let publisher = thread::spawn(move || {
        for seq in 2..=3 {
            thread::sleep(Duration::from_millis(50));
            publish(&queue, seq);
        }
    });

    let mut tids = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("line");
        let chomped = line.trim_end();
        if chomped.is_empty() {
            break;
        }
        let message: Value = serde_json::from_str(chomped).expect("json");
        tids.push(message["TID"].as_u64().expect("tid"));
    }
    publisher.join().expect("join");

    assert_eq!(tids, vec![1, 2, 3]);
}
