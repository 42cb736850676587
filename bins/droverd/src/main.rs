use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use drover_ipc::{
    debug, reply, reply_with_payload, CommandTable, ConnectionStrategy, Flow, Params, TcpIpcServer,
    UnixIpcServer,
};
use drover_message::NumberedQueue;
use drover_timer::Timer;
use drover_worker::{
    Machine, RunMode, Runner, Worker, WorkerConfig, BOOTSTRAP_EXIT_CODE, DEFAULT_NAME,
    DEFAULT_WORKDIR,
};

/// How long a `run` request keeps the worker in the busy state.
const BUSY_PERIOD: Duration = Duration::from_secs(2);

/// Interval between heartbeat messages on the event queue.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Reference worker daemon built on the drover crates
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker name; also names the socket, pid and log files
    #[arg(short, long, default_value = DEFAULT_NAME)]
    name: String,

    /// Directory for runtime files
    #[arg(short, long, default_value = DEFAULT_WORKDIR)]
    workdir: String,

    /// Pid file path (default <workdir>/<name>.pid)
    #[arg(short, long, value_name = "FILE")]
    pid_file: Option<String>,

    /// Log file path (default <workdir>/<name>.log)
    #[arg(short, long, value_name = "FILE")]
    log_file: Option<String>,

    /// Drop privileges to this user before anything else
    #[arg(short, long)]
    user: Option<String>,

    /// Also accept commands on this TCP port
    #[arg(short, long)]
    tcp_port: Option<u16>,

    /// Serve each TCP connection from a forked child
    #[arg(long)]
    fork_tcp: bool,

    /// Stay in the foreground and log at debug level
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("ERROR: {}", err);
        process::exit(BOOTSTRAP_EXIT_CODE);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = WorkerConfig::new(args.name)
        .workdir(args.workdir)
        .debug(args.debug);
    if let Some(path) = args.pid_file {
        config = config.pid_file(path);
    }
    if let Some(path) = args.log_file {
        config = config.log_file(path);
    }
    if let Some(user) = args.user {
        config = config.privilege(user);
    }

    let worker = Arc::new(Worker::new(config));
    let queue = Arc::new(NumberedQueue::default());
    wire_machine(worker.machine(), &queue);

    let tcp_port = args.tcp_port;
    let strategy = if args.fork_tcp {
        ConnectionStrategy::Forked
    } else {
        ConnectionStrategy::Threaded
    };

    let setup_queue = Arc::clone(&queue);
    let mut runner = Runner::new(Arc::clone(&worker)).on_setup(move |worker| {
        restore_values(worker);
        start_servers(worker, &setup_queue, tcp_port, strategy)?;
        start_heartbeat(worker, &setup_queue)?;
        Ok(())
    });
    if args.debug {
        runner = runner.mode(RunMode::Foreground);
    }
    runner.run()?;
    Ok(())
}

/// Reloads the last saved values, if any. A missing snapshot is the
/// normal first run; anything else is worth a warning.
fn restore_values(worker: &Arc<Worker>) {
    match worker.load_values() {
        Ok(()) => info!("restored {} values", worker.values().len()),
        Err(err) if err.is_missing() => {}
        Err(err) => warn!("snapshot not restored: {}", err),
    }
}

fn start_servers(
    worker: &Arc<Worker>,
    queue: &Arc<NumberedQueue>,
    tcp_port: Option<u16>,
    strategy: ConnectionStrategy,
) -> drover_ipc::IpcResult<()> {
    let mut server = UnixIpcServer::new();
    bind_commands(server.commands(), queue);
    server.start(worker)?;
    info!("IPC socket '{}'", worker.config().socket_path().display());

    debug::start(worker)?;

    if let Some(port) = tcp_port {
        let mut tcp = TcpIpcServer::new().port(port).strategy(strategy);
        bind_commands(tcp.commands(), queue);
        let addr = tcp.start(worker)?;
        info!("TCP server on {}", addr);
    }
    Ok(())
}

/// Publishes a heartbeat to the event queue and keeps an uptime
/// counter in the shared values.
fn start_heartbeat(
    worker: &Arc<Worker>,
    queue: &Arc<NumberedQueue>,
) -> drover_timer::TimerResult<()> {
    let heartbeat = Timer::periodic(HEARTBEAT_INTERVAL, worker.gate());
    let values = Arc::clone(worker.values());
    let queue = Arc::clone(queue);
    let started = Instant::now();
    heartbeat.start(move || {
        let uptime = started.elapsed().as_secs();
        values.set("UPTIME", json!(uptime));
        let mut fields = Map::new();
        fields.insert("event".to_string(), json!("heartbeat"));
        fields.insert("uptime".to_string(), json!(uptime));
        queue.send(fields);
    })
}

/// The demo state machine: `run` makes an idle worker busy, `done`
/// brings it back. A `run` while busy has no handler and is refused.
fn wire_machine(machine: &Machine, queue: &Arc<NumberedQueue>) {
    machine.set_state("idle");

    let announce = Arc::clone(queue);
    machine.on_state_event("idle", "run", move |machine, args| {
        machine.set_state("busy");
        let mut fields = Map::new();
        fields.insert("event".to_string(), json!("run"));
        if let Some(request) = args.first() {
            fields.insert("request".to_string(), request.clone());
        }
        announce.send(fields);
        Ok(())
    });

    let announce = Arc::clone(queue);
    machine.on_state_event("busy", "done", move |machine, _args| {
        machine.set_state("idle");
        let mut fields = Map::new();
        fields.insert("event".to_string(), json!("done"));
        announce.send(fields);
        Ok(())
    });
}

fn bind_commands(commands: &mut CommandTable, queue: &Arc<NumberedQueue>) {
    commands.sync("state", |worker, out, _params| {
        let state = Value::String(worker.machine().current_state());
        reply_with_payload(out, 200, "OK", &state)?;
        Ok(Flow::Continue)
    });

    commands.asynch("run", |worker, out, params| {
        let request = params.as_value().clone();
        match worker.machine().trigger_event("run", &[request]) {
            Ok(()) => {
                let finisher = Timer::singleshot(BUSY_PERIOD, worker.gate());
                let done = Arc::clone(worker);
                if let Err(err) = finisher.start(move || {
                    if let Err(err) = done.machine().trigger_event("done", &[]) {
                        warn!("{}", err);
                    }
                }) {
                    warn!("busy timer: {}", err);
                }
                reply(out, 200, "OK")?;
            }
            Err(err) => reply(out, 400, &format!("Bad Request. {}", err))?,
        }
        Ok(Flow::Continue)
    });

    let events = Arc::clone(queue);
    commands.asynch("events", move |_worker, out, params| {
        stream_events(&events, out, params)
    });
}

/// Streams queue messages as JSON lines after a payload status line,
/// ending with the usual blank line once the queue stays quiet for the
/// requested timeout.
fn stream_events(
    queue: &Arc<NumberedQueue>,
    out: &mut dyn Write,
    params: &Params,
) -> io::Result<Flow> {
    let since = params.get("tid").and_then(Value::as_u64).unwrap_or(1);
    let timeout = params.timeout();

    writeln!(out, "200. OK")?;
    out.flush()?;

    let mut failed: Option<io::Error> = None;
    queue.cycle(since, Some(timeout), |message| {
        if failed.is_some() {
            return;
        }
        let outcome = serde_json::to_string(message)
            .map_err(io::Error::from)
            .and_then(|text| writeln!(out, "{}", text))
            .and_then(|_| out.flush());
        if let Err(err) = outcome {
            failed = Some(err);
        }
    });
    if let Some(err) = failed {
        return Err(err);
    }

    writeln!(out)?;
    out.flush()?;
    Ok(Flow::Continue)
}
