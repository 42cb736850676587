//! Connection service loop shared by the Unix and TCP servers.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tracing::debug;

use drover_common::SyncMode;
use drover_worker::Worker;

use crate::command::{CommandHandler, CommandTable, Flow};
use crate::protocol::{parse_request, reply};

/// State a listener shares with all of its connections.
pub(crate) struct ServerShared {
    pub worker: Arc<Worker>,
    pub commands: CommandTable,
    pub builtins: CommandTable,
    pub banner: Option<String>,
    pub next_id: AtomicU64,
}

impl ServerShared {
    pub fn new(
        worker: Arc<Worker>,
        commands: CommandTable,
        builtins: CommandTable,
        banner: Option<String>,
    ) -> Self {
        ServerShared {
            worker,
            commands,
            builtins,
            banner,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn context(&self, tag: String, peer: Option<String>) -> ConnectionContext<'_> {
        ConnectionContext {
            worker: &self.worker,
            bound: &self.commands,
            builtins: &self.builtins,
            banner: self.banner.as_deref(),
            tag,
            peer,
        }
    }
}

/// Everything one connection needs besides its stream.
pub(crate) struct ConnectionContext<'a> {
    pub worker: &'a Arc<Worker>,
    pub bound: &'a CommandTable,
    pub builtins: &'a CommandTable,
    pub banner: Option<&'a str>,
    /// Log prefix, e.g. `IPC(7)`.
    pub tag: String,
    /// Peer address, logged for TCP connections.
    pub peer: Option<String>,
}

enum Resolved {
    Sync(CommandHandler),
    Async(CommandHandler),
    Missing,
}

/// Bound commands win over built-ins, sync tier over async tier.
fn resolve(bound: &CommandTable, builtins: &CommandTable, command: &str) -> Resolved {
    if let Some(handler) = bound
        .get_sync(command)
        .or_else(|| builtins.get_sync(command))
    {
        return Resolved::Sync(handler.clone());
    }
    if let Some(handler) = bound
        .get_async(command)
        .or_else(|| builtins.get_async(command))
    {
        return Resolved::Async(handler.clone());
    }
    Resolved::Missing
}

/// Serves one connection until the peer closes it, a command closes
/// it, or a handler fails. Blank lines are skipped; unknown commands
/// get a 501 and keep the connection open.
pub(crate) fn serve_connection<S: Read + Write>(ctx: ConnectionContext<'_>, stream: S) {
    match &ctx.peer {
        Some(peer) => debug!("{}: START CONNECTION from {}.", ctx.tag, peer),
        None => debug!("{}: START CONNECTION.", ctx.tag),
    }

    let mut reader = BufReader::new(stream);

    if let Some(banner) = ctx.banner {
        if writeln!(reader.get_mut(), "{}", banner).is_err() {
            debug!("{}: END CONNECTION.", ctx.tag);
            return;
        }
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!("{}: read failed: {}", ctx.tag, err);
                break;
            }
        }
        let request_line = line.trim_end_matches(['\r', '\n']);
        if request_line.is_empty() {
            continue;
        }
        debug!("{}: receive '{}'", ctx.tag, request_line);

        let request = parse_request(request_line);
        let result = match resolve(ctx.bound, ctx.builtins, &request.command) {
            Resolved::Sync(handler) => {
                debug!("{}: assign '{}' (sync)", ctx.tag, request.command);
                let gate = ctx.worker.gate();
                gate.run(SyncMode::Sync, || {
                    (*handler)(ctx.worker, reader.get_mut(), &request.params)
                })
            }
            Resolved::Async(handler) => {
                debug!("{}: assign '{}' (async)", ctx.tag, request.command);
                (*handler)(ctx.worker, reader.get_mut(), &request.params)
            }
            Resolved::Missing => {
                debug!("{}: Command not implemented.", ctx.tag);
                reply(reader.get_mut(), 501, "Error Command not implemented.")
                    .map(|_| Flow::Continue)
            }
        };

        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Close) => break,
            Err(err) => {
                debug!("{}: command '{}' failed: {}", ctx.tag, request.command, err);
                break;
            }
        }
    }

    debug!("{}: END CONNECTION.", ctx.tag);
}

// ========================================================================
// Tests
// ========================================================================
