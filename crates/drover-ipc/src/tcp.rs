//! TCP server for the same line protocol.
//!
//! Two connection strategies. `Threaded` matches the Unix server: one
//! thread per connection against the shared worker. `Forked` serves
//! each connection from a forked child for fault isolation; the child
//! works on a copy-on-write snapshot of the worker, so values it sets
//! are not visible to the parent, and the fork itself is taken under
//! the worker gate so no sync handler is mid-flight.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use tracing::{error, warn};

use drover_worker::Worker;

use crate::command::{builtin_table, CommandTable};
use crate::errors::IpcResult;
use crate::service::{serve_connection, ServerShared};

pub const DEFAULT_TCP_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_TCP_PORT: u16 = 1944;

/// How connections are isolated from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStrategy {
    /// One thread per connection.
    #[default]
    Threaded,
    /// One forked child process per connection.
    Forked,
}

/// Builder-style TCP server.
pub struct TcpIpcServer {
    address: String,
    port: u16,
    strategy: ConnectionStrategy,
    banner: Option<String>,
    commands: CommandTable,
    builtins: CommandTable,
}

impl TcpIpcServer {
    pub fn new() -> Self {
        TcpIpcServer {
            address: DEFAULT_TCP_ADDRESS.to_string(),
            port: DEFAULT_TCP_PORT,
            strategy: ConnectionStrategy::default(),
            banner: None,
            commands: CommandTable::new(),
            builtins: builtin_table(),
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn strategy(mut self, strategy: ConnectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Line sent to every client right after it connects.
    pub fn banner(mut self, text: impl Into<String>) -> Self {
        self.banner = Some(text.into());
        self
    }

    /// The server's own command table, consulted before the built-ins.
    pub fn commands(&mut self) -> &mut CommandTable {
        &mut self.commands
    }

    /// Binds the listener and starts accepting. Returns the bound
    /// address, which pins down the port when 0 was requested.
    pub fn start(self, worker: &Arc<Worker>) -> IpcResult<SocketAddr> {
        let listener = TcpListener::bind((self.address.as_str(), self.port))?;
        let local = listener.local_addr()?;

        let shared = Arc::new(ServerShared::new(
            worker.clone(),
            self.commands,
            self.builtins,
            self.banner,
        ));
        let strategy = self.strategy;

        thread::Builder::new()
            .name("tcp-accept".to_string())
            .spawn(move || loop {
                let (sock, addr) = match listener.accept() {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!("TCP accept failed: {}", err);
                        continue;
                    }
                };
                let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

                match strategy {
                    ConnectionStrategy::Threaded => {
                        let shared = shared.clone();
                        thread::spawn(move || serve_tcp(&shared, sock, addr, id));
                    }
                    ConnectionStrategy::Forked => {
                        let fork_result = {
                            let gate = shared.worker.gate();
                            let _guard = gate.lock();
                            unsafe { fork() }
                        };
                        match fork_result {
                            Ok(ForkResult::Child) => {
                                drop(listener);
                                serve_tcp(&shared, sock, addr, id);
                                process::exit(0);
                            }
                            Ok(ForkResult::Parent { child }) => {
                                drop(sock);
                                thread::spawn(move || {
                                    waitpid(child, None).ok();
                                });
                            }
                            Err(err) => error!("fork for TCP connection failed: {}", err),
                        }
                    }
                }
            })?;
        Ok(local)
    }
}

impl Default for TcpIpcServer {
    fn default() -> Self {
        TcpIpcServer::new()
    }
}

fn serve_tcp(shared: &ServerShared, sock: TcpStream, addr: SocketAddr, id: u64) {
    let ctx = shared.context(format!("TCP({})", id), Some(addr.ip().to_string()));
    serve_connection(ctx, sock);
}

// ========================================================================
// Tests
// ========================================================================
