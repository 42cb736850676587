//! IPC surfaces for worker daemons.
//!
//! Everything speaks one line protocol: `COMMAND [param]` requests,
//! `NNN MSG` replies, JSON payloads behind a `NNN. MSG` status. On top
//! of that sit a Unix socket server ([`UnixIpcServer`]), a TCP server
//! ([`TcpIpcServer`]) with thread or fork isolation, a maintenance
//! socket ([`debug`]), and a typed client ([`IpcClient`]).

pub mod client;
pub mod command;
pub mod debug;
pub mod errors;
pub mod protocol;
mod service;
pub mod tcp;
pub mod unix;

pub use client::{IpcClient, STATUS_CLOSED};
pub use command::{builtin_table, CommandHandler, CommandTable, Flow};
pub use errors::{IpcError, IpcResult};
pub use protocol::{
    parse_request, reply, reply_with_payload, Params, Request, StatusLine, DEFAULT_READ_TIMEOUT,
};
pub use tcp::{ConnectionStrategy, TcpIpcServer, DEFAULT_TCP_ADDRESS, DEFAULT_TCP_PORT};
pub use unix::UnixIpcServer;
