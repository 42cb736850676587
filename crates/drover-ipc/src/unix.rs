//! Unix domain socket server.
//!
//! The application IPC surface: a listener on `<workdir>/<name>`
//! serving the line protocol, one thread per connection. A leftover
//! socket file from a crashed instance is detected by probing it and
//! removed; a live one refuses the new server.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::warn;

use drover_worker::Worker;

use crate::command::{builtin_table, CommandTable};
use crate::errors::{IpcError, IpcResult};
use crate::service::{serve_connection, ServerShared};

/// Builder-style Unix socket server.
///
/// `start` binds the socket and spawns the accept loop; the server
/// then lives for the rest of the process.
pub struct UnixIpcServer {
    path: Option<PathBuf>,
    chmod: Option<u32>,
    banner: Option<String>,
    commands: CommandTable,
    builtins: CommandTable,
}

impl UnixIpcServer {
    pub fn new() -> Self {
        UnixIpcServer {
            path: None,
            chmod: None,
            banner: None,
            commands: CommandTable::new(),
            builtins: builtin_table(),
        }
    }

    /// Overrides the socket path derived from the worker config.
    pub fn at(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// File mode applied to the socket after binding, e.g. `0o666` to
    /// open it up to other users.
    pub fn chmod(mut self, mode: u32) -> Self {
        self.chmod = Some(mode);
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

    /// Swaps the built-in set, for sockets with a different vocabulary.
    pub(crate) fn with_builtins(mut self, builtins: CommandTable) -> Self {
        self.builtins = builtins;
        self
    }

    /// Binds the socket and starts accepting connections.
    pub fn start(self, worker: &Arc<Worker>) -> IpcResult<()> {
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| worker.config().socket_path());

        probe_stale_socket(&path)?;
        let listener = UnixListener::bind(&path)?;
        if let Some(mode) = self.chmod {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))?;
        }
        worker.track_socket(path.clone());

        let shared = Arc::new(ServerShared::new(
            worker.clone(),
            self.commands,
            self.builtins,
            self.banner,
        ));

        thread::Builder::new()
            .name("ipc-accept".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    match stream {
                        Ok(sock) => {
                            let shared = shared.clone();
                            let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                            thread::spawn(move || {
                                let ctx = shared.context(format!("IPC({})", id), None);
                                serve_connection(ctx, sock);
                            });
                        }
                        Err(err) => warn!("IPC accept failed: {}", err),
                    }
                }
            })?;
        Ok(())
    }
}

impl Default for UnixIpcServer {
    fn default() -> Self {
        UnixIpcServer::new()
    }
}

/// Checks whether a socket file is live before binding over it.
fn probe_stale_socket(path: &Path) -> IpcResult<()> {
    match UnixStream::connect(path) {
        Ok(_) => Err(IpcError::already_in_use(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            // Leftover from a dead instance.
            fs::remove_file(path).ok();
            Ok(())
        }
        Err(err) => Err(IpcError::Io(err)),
    }
}

// ========================================================================
// Tests
// ========================================================================
