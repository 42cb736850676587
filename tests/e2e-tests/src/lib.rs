// E2E helpers for exercising a worker over its IPC surfaces.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use drover_ipc::{debug, CommandTable, UnixIpcServer};
use drover_worker::{Worker, WorkerConfig};

/// A worker serving its command and maintenance sockets out of a
/// private temporary directory.
pub struct TestWorker {
    // Keeps the socket directory alive for the whole test.
    dir: TempDir,
    pub worker: Arc<Worker>,
}

impl TestWorker {
    /// Starts a worker with the built-in commands only.
    pub fn start(name: &str) -> Self {
        Self::start_with(name, CommandTable::new())
    }

    /// Starts a worker with extra bound commands on the main socket.
    pub fn start_with(name: &str, commands: CommandTable) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = WorkerConfig::new(name).workdir(dir.path());
        let worker = Arc::new(Worker::new(config));

        let mut server = UnixIpcServer::new();
        *server.commands() = commands;
        server.start(&worker).expect("start IPC server");
        debug::start(&worker).expect("start maintenance server");

        Self { dir, worker }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.worker.config().socket_path()
    }

    pub fn debug_socket_path(&self) -> PathBuf {
        self.worker.config().debug_socket_path()
    }

    pub fn workdir(&self) -> &Path {
        self.dir.path()
    }
}

/// Sends `input` over the Unix socket, half-closes the write side and
/// returns everything the server wrote back.
pub fn session(path: &Path, input: &str) -> String {
    let mut stream = UnixStream::connect(path).expect("connect");
    stream.write_all(input.as_bytes()).expect("write");
    stream.shutdown(Shutdown::Write).expect("shutdown write");
    let mut output = String::new();
    stream.read_to_string(&mut output).expect("read");
    output
}

/// The TCP flavor of [`session`].
pub fn tcp_session(addr: SocketAddr, input: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.write_all(input.as_bytes()).expect("write");
    stream.shutdown(Shutdown::Write).expect("shutdown write");
    let mut output = String::new();
    stream.read_to_string(&mut output).expect("read");
    output
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}
