//! Telnet-like console for a worker's IPC socket.
//!
//! Lines from stdin go to the socket; replies print indented. `\i FILE`
//! sends a file line by line.
//!
//! Usage: drover-call [SOCKET]

use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process;
use std::thread;

const DEFAULT_SOCKET: &str = "/tmp/drover";

fn main() {
    let path = env::args().nth(1).unwrap_or_else(|| DEFAULT_SOCKET.to_string());

    let mut sock = match UnixStream::connect(&path) {
        Ok(sock) => sock,
        Err(err) => {
            eprintln!("drover-call: {}: {}", path, err);
            process::exit(1);
        }
    };
    println!("(Socket ready '{}')", path);

    let receiver = match sock.try_clone() {
        Ok(sock) => sock,
        Err(err) => {
            eprintln!("drover-call: {}", err);
            process::exit(1);
        }
    };
    thread::spawn(move || receive_data(receiver));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if let Some(rest) = line.strip_prefix("\\i") {
            send_file(&mut sock, rest.trim());
            continue;
        }
        if writeln!(sock, "{}", line).is_err() {
            break;
        }
    }
    println!("\n(terminate)");
}

/// Prints everything the worker sends, then exits when it hangs up.
fn receive_data(sock: UnixStream) {
    let mut reader = BufReader::new(sock);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                print!("  {}", line);
                io::stdout().flush().ok();
            }
        }
    }
    println!("\n(Socket closed by peer.)");
    process::exit(0);
}

fn send_file(sock: &mut UnixStream, filename: &str) {
    let file = match File::open(filename) {
        Ok(file) => file,
        Err(err) => {
            println!("{}", err);
            return;
        }
    };
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => return,
        };
        if writeln!(sock, "{}", line).is_err() {
            return;
        }
    }
}
