//! Synchronous Unix socket client for the line protocol.
//!
//! Mirrors the value-store commands as typed calls and keeps a local
//! cache of every value seen, so frequent readers get merged results
//! without bookkeeping of their own.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::protocol::StatusLine;

/// Status substituted when the server side goes away mid-call.
pub const STATUS_CLOSED: &str = "503 Service Unavailable. IPC was closed.";

pub struct IpcClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    values: Map<String, Value>,
    status: String,
}

impl IpcClient {
    pub fn connect(path: impl AsRef<Path>) -> io::Result<IpcClient> {
        let writer = UnixStream::connect(path)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(IpcClient {
            reader,
            writer,
            values: Map::new(),
            status: String::new(),
        })
    }

    /// Status line of the last call, [`STATUS_CLOSED`] once the peer
    /// is gone.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Local cache of values seen through this client.
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Sends one command and collects the reply payload as raw JSON
    /// text. `None` means the connection is closed; replies without a
    /// payload come back as `"{}"`.
    pub fn call_raw(&mut self, command: &str, arg: &str) -> Option<String> {
        if writeln!(self.writer, "{} {}", command, arg).is_err() {
            self.status = STATUS_CLOSED.to_string();
            return None;
        }

        let mut status = String::new();
        match self.reader.read_line(&mut status) {
            Ok(0) | Err(_) => {
                self.status = STATUS_CLOSED.to_string();
                return None;
            }
            Ok(_) => {}
        }
        self.status = status.trim_end_matches(['\r', '\n']).to_string();

        if !StatusLine::parse(&self.status).has_payload() {
            return Some("{}".to_string());
        }

        let mut json = String::new();
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let chomped = line.trim_end_matches(['\r', '\n']);
            if chomped.is_empty() {
                break;
            }
            json.push_str(chomped);
        }
        Some(json)
    }

    /// Sends one command with a JSON argument and parses the reply
    /// payload. Unparseable payloads come back as an empty object.
    pub fn call(&mut self, command: &str, arg: &Value) -> Option<Value> {
        let raw = self.call_raw(command, &arg.to_string())?;
        Some(serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Map::new())))
    }

    /// Stores one value on the worker and in the local cache.
    pub fn set_value(&mut self, key: &str, value: Value) -> Option<()> {
        self.values.insert(key.to_string(), value.clone());
        let mut arg = Map::new();
        arg.insert(key.to_string(), value);
        self.call("set_values", &Value::Object(arg)).map(|_| ())
    }

    /// Stores several values on the worker and in the local cache.
    pub fn set_values(&mut self, values: Map<String, Value>) -> Option<()> {
        self.values.extend(values.clone());
        self.call("set_values", &Value::Object(values)).map(|_| ())
    }

    /// Reads one value. The reply is merged into the cache and the
    /// cached value returned; a key the worker does not have comes
    /// back as JSON null.
    pub fn get_value(&mut self, key: &str) -> Option<Value> {
        let ret = self.call("get_values", &json!({ "key": key }))?;
        if !self.is_success() {
            return None;
        }
        self.merge(&ret);
        Some(self.values.get(key).cloned().unwrap_or(Value::Null))
    }

    /// Reads several values; the reply is merged into the cache.
    pub fn get_values(&mut self, keys: &[&str]) -> Option<Map<String, Value>> {
        let ret = self.call("get_values", &json!({ "key": keys }))?;
        if !self.is_success() {
            return None;
        }
        self.merge(&ret);
        Some(into_object(ret))
    }

    /// Reads the whole store, replacing the cache.
    pub fn get_all(&mut self) -> Option<Map<String, Value>> {
        let ret = self.call("get_values", &json!({ "key": null }))?;
        if !self.is_success() {
            return None;
        }
        let map = into_object(ret);
        self.values = map.clone();
        Some(map)
    }

    /// Timed read of one value. The flag is false when the worker was
    /// write-locked for the whole timeout and the value was read late.
    pub fn get_value_wt(&mut self, key: &str, timeout: Option<f64>) -> Option<(Value, bool)> {
        let ret = self.call("get_values_wt", &json!({ "key": key, "timeout": timeout }))?;
        if !self.is_success() {
            return None;
        }
        let locked = self.locked();
        self.merge(&ret);
        Some((
            self.values.get(key).cloned().unwrap_or(Value::Null),
            locked,
        ))
    }

    /// Timed read of several values.
    pub fn get_values_wt(
        &mut self,
        keys: &[&str],
        timeout: Option<f64>,
    ) -> Option<(Map<String, Value>, bool)> {
        let ret = self.call("get_values_wt", &json!({ "key": keys, "timeout": timeout }))?;
        if !self.is_success() {
            return None;
        }
        let locked = self.locked();
        self.merge(&ret);
        Some((into_object(ret), locked))
    }

    /// Timed read of the whole store, replacing the cache.
    pub fn get_all_wt(&mut self, timeout: Option<f64>) -> Option<(Map<String, Value>, bool)> {
        let ret = self.call("get_values_wt", &json!({ "key": null, "timeout": timeout }))?;
        if !self.is_success() {
            return None;
        }
        let locked = self.locked();
        let map = into_object(ret);
        self.values = map.clone();
        Some((map, locked))
    }

    fn is_success(&self) -> bool {
        self.status.starts_with("200")
    }

    /// Timed reads report a clean lock with exactly `200. OK`.
    fn locked(&self) -> bool {
        self.status == "200. OK"
    }

    fn merge(&mut self, reply: &Value) {
        if let Value::Object(map) = reply {
            self.values.extend(map.clone());
        }
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ========================================================================
// Tests
// ========================================================================
