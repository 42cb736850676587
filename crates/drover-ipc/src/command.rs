//! Command registry and the built-in command set.
//!
//! Commands come in two flavors. Sync commands run under the worker
//! gate, serialized against timers and other sync work. Async commands
//! run immediately on the connection thread. Servers consult their
//! bound table first, then the built-ins, sync tier before async tier.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use serde_json::Value;

use drover_worker::Worker;

use crate::protocol::{reply, reply_with_payload, Params};

/// Whether the connection keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// A request handler. Gets the worker, the connection for replying,
/// and the parsed parameter. An `Err` closes the connection.
pub type CommandHandler =
    Arc<dyn Fn(&Arc<Worker>, &mut dyn Write, &Params) -> io::Result<Flow> + Send + Sync>;

/// Named commands for one server, split by sync flavor.
#[derive(Default, Clone)]
pub struct CommandTable {
    sync_handlers: HashMap<String, CommandHandler>,
    async_handlers: HashMap<String, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        CommandTable::default()
    }

    /// Registers a command that runs under the worker gate.
    pub fn sync<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Worker>, &mut dyn Write, &Params) -> io::Result<Flow> + Send + Sync + 'static,
    {
        self.sync_handlers.insert(name.into(), Arc::new(handler));
    }

    /// Registers a command that runs without taking the gate.
    pub fn asynch<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Arc<Worker>, &mut dyn Write, &Params) -> io::Result<Flow> + Send + Sync + 'static,
    {
        self.async_handlers.insert(name.into(), Arc::new(handler));
    }

    pub(crate) fn get_sync(&self, name: &str) -> Option<&CommandHandler> {
        self.sync_handlers.get(name)
    }

    pub(crate) fn get_async(&self, name: &str) -> Option<&CommandHandler> {
        self.async_handlers.get(name)
    }
}

/// The standard command set every application socket serves.
pub fn builtin_table() -> CommandTable {
    let mut table = CommandTable::new();

    table.asynch("quit", |_, out, _| {
        reply(out, 200, "OK quit.")?;
        Ok(Flow::Close)
    });

    table.asynch("get_values", |worker, out, params| {
        let map = worker.values().select(&params.selector());
        reply_with_payload(out, 200, "OK", &Value::Object(map))?;
        Ok(Flow::Continue)
    });

    table.asynch("get_values_wt", |worker, out, params| {
        let (map, locked) = worker
            .values()
            .select_with_timeout(&params.selector(), params.timeout());
        let message = if locked { "OK" } else { "OK But no lock." };
        reply_with_payload(out, 200, message, &Value::Object(map))?;
        Ok(Flow::Continue)
    });

    table.asynch("set_values", |worker, out, params| {
        match set_values_arg(params) {
            Some(entries) => {
                worker.values().set_many(entries);
                reply(out, 200, "OK")?;
            }
            None => reply(out, 400, "Bad Request.")?,
        }
        Ok(Flow::Continue)
    });

    table
}

/// Entries for a `set_values` request. `k=v` text sets one key to the
/// string `v`; a JSON object sets its fields as given. Anything else,
/// including an empty object, is rejected.
fn set_values_arg(params: &Params) -> Option<Vec<(String, Value)>> {
    if params.is_empty() {
        return None;
    }
    if let Some(bare) = params.bare() {
        let (key, value) = bare.split_once('=')?;
        if key.is_empty() || value.is_empty() {
            return None;
        }
        return Some(vec![(key.to_string(), Value::String(value.to_string()))]);
    }
    match params.as_value() {
        Value::Object(map) if !map.is_empty() => {
            Some(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        _ => None,
    }
}

// ========================================================================
// Tests
// ========================================================================
