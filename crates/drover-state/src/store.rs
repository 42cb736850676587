//! In-memory key/value store shared across a worker.
//!
//! Values are JSON documents. Writers take the lock exclusively; plain
//! reads take it shared. The `_with_timeout` variants poll for a shared
//! lock instead of blocking outright and report whether they got one, so
//! callers on a deadline can tell a clean read from one taken while a
//! writer was active.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::{Map, Value};

/// Pause between lock attempts in the timed read path.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which keys a bulk read returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every stored key.
    All,
    /// A single key; reported as null when absent.
    Key(String),
    /// A list of keys; absent ones are reported as null.
    Keys(Vec<String>),
}

impl Selector {
    /// Build a selector from a request parameter.
    ///
    /// A string names one key, an array names several, anything absent
    /// or null selects everything. Non-string array entries are used
    /// through their JSON text.
    pub fn from_value(value: Option<&Value>) -> Selector {
        match value {
            None | Some(Value::Null) => Selector::All,
            Some(Value::String(key)) => Selector::Key(key.clone()),
            Some(Value::Array(items)) => Selector::Keys(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Some(other) => Selector::Key(other.to_string()),
        }
    }
}

/// Shared key/value store.
#[derive(Debug, Default)]
pub struct SharedState {
    values: RwLock<HashMap<String, Value>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Store one value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.write().insert(key.into(), value);
    }

    /// Store several values under one lock acquisition.
    pub fn set_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut values = self.values.write();
        for (key, value) in entries {
            values.insert(key, value);
        }
    }

    /// Read one value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Replace the whole store, e.g. after loading a snapshot.
    pub fn replace(&self, values: HashMap<String, Value>) {
        *self.values.write() = values;
    }

    /// Read the keys named by `selector` as a JSON object.
    pub fn select(&self, selector: &Selector) -> Map<String, Value> {
        collect(&self.values.read(), selector)
    }

    /// Like [`select`](Self::select), but poll for the shared lock
    /// instead of blocking.
    ///
    /// Tries every 100ms until `timeout` is spent. When no attempt
    /// succeeds the read still happens, under a blocking lock, and the
    /// returned flag is `false` to mark the result as taken late. A
    /// zero timeout skips polling entirely and always reports `false`.
    pub fn select_with_timeout(
        &self,
        selector: &Selector,
        timeout: Duration,
    ) -> (Map<String, Value>, bool) {
        let (values, locked) = self.read_polled(timeout);
        (collect(&values, selector), locked)
    }

    /// Read one value, polling for the shared lock like
    /// [`select_with_timeout`](Self::select_with_timeout).
    pub fn get_with_timeout(&self, key: &str, timeout: Duration) -> (Option<Value>, bool) {
        let (values, locked) = self.read_polled(timeout);
        (values.get(key).cloned(), locked)
    }

    /// All entries sorted by key, for human-readable dumps.
    pub fn dump_sorted(&self) -> Vec<(String, Value)> {
        let values = self.values.read();
        let mut entries: Vec<(String, Value)> = values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    fn read_polled(&self, timeout: Duration) -> (RwLockReadGuard<'_, HashMap<String, Value>>, bool) {
        let tries = timeout.as_millis() / POLL_INTERVAL.as_millis();
        for _ in 0..tries {
            if let Some(guard) = self.values.try_read() {
                return (guard, true);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        (self.values.read(), false)
    }
}

fn collect(values: &HashMap<String, Value>, selector: &Selector) -> Map<String, Value> {
    match selector {
        Selector::All => values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Selector::Key(key) => {
            let mut map = Map::new();
            map.insert(key.clone(), values.get(key).cloned().unwrap_or(Value::Null));
            map
        }
        Selector::Keys(keys) => keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    values.get(key).cloned().unwrap_or(Value::Null),
                )
            })
            .collect(),
    }
}

// ============================================================================
// Tests
// ============================================================================
