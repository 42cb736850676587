//! Event-driven state machine.
//!
//! A worker routes incoming events through a [`Machine`]: handlers are
//! registered against states and events, and [`Machine::trigger_event`]
//! picks the most specific one. Lookup order for state `S` and event `E`:
//!
//! 1. transition handler for `(S, E)`
//! 2. state/event handler for `(S, E)`
//! 3. event handler for `E` (any state)
//! 4. state handler for `S` (any event)
//!
//! The first match wins. If nothing matches, dispatch fails with
//! [`DispatchError::NoHandler`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use crate::errors::{DispatchError, DispatchResult};

/// Handler invoked when an event is dispatched.
///
/// Handlers receive the machine itself (so they can change state or fire
/// follow-up events) and the arguments passed to `trigger_event`.
pub type EventHandler = Arc<dyn Fn(&Machine, &[Value]) -> DispatchResult<()> + Send + Sync>;

/// Handler that accepts the event and does nothing.
///
/// Register it where an event is expected but needs no action, so
/// dispatch does not fail with `NoHandler`.
pub fn noop(_machine: &Machine, _args: &[Value]) -> DispatchResult<()> {
    Ok(())
}

#[derive(Default)]
struct HandlerTable {
    transition: HashMap<(String, String), EventHandler>,
    state_event: HashMap<(String, String), EventHandler>,
    event: HashMap<String, EventHandler>,
    state: HashMap<String, EventHandler>,
}

/// State machine with tiered event handlers.
///
/// The current state is a plain string; handlers move the machine along
/// by calling [`Machine::set_state`]. All methods take `&self`, so the
/// machine can be shared across connection threads.
pub struct Machine {
    state: Mutex<String>,
    table: RwLock<HandlerTable>,
}

impl Machine {
    /// Creates a machine with an empty state and no handlers.
    pub fn new() -> Self {
        Machine {
            state: Mutex::new(String::new()),
            table: RwLock::new(HandlerTable::default()),
        }
    }

    /// Returns the current state.
    pub fn current_state(&self) -> String {
        self.state.lock().clone()
    }

    /// Sets the current state.
    pub fn set_state(&self, state: impl Into<String>) {
        let state = state.into();
        debug!("change state to {}", state);
        *self.state.lock() = state;
    }

    /// Registers a transition handler for `(state, event)`. Highest
    /// priority tier.
    pub fn on_transition<F>(&self, state: impl Into<String>, event: impl Into<String>, handler: F)
    where
        F: Fn(&Machine, &[Value]) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.table
            .write()
            .transition
            .insert((state.into(), event.into()), Arc::new(handler));
    }

    /// Registers a handler for `event` while in `state`.
    pub fn on_state_event<F>(&self, state: impl Into<String>, event: impl Into<String>, handler: F)
    where
        F: Fn(&Machine, &[Value]) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.table
            .write()
            .state_event
            .insert((state.into(), event.into()), Arc::new(handler));
    }

    /// Registers a handler for `event` in any state.
    pub fn on_event<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Machine, &[Value]) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.table.write().event.insert(event.into(), Arc::new(handler));
    }

    /// Registers a catch-all handler for any event while in `state`.
    /// Lowest priority tier.
    pub fn on_state<F>(&self, state: impl Into<String>, handler: F)
    where
        F: Fn(&Machine, &[Value]) -> DispatchResult<()> + Send + Sync + 'static,
    {
        self.table.write().state.insert(state.into(), Arc::new(handler));
    }

    /// Dispatches `event` against the current state.
    ///
    /// The matched handler runs on the calling thread. Handlers may
    /// register further handlers or change state; the table lock is not
    /// held across the call.
    pub fn trigger_event(&self, event: &str, args: &[Value]) -> DispatchResult<()> {
        let state = self.current_state();
        let found = {
            let table = self.table.read();
            let key = (state.clone(), event.to_string());
            if let Some(handler) = table.transition.get(&key) {
                Some((format!("from_{}_event_{}", state, event), handler.clone()))
            } else if let Some(handler) = table.state_event.get(&key) {
                Some((format!("state_{}_event_{}", state, event), handler.clone()))
            } else if let Some(handler) = table.event.get(event) {
                Some((format!("event_{}", event), handler.clone()))
            } else if let Some(handler) = table.state.get(&state) {
                Some((format!("state_{}", state), handler.clone()))
            } else {
                None
            }
        };

        match found {
            Some((name, handler)) => {
                debug!("st:{} ev:{} call:{}", state, event, name);
                handler(self, args)
            }
            None => Err(DispatchError::no_handler(state, event)),
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

// ========================================================================
// Tests
// ========================================================================
