//! One-to-many message delivery between threads.
//!
//! Each subscriber gets its own buffered channel, so a message sent
//! while a subscriber is busy is held until it next waits. Subscribers
//! that went away are pruned on the next send.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

/// Broadcast channel fanning one message out to every subscriber.
#[derive(Debug, Default)]
pub struct Broadcast<T> {
    subscribers: Mutex<HashMap<u64, Sender<T>>>,
    next_key: AtomicU64,
}

/// Receiving end of a [`Broadcast`] subscription.
///
/// Dropping the waiter cancels the subscription.
#[derive(Debug)]
pub struct Waiter<'a, T> {
    broadcast: &'a Broadcast<T>,
    key: u64,
    rx: Receiver<T>,
}

impl<T: Clone> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(0),
        }
    }

    /// Register the calling thread for future messages.
    pub fn subscribe(&self) -> Waiter<'_, T> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().insert(key, tx);
        Waiter {
            broadcast: self,
            key,
            rx,
        }
    }

    /// Deliver `message` to every live subscriber. Returns how many
    /// were reached.
    pub fn send(&self, message: T) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut dead = Vec::new();
        let mut delivered = 0;
        for (key, tx) in subscribers.iter() {
            if tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*key);
            }
        }
        for key in dead {
            subscribers.remove(&key);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T> Broadcast<T> {
    fn unsubscribe(&self, key: u64) {
        self.subscribers.lock().remove(&key);
    }
}

impl<T> Waiter<'_, T> {
    /// Block until a message arrives. `None` only if the broadcast side
    /// went away.
    pub fn wait(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Block until a message arrives or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        self.broadcast.unsubscribe(self.key);
    }
}

// ============================================================================
// Tests
// ============================================================================
