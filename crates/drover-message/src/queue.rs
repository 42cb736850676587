//! Bounded message queue with monotonically increasing transaction ids.
//!
//! Producers add JSON-object messages; each gets the next transaction
//! id (tid, starting at 1) stamped into its `TID` field. The queue
//! keeps only the most recent messages, so a consumer that fell behind
//! can tell exactly that: asking for a tid that was already discarded
//! is answered differently from asking for one not produced yet.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::broadcast::Broadcast;

/// Retained messages per queue unless configured otherwise.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// A queued message: the caller's fields plus the assigned tid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "TID")]
    pub tid: u64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
struct Inner {
    tid: u64,
    queue: VecDeque<Message>,
}

/// Bounded numbered queue. Thread-safe; readers share the lock.
#[derive(Debug)]
pub struct NumberedQueue {
    capacity: usize,
    inner: RwLock<Inner>,
    broadcast: Broadcast<u64>,
}

impl Default for NumberedQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

impl NumberedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                tid: 0,
                queue: VecDeque::new(),
            }),
            broadcast: Broadcast::new(),
        }
    }

    /// Append a message, assign it the next tid and discard the oldest
    /// entries beyond capacity. Returns the assigned tid.
    pub fn add(&self, fields: Map<String, Value>) -> u64 {
        let mut inner = self.inner.write();
        inner.tid += 1;
        let tid = inner.tid;
        inner.queue.push_back(Message { tid, fields });
        while inner.queue.len() > self.capacity {
            inner.queue.pop_front();
        }
        tid
    }

    /// Fetch every retained message with a tid at or above `tid`.
    ///
    /// Returns `Some(batch)`; an empty batch means `tid` has not been
    /// produced yet (or the queue is empty). `None` means `tid` was
    /// already discarded, so the caller missed messages.
    pub fn get(&self, tid: u64) -> Option<Vec<Message>> {
        let inner = self.inner.read();
        let newest = match inner.queue.back() {
            None => return Some(Vec::new()),
            Some(message) => message.tid,
        };
        if newest < tid {
            return Some(Vec::new());
        }
        let oldest = match inner.queue.front() {
            None => return Some(Vec::new()),
            Some(message) => message.tid,
        };
        if tid < oldest {
            return None;
        }
        Some(
            inner
                .queue
                .iter()
                .filter(|message| message.tid >= tid)
                .cloned()
                .collect(),
        )
    }

    /// [`add`](Self::add), then wake every thread blocked in
    /// [`receive`](Self::receive) or [`cycle`](Self::cycle).
    pub fn send(&self, fields: Map<String, Value>) -> u64 {
        let tid = self.add(fields);
        self.broadcast.send(tid);
        std::thread::yield_now();
        tid
    }

    /// Like [`get`](Self::get), but when nothing is ready yet, block
    /// until the next [`send`](Self::send) and fetch again from the
    /// tid it assigned.
    ///
    /// The subscription is taken before the first fetch, so a send
    /// racing with it cannot be missed.
    pub fn receive(&self, tid: u64) -> Option<Vec<Message>> {
        let waiter = self.broadcast.subscribe();
        match self.get(tid) {
            Some(batch) if batch.is_empty() => match waiter.wait() {
                Some(woken) => self.get(woken),
                None => Some(Vec::new()),
            },
            other => other,
        }
    }

    /// Smallest retained tid, or 0 when the queue is empty.
    pub fn tid_min(&self) -> u64 {
        self.inner
            .read()
            .queue
            .front()
            .map(|message| message.tid)
            .unwrap_or(0)
    }

    /// Most recently assigned tid, or 0 before the first add.
    pub fn last_tid(&self) -> u64 {
        self.inner.read().tid
    }

    pub fn len(&self) -> usize {
        self.inner.read().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run `handler` for every message from `tid` on, then keep
    /// following the queue. Returns once `timeout` passes with no new
    /// message; with no timeout it follows the queue indefinitely.
    ///
    /// If `tid` was already discarded, the whole retained queue is
    /// replayed first.
    pub fn cycle<F>(&self, tid: u64, timeout: Option<Duration>, mut handler: F)
    where
        F: FnMut(&Message),
    {
        let waiter = self.broadcast.subscribe();
        let mut tid = tid;
        loop {
            let batch = match self.get(tid) {
                Some(batch) if batch.is_empty() => {
                    tid = self.last_tid();
                    Vec::new()
                }
                Some(batch) => batch,
                None => self.retained(),
            };
            for message in &batch {
                handler(message);
                tid = message.tid;
            }
            tid += 1;

            let woken = match timeout {
                Some(timeout) => waiter.wait_timeout(timeout),
                None => waiter.wait(),
            };
            if woken.is_none() {
                return;
            }
        }
    }

    fn retained(&self) -> Vec<Message> {
        self.inner.read().queue.iter().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
