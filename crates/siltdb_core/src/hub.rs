//! Change notification hub.
//!
//! The hub fans committed mutations out to live subscribers. Subscriptions
//! are per-key (only events for that key) or firehose (every event).
//! Delivery must never block the commit path: each subscriber gets a
//! bounded channel and a publish is a `try_send` - a subscriber whose
//! channel is full or disconnected is dropped, which closes its stream.
//! Events carry the key only; subscribers re-fetch values.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use tracing::debug;

/// Default per-subscriber channel capacity.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Kind of committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The key was set (inserted or overwritten).
    Set,
    /// The key was deleted.
    Delete,
}

/// A single change event, published after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Commit sequence the change belongs to.
    pub sequence: u64,
    /// Document key that changed.
    pub key: String,
    /// Kind of change.
    pub kind: ChangeKind,
}

/// A hub distributing committed changes to subscribers.
///
/// Publish order equals commit order; events within one commit are
/// published in key order. Delivery is at-least-once to currently
/// connected subscribers; there is no replay for late joiners.
pub struct ChangeHub {
    /// Per-key subscriber lists.
    by_key: RwLock<HashMap<String, Vec<SyncSender<ChangeEvent>>>>,
    /// Firehose subscribers receiving every event.
    firehose: RwLock<Vec<SyncSender<ChangeEvent>>>,
    /// Channel capacity for new subscribers.
    capacity: usize,
}

impl ChangeHub {
    /// Creates a new hub.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    /// Creates a hub with a specific per-subscriber channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_key: RwLock::new(HashMap::new()),
            firehose: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Subscribes to changes for one key.
    ///
    /// The receiver yields every future event for the key until the
    /// subscriber falls behind or disconnects.
    pub fn subscribe(&self, key: impl Into<String>) -> Receiver<ChangeEvent> {
        let (tx, rx) = sync_channel(self.capacity);
        self.by_key.write().entry(key.into()).or_default().push(tx);
        rx
    }

    /// Subscribes to every change.
    pub fn subscribe_all(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = sync_channel(self.capacity);
        self.firehose.write().push(tx);
        rx
    }

    /// Publishes a commit's events, in the order given.
    ///
    /// Enqueue is non-blocking and O(subscribers); slow or disconnected
    /// subscribers are dropped on the spot.
    pub fn publish(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }

        {
            let mut firehose = self.firehose.write();
            for event in events {
                firehose.retain(|tx| tx.try_send(event.clone()).is_ok());
            }
        }

        let mut by_key = self.by_key.write();
        for event in events {
            if let Some(subscribers) = by_key.get_mut(&event.key) {
                let before = subscribers.len();
                subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
                if subscribers.len() < before {
                    debug!(key = %event.key, dropped = before - subscribers.len(), "dropped slow subscribers");
                }
                if subscribers.is_empty() {
                    by_key.remove(&event.key);
                }
            }
        }
    }

    /// Number of live subscribers across all keys and the firehose.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.by_key.read().values().map(Vec::len).sum::<usize>() + self.firehose.read().len()
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}
