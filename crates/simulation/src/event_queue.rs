//! Deterministic event queue.

use crate::NodeIndex;
use std::collections::BTreeMap;
use std::time::Duration;
use vsync_core::Event;

/// Ordering key of a scheduled event.
///
/// Events are ordered by delivery time, then by scheduling order. With a
/// fixed network latency this keeps every channel FIFO and every broadcast
/// in the same relative order at all receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Simulated delivery time.
    pub time: Duration,
    /// Scheduling sequence number.
    pub seq: u64,
}

/// Events waiting for delivery.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: BTreeMap<EventKey, (NodeIndex, Event)>,
    next_seq: u64,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` for `node` at `time`.
    pub fn schedule(&mut self, time: Duration, node: NodeIndex, event: Event) -> EventKey {
        let key = EventKey {
            time,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.queue.insert(key, (node, event));
        key
    }

    /// Remove the earliest event.
    pub fn pop(&mut self) -> Option<(EventKey, NodeIndex, Event)> {
        self.queue
            .pop_first()
            .map(|(key, (node, event))| (key, node, event))
    }

    /// Number of scheduled events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
