//! Delivery gate for sends attempted while blocked.

use std::collections::VecDeque;
use tracing::debug;
use vsync_core::OutboundMessage;
use vsync_types::{DelayedMessage, ViewState};

/// FIFO queue of deferred sends.
///
/// Sends attempted while the member is blocked (or still joining) are
/// queued here and released, in order, when the next view installs.
#[derive(Debug, Default)]
pub struct DeliveryGate {
    queue: VecDeque<DelayedMessage>,
}

impl DeliveryGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a send.
    pub fn enqueue(&mut self, message: DelayedMessage) {
        self.queue.push_back(message);
    }

    /// Number of queued sends.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Release every queued send against the newly installed `view`.
    ///
    /// The queue is emptied in FIFO order. Point-to-point destinations are
    /// ranked against `view`; sends to an endpoint that is no longer a
    /// member are dropped.
    pub fn drain(&mut self, view: &ViewState) -> Vec<OutboundMessage> {
        let mut released = Vec::with_capacity(self.queue.len());
        let mut dropped = 0;

        for message in self.queue.drain(..) {
            let destination = match &message.destination {
                Some(endpoint) => match view.rank_of(endpoint) {
                    Some(rank) => Some(rank),
                    None => {
                        debug!(
                            destination = %endpoint,
                            ltime = view.ltime.0,
                            "Dropping delayed send: destination no longer in view"
                        );
                        dropped += 1;
                        continue;
                    }
                },
                None => None,
            };
            match OutboundMessage::application(message.kind, destination, message.payload) {
                Some(outbound) => released.push(outbound),
                None => dropped += 1,
            }
        }

        if !released.is_empty() || dropped > 0 {
            debug!(
                released = released.len(),
                dropped,
                ltime = view.ltime.0,
                "Drained delivery gate"
            );
        }

        released
    }

    /// Discard every queued send. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;
    use vsync_types::{
        Address, EndpointId, LogicalTime, Rank, SendKind, ViewState, VSYNC_VERSION,
    };

    fn make_view(names: &[&str]) -> ViewState {
        ViewState {
            version: VSYNC_VERSION.to_string(),
            group_name: "test".to_string(),
            coordinator_rank: Rank(0),
            ltime: LogicalTime(2),
            is_primary: true,
            protocol: String::new(),
            use_groupd: false,
            is_transfer_view: false,
            security_key: None,
            prior_view_ids: vec![],
            params: None,
            uptime: Duration::ZERO,
            members: names.iter().map(|n| EndpointId::new(*n)).collect(),
            addresses: names.iter().map(|n| Address::new(*n)).collect(),
        }
    }

    fn delayed(kind: SendKind, destination: Option<&str>, byte: u8) -> DelayedMessage {
        DelayedMessage::new(kind, destination.map(EndpointId::new), vec![byte], LogicalTime(1))
    }

    #[traced_test]
    #[test]
    fn test_drain_is_fifo() {
        let mut gate = DeliveryGate::new();
        gate.enqueue(delayed(SendKind::Cast, None, 1));
        gate.enqueue(delayed(SendKind::Send, Some("m1"), 2));
        gate.enqueue(delayed(SendKind::SCast, None, 3));
        gate.enqueue(delayed(SendKind::LSend, None, 4));
        assert_eq!(gate.len(), 4);

        let released = gate.drain(&make_view(&["m0", "m1"]));
        let payloads: Vec<u8> = released.iter().map(|m| m.payload()[0]).collect();
        assert_eq!(payloads, vec![1, 2, 3, 4]);
        assert!(matches!(
            released[1],
            OutboundMessage::Send {
                destination: Rank(1),
                ..
            }
        ));
        assert!(gate.is_empty());
    }

    #[traced_test]
    #[test]
    fn test_drain_drops_vanished_destination() {
        let mut gate = DeliveryGate::new();
        gate.enqueue(delayed(SendKind::Send, Some("m1"), 1));
        gate.enqueue(delayed(SendKind::Cast, None, 2));

        // "m1" left; "m2" now holds its old rank.
        let released = gate.drain(&make_view(&["m0", "m2"]));
        assert_eq!(released.len(), 1);
        assert!(matches!(released[0], OutboundMessage::Cast { .. }));
        assert!(logs_contain("destination no longer in view"));
    }

    #[traced_test]
    #[test]
    fn test_drain_reranks_shifted_destination() {
        let mut gate = DeliveryGate::new();
        gate.enqueue(delayed(SendKind::Send, Some("m1"), 1));

        // A joiner sorts ahead of "m1" and pushes it to rank 2.
        let released = gate.drain(&make_view(&["m0", "m0a", "m1"]));
        assert!(matches!(
            released[0],
            OutboundMessage::Send {
                destination: Rank(2),
                ..
            }
        ));
    }

    #[test]
    fn test_clear() {
        let mut gate = DeliveryGate::new();
        gate.enqueue(delayed(SendKind::Cast, None, 1));
        assert_eq!(gate.clear(), 1);
        assert!(gate.is_empty());
    }
}
