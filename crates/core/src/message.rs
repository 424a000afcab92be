//! Outbound message types for the transport.

use vsync_types::{EndpointId, Rank, SendKind, TransferId};

/// Outbound transport messages.
///
/// These are the messages that a member can hand to the transport.
/// The runner performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // Application Messages
    // ═══════════════════════════════════════════════════════════════════════
    /// Point-to-point message to one member.
    Send { destination: Rank, payload: Vec<u8> },

    /// Multicast to the group.
    Cast { payload: Vec<u8> },

    /// State-aware multicast.
    SCast { payload: Vec<u8> },

    /// Local send, looped back to the sender.
    LSend { payload: Vec<u8> },

    // ═══════════════════════════════════════════════════════════════════════
    // State Transfer Messages
    // ═══════════════════════════════════════════════════════════════════════
    /// Ask the other members of the view for state.
    StateRequest { id: TransferId, payload: Vec<u8> },

    /// Answer a state request from `to`.
    StateReply {
        to: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    },
}

impl OutboundMessage {
    /// Build the transport message for an application send.
    ///
    /// Returns `None` for a point-to-point send without a destination.
    pub fn application(
        kind: SendKind,
        destination: Option<Rank>,
        payload: Vec<u8>,
    ) -> Option<Self> {
        let message = match kind {
            SendKind::Send => OutboundMessage::Send {
                destination: destination?,
                payload,
            },
            SendKind::Cast => OutboundMessage::Cast { payload },
            SendKind::SCast => OutboundMessage::SCast { payload },
            SendKind::LSend => OutboundMessage::LSend { payload },
        };
        Some(message)
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Send { .. } => "Send",
            OutboundMessage::Cast { .. } => "Cast",
            OutboundMessage::SCast { .. } => "SCast",
            OutboundMessage::LSend { .. } => "LSend",
            OutboundMessage::StateRequest { .. } => "StateRequest",
            OutboundMessage::StateReply { .. } => "StateReply",
        }
    }

    /// The send kind of an application message.
    pub fn send_kind(&self) -> Option<SendKind> {
        match self {
            OutboundMessage::Send { .. } => Some(SendKind::Send),
            OutboundMessage::Cast { .. } => Some(SendKind::Cast),
            OutboundMessage::SCast { .. } => Some(SendKind::SCast),
            OutboundMessage::LSend { .. } => Some(SendKind::LSend),
            _ => None,
        }
    }

    /// Check if this is an application message.
    pub fn is_application(&self) -> bool {
        self.send_kind().is_some()
    }

    /// Check if this is a state transfer message.
    pub fn is_state_transfer(&self) -> bool {
        matches!(
            self,
            OutboundMessage::StateRequest { .. } | OutboundMessage::StateReply { .. }
        )
    }

    /// The message body.
    pub fn payload(&self) -> &[u8] {
        match self {
            OutboundMessage::Send { payload, .. }
            | OutboundMessage::Cast { payload }
            | OutboundMessage::SCast { payload }
            | OutboundMessage::LSend { payload }
            | OutboundMessage::StateRequest { payload, .. }
            | OutboundMessage::StateReply { payload, .. } => payload,
        }
    }
}
