//! Inbound events delivered by the transport.

use crate::ViewChangeRequest;
use std::time::Duration;
use vsync_types::{EndpointId, Rank, SendKind, TransferId, ViewState};

/// Events a member state machine reacts to.
///
/// All of these originate in the transport (the protocol thread). Calls made
/// by the application go through the member's own methods instead, because
/// they have to return errors synchronously.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Membership
    // ═══════════════════════════════════════════════════════════════════════
    /// A view change is starting. Members compute the candidate view, block
    /// and acknowledge with `BlockOk`.
    ViewChangeProposed(ViewChangeRequest),

    /// The transport asks the member to block without describing the change.
    BlockRequested,

    /// A new view is ready to install. Authoritative: if it differs from the
    /// locally computed candidate, the delivered view wins.
    ViewDelivered {
        view: Box<ViewState>,
        /// Message the coordinator attached to the view, if any.
        view_message: Option<Vec<u8>>,
    },

    /// The transport confirmed that this member has left the group.
    ExitConfirmed,

    // ═══════════════════════════════════════════════════════════════════════
    // Data
    // ═══════════════════════════════════════════════════════════════════════
    /// An application message arrived.
    MessageReceived {
        origin: Rank,
        kind: SendKind,
        payload: Vec<u8>,
    },

    /// Periodic heartbeat.
    Heartbeat { now: Duration },

    /// Flow control toward `rank` (or the whole group) switched on or off.
    FlowBlock { rank: Option<Rank>, on: bool },

    // ═══════════════════════════════════════════════════════════════════════
    // State Transfer
    // ═══════════════════════════════════════════════════════════════════════
    /// Another member asks for our state.
    StateRequested {
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    },

    /// A provider answered one of our state requests.
    StateReplied {
        from: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    },
}

impl Event {
    /// Get a human-readable name for this event type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ViewChangeProposed(_) => "ViewChangeProposed",
            Event::BlockRequested => "BlockRequested",
            Event::ViewDelivered { .. } => "ViewDelivered",
            Event::ExitConfirmed => "ExitConfirmed",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::Heartbeat { .. } => "Heartbeat",
            Event::FlowBlock { .. } => "FlowBlock",
            Event::StateRequested { .. } => "StateRequested",
            Event::StateReplied { .. } => "StateReplied",
        }
    }

    /// Build a view delivery without a view message.
    pub fn view(view: ViewState) -> Self {
        Event::ViewDelivered {
            view: Box::new(view),
            view_message: None,
        }
    }
}
