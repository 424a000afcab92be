//! Actions returned by state machines.

use crate::{MembershipError, OutboundMessage};
use std::time::Duration;
use vsync_types::{
    EndpointId, JoinOptions, LocalState, Rank, TransferId, ViewState, XferStatus,
};

/// Transport downcalls other than data transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupControl {
    /// Report members as failure-suspected.
    Suspect(Vec<Rank>),
    /// Ask for a new view to be installed.
    Prompt,
    /// Ask for the group key to be refreshed.
    Rekey,
    /// Switch to a different protocol stack.
    ChangeProtocol(String),
    /// Switch to a different property list.
    ChangeProperties(String),
    /// State transfer for this view is complete.
    XferDone,
    /// Attach a message to the next view (coordinator only).
    ViewMessage(Vec<u8>),
}

/// Application-visible notifications.
///
/// The runner turns each of these into exactly one callback invocation,
/// with the member lock released.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A view change is starting; the application must quiesce.
    Block,
    /// A new view was installed.
    AcceptedView {
        view: Box<ViewState>,
        local: LocalState,
    },
    /// The coordinator attached a message to the installed view.
    ViewMessage { origin: EndpointId, payload: Vec<u8> },
    /// The member has left the group. Final.
    Exit,
    /// A multicast arrived.
    ReceiveCast { origin: Rank, payload: Vec<u8> },
    /// A point-to-point message arrived.
    ReceiveSend { origin: Rank, payload: Vec<u8> },
    /// Periodic heartbeat.
    Heartbeat { now: Duration },
    /// Flow control toward `rank` (or the group) changed.
    FlowBlock { rank: Option<Rank>, on: bool },
    /// Another member asks for our state; answer with `send_state`.
    AskState {
        origin: EndpointId,
        id: TransferId,
        payload: Vec<u8>,
    },
    /// A synchronous transfer resolved.
    StateTransfer { id: TransferId, status: XferStatus },
    /// An asynchronous transfer produced state.
    GotState { id: TransferId, payload: Vec<u8> },
    /// An asynchronous transfer was canceled before any provider answered.
    XferCanceled { id: TransferId },
    /// Primary-only member saw a non-primary view. Fatal.
    QuorumLost(MembershipError),
}

impl Notification {
    /// Get a human-readable name for this notification.
    pub fn type_name(&self) -> &'static str {
        match self {
            Notification::Block => "Block",
            Notification::AcceptedView { .. } => "AcceptedView",
            Notification::ViewMessage { .. } => "ViewMessage",
            Notification::Exit => "Exit",
            Notification::ReceiveCast { .. } => "ReceiveCast",
            Notification::ReceiveSend { .. } => "ReceiveSend",
            Notification::Heartbeat { .. } => "Heartbeat",
            Notification::FlowBlock { .. } => "FlowBlock",
            Notification::AskState { .. } => "AskState",
            Notification::StateTransfer { .. } => "StateTransfer",
            Notification::GotState { .. } => "GotState",
            Notification::XferCanceled { .. } => "XferCanceled",
            Notification::QuorumLost(_) => "QuorumLost",
        }
    }
}

/// Actions a state machine asks the runner to perform.
#[derive(Debug, Clone)]
pub enum Action {
    /// Hand a message to the transport.
    Transmit(OutboundMessage),

    /// Ask the transport to join a group.
    RequestJoin(JoinOptions),

    /// Ask the transport to remove this member from the group.
    RequestLeave,

    /// Acknowledge a block request.
    BlockOk,

    /// Other transport downcalls.
    Control(GroupControl),

    /// Invoke an application callback.
    Notify(Notification),
}

impl Action {
    /// Check whether the action is a transport downcall.
    ///
    /// Downcalls run under the member lock; notifications run after it is
    /// released.
    pub fn is_downcall(&self) -> bool {
        !matches!(self, Action::Notify(_))
    }

    /// Get a human-readable name for this action.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Transmit(msg) => msg.type_name(),
            Action::RequestJoin(_) => "RequestJoin",
            Action::RequestLeave => "RequestLeave",
            Action::BlockOk => "BlockOk",
            Action::Control(_) => "Control",
            Action::Notify(n) => n.type_name(),
        }
    }
}
