//! Application message and state transfer types.

use crate::{EndpointId, LogicalTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an application message is disseminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendKind {
    /// Point-to-point to one member.
    Send,
    /// Multicast to the whole group.
    Cast,
    /// State-aware multicast: only delivered to members that finished
    /// state transfer in the current view.
    SCast,
    /// Local send, looped back to the sender only.
    LSend,
}

impl SendKind {
    /// Whether this kind names an explicit destination.
    pub fn is_point_to_point(self) -> bool {
        matches!(self, SendKind::Send)
    }
}

impl fmt::Display for SendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SendKind::Send => "send",
            SendKind::Cast => "cast",
            SendKind::SCast => "scast",
            SendKind::LSend => "lsend",
        };
        f.write_str(s)
    }
}

/// A send attempted while the member was blocked.
///
/// Queued in FIFO order and dispatched exactly once after the next view
/// installs. Never persisted. A point-to-point destination is held as an
/// endpoint and mapped back to a rank in the view the message drains into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedMessage {
    /// Dissemination kind.
    pub kind: SendKind,
    /// Destination endpoint, for point-to-point sends.
    pub destination: Option<EndpointId>,
    /// Message body.
    pub payload: Vec<u8>,
    /// Logical time of the view during which the send was attempted.
    pub epoch: LogicalTime,
}

impl DelayedMessage {
    /// Create a delayed message.
    pub fn new(
        kind: SendKind,
        destination: Option<EndpointId>,
        payload: Vec<u8>,
        epoch: LogicalTime,
    ) -> Self {
        Self {
            kind,
            destination,
            payload,
            epoch,
        }
    }
}

/// Outcome of a synchronous state transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XferStatus {
    /// A provider answered with its state.
    Success(Vec<u8>),
    /// No provider was available before the epoch ended. Treated as
    /// "no prior state" by convention.
    Terminated,
}

impl XferStatus {
    /// Whether the transfer produced state.
    pub fn is_success(&self) -> bool {
        matches!(self, XferStatus::Success(_))
    }
}

/// How the requester waits for a state transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferMode {
    /// Caller blocks until a provider answers or the epoch ends.
    Sync,
    /// Caller is notified through `got_state` / `xfer_canceled`.
    Async,
}
