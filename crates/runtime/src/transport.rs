//! Transport seam.

use thiserror::Error;
use vsync_core::{MembershipError, OutboundMessage};
use vsync_types::{JoinOptions, Rank};

/// A downcall the transport refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for MembershipError {
    fn from(err: TransportError) -> Self {
        MembershipError::Transport(err.0)
    }
}

/// The reliable, totally ordered transport a member runs on.
///
/// Downcalls are made with the member lock held. A transport must therefore
/// never upcall into the member synchronously from inside a downcall;
/// upcalls are delivered from the protocol thread through
/// [`GroupMember::deliver`](crate::GroupMember::deliver).
pub trait Transport: Send + Sync {
    /// Hand an application or state transfer message to the group.
    fn request_send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Join a group.
    fn request_join(&self, options: &JoinOptions) -> Result<(), TransportError>;

    /// Leave the group. Completion is reported with `Event::ExitConfirmed`.
    fn request_leave(&self) -> Result<(), TransportError>;

    /// Acknowledge a block request.
    fn block_ok(&self) -> Result<(), TransportError>;

    /// Report members as failure-suspected.
    fn suspect(&self, ranks: &[Rank]) -> Result<(), TransportError>;

    /// Ask for a new view.
    fn prompt(&self) -> Result<(), TransportError>;

    /// Ask for the group key to be refreshed.
    fn rekey(&self) -> Result<(), TransportError>;

    /// Switch protocol stack.
    fn change_protocol(&self, protocol: &str) -> Result<(), TransportError>;

    /// Switch property list.
    fn change_properties(&self, properties: &str) -> Result<(), TransportError>;

    /// State transfer for the current view is complete.
    fn xfer_done(&self) -> Result<(), TransportError>;

    /// Attach a message to the next view.
    fn view_message(&self, payload: &[u8]) -> Result<(), TransportError>;
}
