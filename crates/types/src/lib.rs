//! Core types for the vsync group membership engine.
//!
//! Everything in this crate is a plain value: identifiers, the agreed view
//! of a group, the local projection of that view, join options and the
//! message types the delivery gate queues.

mod identifiers;
mod message;
mod options;
mod view;

pub use identifiers::{Address, EndpointId, LogicalTime, Rank, TransferId};
pub use message::{DelayedMessage, SendKind, XferMode, XferStatus};
pub use options::{JoinOptions, DEFAULT_PROPERTIES, DEFAULT_PROTOCOL, DEFAULT_TRANSPORT};
pub use view::{LocalState, ViewError, ViewId, ViewState, VSYNC_VERSION};
