//! Core types for vsync: `Event`, `Action`, and the `StateMachine` trait.
//!
//! The membership engine is written as synchronous state machines. The
//! transport feeds them [`Event`]s; they answer with [`Action`]s that a
//! runner executes (transport downcalls under the member lock, application
//! [`Notification`]s after the lock is released).

mod action;
mod error;
mod event;
mod message;
mod request;
mod status;
mod traits;

pub use action::{Action, GroupControl, Notification};
pub use error::MembershipError;
pub use event::Event;
pub use message::OutboundMessage;
pub use request::ViewChangeRequest;
pub use status::MemberStatus;
pub use traits::StateMachine;
