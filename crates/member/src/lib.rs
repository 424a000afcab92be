//! Group member state machine.
//!
//! This crate provides the per-member lifecycle that the runtime and the
//! simulation drive.
//!
//! # Architecture
//!
//! The member processes transport upcalls synchronously:
//!
//! - `Event::ViewChangeProposed` → Compute the candidate view, block, ack
//! - `Event::BlockRequested` → Block and ack
//! - `Event::ViewDelivered` → Install the view, end the transfer epoch,
//!   drain the delivery gate, carry out a deferred leave
//! - `Event::ExitConfirmed` → Report the exit once
//! - `Event::StateRequested` / `Event::StateReplied` → State transfer
//!
//! Application downcalls (`join`, `leave`, `cast`, `send`, ...) are plain
//! methods so they can return errors to the caller. All I/O is performed by
//! the runner via returned `Action`s.

mod config;
mod gate;
mod members;
mod state;

pub use config::MemberConfig;
pub use gate::DeliveryGate;
pub use members::{MemberRecord, MemberTable, MembershipDelta};
pub use state::MemberStateMachine;
