//! State transfer between view members.
//!
//! When a transfer view installs, joiners reconcile their application state
//! with the continuing members. This crate provides the `StateTransferEngine`
//! that tracks both sides of that exchange for one epoch at a time.
//!
//! # Flow
//!
//! ```text
//! requester                          provider(s)
//!    │ request(mode, payload)
//!    │── StateRequest{id} ───────────▶ on_state_request → AskState
//!    │                                 send_state(origin, id, state)
//!    │◀────────────── StateReply{id} ──│
//!    │ on_state_reply: first reply wins
//!    │   Sync  → StateTransfer(Success)
//!    │   Async → GotState, then xfer_done(id)
//!    │
//!    │ next view installs (begin_epoch):
//!    │   Sync unanswered  → StateTransfer(Terminated)
//!    │   Async unanswered → XferCanceled
//!    │   Async unacked    → force-completed (warning)
//! ```

mod engine;
mod tracker;

pub use engine::StateTransferEngine;
pub use tracker::{OutgoingTransfer, RequestTracker, ServeTracker, TransferPhase};
