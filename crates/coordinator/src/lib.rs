//! View change coordinator.
//!
//! This crate computes the next view of a group from the current view and a
//! membership delta delivered by the transport:
//!
//! - merge pending joins, remove leavers and suspects
//! - rank survivors by endpoint identity (coordinator at rank 0)
//! - advance the logical time and record the prior view id
//! - decide primary / non-primary from the quorum policy
//! - decide whether the view needs state transfer
//!
//! The computation is deterministic and stateless between epochs.

mod config;
mod view_change;

pub use config::CoordinatorConfig;
pub use view_change::ViewChangeCoordinator;
