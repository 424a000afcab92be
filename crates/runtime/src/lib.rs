//! Thread-safe runtime for a group member.
//!
//! [`GroupMember`] wraps the member state machine in a single mutex and
//! connects it to two seams:
//!
//! - a [`Transport`] the member issues downcalls to (with the lock held)
//! - [`GroupCallbacks`] the application receives upcalls on (with the lock
//!   released, so callbacks may call back into the member)
//!
//! Blocking operations (`leave`, synchronous `request_state`) wait outside
//! the lock with configurable timeouts from [`RuntimeConfig`].

mod callbacks;
mod config;
mod group;
mod telemetry;
mod transport;

pub use callbacks::{fail_fast, CallbackTable, GroupCallbacks, NoCallbacks};
pub use config::{ConfigError, RuntimeConfig};
pub use group::GroupMember;
pub use telemetry::init_tracing;
pub use transport::{Transport, TransportError};
