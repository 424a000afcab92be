//! The event-handling seam between members and their runners.

use crate::{Action, Event};
use std::time::Duration;

/// A group member driven by transport upcalls and application downcalls.
///
/// Every input, from a delivered view to a local `cast`, arrives as an
/// [`Event`]; every effect, whether a transport downcall or an application
/// callback, leaves as an [`Action`]. Runners own the transport and the
/// clock, so the same member code runs under the threaded runtime and the
/// simulated group.
pub trait StateMachine {
    /// Apply one event and return the downcalls and notifications it caused,
    /// in the order the runner must carry them out.
    fn handle(&mut self, event: Event) -> Vec<Action>;

    /// Advance the member's clock. Runners call this before each `handle`.
    fn set_time(&mut self, now: Duration);

    /// Time of the last `set_time`.
    fn now(&self) -> Duration;
}
