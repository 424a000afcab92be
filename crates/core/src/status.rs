//! Member lifecycle status.

use std::fmt;

/// Lifecycle of a group member.
///
/// ```text
/// Bogus ──join──▶ Joining ──view──▶ Normal ──block──▶ Blocked
///                                    ▲  │               │
///                                    └──┼─────view──────┘
///                                       │ leave
///                                       ▼
///                    Left ◀──exit── Leaving
/// ```
///
/// `Failed` is terminal and entered when a primary-only member observes a
/// non-primary view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemberStatus {
    /// Created, not yet joined.
    #[default]
    Bogus,
    /// Join requested, no view installed yet.
    Joining,
    /// Has a current view; may send and receive.
    Normal,
    /// View change in progress; sends are deferred.
    Blocked,
    /// Leave requested; waiting for the exit confirmation.
    Leaving,
    /// Exit confirmed. No further events are delivered.
    Left,
    /// Quorum lost under primary-only policy.
    Failed,
}

impl MemberStatus {
    /// Whether `join` is legal in this status.
    pub fn can_join(self) -> bool {
        matches!(
            self,
            MemberStatus::Bogus | MemberStatus::Leaving | MemberStatus::Left
        )
    }

    /// Whether the member has a current view.
    pub fn has_view(self) -> bool {
        matches!(self, MemberStatus::Normal | MemberStatus::Blocked)
    }

    /// Whether sends must go through the delivery gate.
    pub fn defers_sends(self) -> bool {
        matches!(self, MemberStatus::Joining | MemberStatus::Blocked)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberStatus::Bogus => "bogus",
            MemberStatus::Joining => "joining",
            MemberStatus::Normal => "normal",
            MemberStatus::Blocked => "blocked",
            MemberStatus::Leaving => "leaving",
            MemberStatus::Left => "left",
            MemberStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
