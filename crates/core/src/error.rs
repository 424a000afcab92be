//! Error types for membership operations.

use crate::MemberStatus;
use std::time::Duration;
use thiserror::Error;
use vsync_types::{LogicalTime, Rank, TransferId, ViewError};

/// Errors surfaced by member operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// Operation illegal in the current lifecycle status. Retry later.
    #[error("{op} while member is {status}")]
    InvalidState {
        op: &'static str,
        status: MemberStatus,
    },

    /// Primary-partition policy violated. Fatal.
    #[error("quorum lost: view has {members} members, quorum is {quorum}")]
    QuorumLost { members: usize, quorum: usize },

    /// No exit confirmation arrived in time. The leave may be retried.
    #[error("no exit confirmation within {0:?}")]
    Timeout(Duration),

    /// A transfer identifier from an earlier epoch was reused.
    #[error("stale transfer {id}, current epoch is {current}")]
    StaleTransfer {
        id: TransferId,
        current: LogicalTime,
    },

    /// The transfer identifier was never issued or served here.
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// A rank argument does not name a member of the current view.
    #[error("{rank} out of bounds for {members} members")]
    RankOutOfBounds { rank: Rank, members: usize },

    /// Only the coordinator may attach a message to the next view.
    #[error("only the coordinator may attach a view message")]
    NotCoordinator,

    /// A delivered view violates its invariants.
    #[error("invalid view: {0}")]
    InvalidView(#[from] ViewError),

    /// The transport refused a downcall.
    #[error("transport error: {0}")]
    Transport(String),
}

impl MembershipError {
    /// Whether the error is fatal for the member.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MembershipError::QuorumLost { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MembershipError::InvalidState {
            op: "join",
            status: MemberStatus::Normal,
        };
        assert_eq!(err.to_string(), "join while member is normal");

        let err = MembershipError::StaleTransfer {
            id: TransferId::new(LogicalTime(2), 1),
            current: LogicalTime(3),
        };
        assert_eq!(
            err.to_string(),
            "stale transfer xfer-2.1, current epoch is LTime(3)"
        );
        assert!(!err.is_fatal());
        assert!(MembershipError::QuorumLost {
            members: 2,
            quorum: 3
        }
        .is_fatal());
    }
}
