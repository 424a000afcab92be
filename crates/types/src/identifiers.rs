//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque process identifier.
///
/// Endpoints are totally ordered by their string form. The ordering is what
/// the coordinator sorts on when assigning ranks, so every member computes
/// the same ranking independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Create an endpoint identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpt({})", self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque communication address of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Create an address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a member within a view. Rank 0 is the coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rank(pub u32);

impl Rank {
    /// The coordinator rank.
    pub const COORDINATOR: Self = Rank(0);

    /// Get the rank as an index into a member list.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Check whether this rank is the coordinator.
    pub fn is_coordinator(self) -> bool {
        self == Self::COORDINATOR
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rank({})", self.0)
    }
}

/// Logical time of a view.
///
/// Not wall-clock time: a counter that strictly increases along the view
/// history of every endpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogicalTime(pub u64);

impl LogicalTime {
    /// Logical time before any view has been installed.
    pub const ZERO: Self = LogicalTime(0);

    /// Get the next logical time.
    pub fn next(self) -> Self {
        LogicalTime(self.0 + 1)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LTime({})", self.0)
    }
}

/// Identifier of a state transfer request.
///
/// Scoped to the view-change epoch it was issued in: `epoch` is the logical
/// time of the view that was current when the request was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId {
    /// Epoch the request belongs to.
    pub epoch: LogicalTime,
    /// Sequence number within the epoch.
    pub seq: u64,
}

impl TransferId {
    /// Create a transfer identifier.
    pub fn new(epoch: LogicalTime, seq: u64) -> Self {
        Self { epoch, seq }
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xfer-{}.{}", self.epoch.0, self.seq)
    }
}
