//! View types: the agreed membership snapshot and the local projection of it.

use crate::{Address, EndpointId, LogicalTime, Rank};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Version string stamped into every view.
pub const VSYNC_VERSION: &str = concat!("vsync-", env!("CARGO_PKG_VERSION"));

/// Unique identifier of an installed view.
///
/// The endpoint is the coordinator that produced the view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewId {
    /// Logical time of the view.
    pub ltime: LogicalTime,
    /// Coordinator endpoint.
    pub endpoint: EndpointId,
}

impl ViewId {
    /// Create a view identifier.
    pub fn new(ltime: LogicalTime, endpoint: EndpointId) -> Self {
        Self { ltime, endpoint }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "View({}:{})", self.ltime.0, self.endpoint.0)
    }
}

/// Errors raised when a view violates its structural invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    /// A view must contain at least one member.
    #[error("view has no members")]
    Empty,

    /// Every member needs exactly one address.
    #[error("view has {members} members but {addresses} addresses")]
    LengthMismatch { members: usize, addresses: usize },

    /// An endpoint appears twice in the member list.
    #[error("endpoint {0} appears more than once in the view")]
    DuplicateMember(EndpointId),

    /// The coordinator rank does not name a member.
    #[error("coordinator {coordinator} out of range for {members} members")]
    CoordinatorOutOfRange { coordinator: Rank, members: usize },

    /// Installed views start at logical time 1.
    #[error("view has logical time zero")]
    ZeroLogicalTime,

    /// The local endpoint is not part of the view.
    #[error("endpoint {0} is not a member of the view")]
    NotAMember(EndpointId),
}

/// An agreed, totally ordered membership snapshot.
///
/// The order of `members` defines rank: the member at index `i` has rank `i`.
/// Produced by the view change coordinator and read-only once installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    /// Engine version that produced the view.
    pub version: String,

    /// Group name.
    pub group_name: String,

    /// Rank of the coordinator.
    pub coordinator_rank: Rank,

    /// Logical time of this view.
    pub ltime: LogicalTime,

    /// Whether this view satisfies the quorum policy.
    pub is_primary: bool,

    /// Protocol stack (or property list) in use.
    pub protocol: String,

    /// Whether the group daemon is in use.
    pub use_groupd: bool,

    /// Whether members must reconcile state during this view's epoch.
    pub is_transfer_view: bool,

    /// Group security key, if any.
    pub security_key: Option<Vec<u8>>,

    /// Identifiers of the views that merged into this one.
    pub prior_view_ids: Vec<ViewId>,

    /// Parameters passed through to the group.
    pub params: Option<String>,

    /// How long the group has been running.
    pub uptime: Duration,

    /// Members, ordered by rank.
    pub members: Vec<EndpointId>,

    /// Communication addresses, parallel to `members`.
    pub addresses: Vec<Address>,
}

impl ViewState {
    /// Identifier of this view.
    pub fn view_id(&self) -> ViewId {
        ViewId::new(self.ltime, self.coordinator().clone())
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the view has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The coordinator endpoint.
    ///
    /// Views are validated before they are handed out, so the coordinator
    /// rank always names a member. On an unvalidated empty view this falls
    /// back to an empty endpoint.
    pub fn coordinator(&self) -> &EndpointId {
        static NONE: EndpointId = EndpointId(String::new());
        self.members
            .get(self.coordinator_rank.index())
            .unwrap_or(&NONE)
    }

    /// Rank of an endpoint in this view.
    pub fn rank_of(&self, endpoint: &EndpointId) -> Option<Rank> {
        self.members
            .iter()
            .position(|m| m == endpoint)
            .map(|i| Rank(i as u32))
    }

    /// Endpoint at a given rank.
    pub fn member_at(&self, rank: Rank) -> Option<&EndpointId> {
        self.members.get(rank.index())
    }

    /// Address of the member at a given rank.
    pub fn address_at(&self, rank: Rank) -> Option<&Address> {
        self.addresses.get(rank.index())
    }

    /// Check whether an endpoint is a member.
    pub fn contains(&self, endpoint: &EndpointId) -> bool {
        self.rank_of(endpoint).is_some()
    }

    /// Iterate over `(rank, endpoint, address)` triples.
    pub fn iter_members(&self) -> impl Iterator<Item = (Rank, &EndpointId, &Address)> {
        self.members
            .iter()
            .zip(self.addresses.iter())
            .enumerate()
            .map(|(i, (e, a))| (Rank(i as u32), e, a))
    }

    /// Check the structural invariants of the view.
    pub fn validate(&self) -> Result<(), ViewError> {
        if self.members.is_empty() {
            return Err(ViewError::Empty);
        }
        if self.members.len() != self.addresses.len() {
            return Err(ViewError::LengthMismatch {
                members: self.members.len(),
                addresses: self.addresses.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for member in &self.members {
            if !seen.insert(member) {
                return Err(ViewError::DuplicateMember(member.clone()));
            }
        }
        if self.coordinator_rank.index() >= self.members.len() {
            return Err(ViewError::CoordinatorOutOfRange {
                coordinator: self.coordinator_rank,
                members: self.members.len(),
            });
        }
        if self.ltime == LogicalTime::ZERO {
            return Err(ViewError::ZeroLogicalTime);
        }
        Ok(())
    }
}

/// The local projection of an installed view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    /// Local endpoint.
    pub endpoint: EndpointId,
    /// Local address.
    pub address: Address,
    /// Local rank in the view.
    pub rank: Rank,
    /// Group name. Stable over the lifetime of the member.
    pub name: String,
    /// Number of members in the view.
    pub member_count: usize,
    /// Identifier of the view.
    pub view_id: ViewId,
    /// Whether the local endpoint is the coordinator.
    pub am_coordinator: bool,
}

impl LocalState {
    /// Derive the local state of `endpoint` from a view.
    pub fn from_view(view: &ViewState, endpoint: &EndpointId) -> Result<Self, ViewError> {
        let rank = view
            .rank_of(endpoint)
            .ok_or_else(|| ViewError::NotAMember(endpoint.clone()))?;
        let address = view
            .address_at(rank)
            .cloned()
            .ok_or(ViewError::LengthMismatch {
                members: view.members.len(),
                addresses: view.addresses.len(),
            })?;

        Ok(Self {
            endpoint: endpoint.clone(),
            address,
            rank,
            name: view.group_name.clone(),
            member_count: view.len(),
            view_id: view.view_id(),
            am_coordinator: rank == view.coordinator_rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_view(members: &[&str]) -> ViewState {
        ViewState {
            version: VSYNC_VERSION.to_string(),
            group_name: "test".to_string(),
            coordinator_rank: Rank(0),
            ltime: LogicalTime(1),
            is_primary: true,
            protocol: String::new(),
            use_groupd: false,
            is_transfer_view: false,
            security_key: None,
            prior_view_ids: vec![],
            params: None,
            uptime: Duration::ZERO,
            members: members.iter().map(|m| EndpointId::new(*m)).collect(),
            addresses: members
                .iter()
                .map(|m| Address::new(format!("{m}:6789")))
                .collect(),
        }
    }

    #[test]
    fn test_ranks_follow_member_order() {
        let view = make_view(&["a", "b", "c"]);
        assert_eq!(view.rank_of(&EndpointId::new("b")), Some(Rank(1)));
        assert_eq!(view.member_at(Rank(2)), Some(&EndpointId::new("c")));
        assert_eq!(view.coordinator(), &EndpointId::new("a"));
        assert_eq!(view.view_id(), ViewId::new(LogicalTime(1), "a".into()));
    }

    #[test]
    fn test_validate_rejects_broken_views() {
        assert_eq!(make_view(&[]).validate(), Err(ViewError::Empty));

        let mut view = make_view(&["a", "b"]);
        view.addresses.pop();
        assert!(matches!(
            view.validate(),
            Err(ViewError::LengthMismatch { .. })
        ));

        let view = make_view(&["a", "a"]);
        assert_eq!(
            view.validate(),
            Err(ViewError::DuplicateMember(EndpointId::new("a")))
        );

        let mut view = make_view(&["a"]);
        view.coordinator_rank = Rank(1);
        assert!(matches!(
            view.validate(),
            Err(ViewError::CoordinatorOutOfRange { .. })
        ));

        let mut view = make_view(&["a"]);
        view.ltime = LogicalTime::ZERO;
        assert_eq!(view.validate(), Err(ViewError::ZeroLogicalTime));
    }

    #[test]
    fn test_local_state_from_view() {
        let view = make_view(&["a", "b"]);

        let local = LocalState::from_view(&view, &EndpointId::new("b")).unwrap();
        assert_eq!(local.rank, Rank(1));
        assert_eq!(local.member_count, 2);
        assert!(!local.am_coordinator);
        assert_eq!(local.address, Address::new("b:6789"));

        let coord = LocalState::from_view(&view, &EndpointId::new("a")).unwrap();
        assert!(coord.am_coordinator);

        assert_eq!(
            LocalState::from_view(&view, &EndpointId::new("z")),
            Err(ViewError::NotAMember(EndpointId::new("z")))
        );
    }
}
