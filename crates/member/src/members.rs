//! Per-member records for the current view.

use indexmap::IndexMap;
use tracing::debug;
use vsync_core::MemberStatus;
use vsync_types::{Address, EndpointId, LogicalTime, Rank, ViewState};

/// What this member knows about one member of the current view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    /// Endpoint of the member.
    pub endpoint: EndpointId,
    /// Communication address.
    pub address: Address,
    /// Rank in the current view.
    pub rank: Rank,
    /// Last known lifecycle status.
    pub status: MemberStatus,
    /// A pending view change will remove this member.
    pub pending_leave: bool,
    /// The member joined in a transfer view and still needs state.
    pub transfer_obligation: bool,
    /// Logical time of the view the member first appeared in.
    pub since: LogicalTime,
}

/// Membership changes between two installed views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    /// Endpoints new in the view.
    pub joined: Vec<EndpointId>,
    /// Endpoints no longer in the view.
    pub departed: Vec<EndpointId>,
}

/// Records of every member of the current view, in rank order.
#[derive(Debug, Default)]
pub struct MemberTable {
    records: IndexMap<EndpointId, MemberRecord>,
}

impl MemberTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a member.
    pub fn get(&self, endpoint: &EndpointId) -> Option<&MemberRecord> {
        self.records.get(endpoint)
    }

    /// Iterate over records in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &MemberRecord> {
        self.records.values()
    }

    /// Rebuild the table for a newly installed view.
    ///
    /// Records of continuing members are kept (with their rank refreshed),
    /// records are created for new members and dropped for departed ones.
    /// Only members new to the group owe a state transfer. On the first
    /// install the table has no history, so every member other than
    /// `local` is taken to be continuing.
    pub fn install(&mut self, view: &ViewState, local: &EndpointId) -> MembershipDelta {
        let mut delta = MembershipDelta::default();
        let mut records = IndexMap::with_capacity(view.len());
        let first_install = self.records.is_empty();

        for (rank, endpoint, address) in view.iter_members() {
            let record = match self.records.swap_remove(endpoint) {
                Some(mut record) => {
                    record.rank = rank;
                    record.address = address.clone();
                    record.status = MemberStatus::Normal;
                    record.pending_leave = false;
                    record
                }
                None => {
                    delta.joined.push(endpoint.clone());
                    let newcomer = !first_install || endpoint == local;
                    MemberRecord {
                        endpoint: endpoint.clone(),
                        address: address.clone(),
                        rank,
                        status: MemberStatus::Normal,
                        pending_leave: false,
                        transfer_obligation: view.is_transfer_view && newcomer,
                        since: view.ltime,
                    }
                }
            };
            records.insert(endpoint.clone(), record);
        }

        delta.departed = self.records.drain(..).map(|(endpoint, _)| endpoint).collect();
        self.records = records;

        if !delta.joined.is_empty() || !delta.departed.is_empty() {
            debug!(
                ltime = view.ltime.0,
                joined = delta.joined.len(),
                departed = delta.departed.len(),
                "Member table refreshed"
            );
        }

        delta
    }

    /// Mark members a pending view change will remove.
    pub fn mark_leaving<'a>(&mut self, endpoints: impl IntoIterator<Item = &'a EndpointId>) {
        for endpoint in endpoints {
            if let Some(record) = self.records.get_mut(endpoint) {
                record.pending_leave = true;
                record.status = MemberStatus::Leaving;
            }
        }
    }

    /// Update the status recorded for one member.
    pub fn set_status(&mut self, endpoint: &EndpointId, status: MemberStatus) {
        if let Some(record) = self.records.get_mut(endpoint) {
            record.status = status;
        }
    }

    /// Clear the transfer obligation of a member.
    pub fn fulfil_transfer(&mut self, endpoint: &EndpointId) {
        if let Some(record) = self.records.get_mut(endpoint) {
            record.transfer_obligation = false;
        }
    }

    /// Forget every member.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
