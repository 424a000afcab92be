//! Next-view computation.
//!
//! The coordinator is stateless between epochs: it always recomputes the next
//! view from the latest installed view and the membership delta the transport
//! delivered. Every member runs the same computation on the same inputs, so
//! every member arrives at the same candidate before the transport confirms
//! the installation.

use crate::CoordinatorConfig;
use indexmap::IndexMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use vsync_core::ViewChangeRequest;
use vsync_types::{
    Address, EndpointId, JoinOptions, LogicalTime, Rank, ViewId, ViewState, VSYNC_VERSION,
};

/// Computes views from membership deltas.
pub struct ViewChangeCoordinator {
    /// Quorum and transfer policy.
    config: CoordinatorConfig,

    /// Group clock, used for the view uptime.
    now: Duration,
}

impl ViewChangeCoordinator {
    /// Create a new coordinator.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            now: Duration::ZERO,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Public API
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set the current group time.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Get the policy.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Found a group.
    ///
    /// Produces the first view (logical time 1) from the founding members.
    /// Returns `None` if there are no founders.
    pub fn initial_view(
        &self,
        options: &JoinOptions,
        founders: &[(EndpointId, Address)],
    ) -> Option<ViewState> {
        let members = Self::ranked(founders.iter().cloned());
        if members.is_empty() {
            return None;
        }

        let (members, addresses): (Vec<_>, Vec<_>) = members.into_iter().unzip();
        let is_primary = self.config.is_primary(members.len());

        info!(
            group = %options.group_name,
            members = members.len(),
            is_primary,
            "Founding group"
        );

        Some(ViewState {
            version: VSYNC_VERSION.to_string(),
            group_name: options.group_name.clone(),
            coordinator_rank: Rank::COORDINATOR,
            ltime: LogicalTime::ZERO.next(),
            is_primary,
            protocol: options.stack().to_string(),
            use_groupd: options.groupd,
            is_transfer_view: false,
            security_key: options.key.clone(),
            prior_view_ids: vec![],
            params: options.params.clone(),
            uptime: Duration::ZERO,
            members,
            addresses,
        })
    }

    /// Compute the view that follows `current` after applying `request`.
    ///
    /// Joins are merged in, leavers and suspects removed, and the survivors
    /// ranked by endpoint identity. Returns `None` when nobody is left (the
    /// group dissolves).
    pub fn next_view(&self, current: &ViewState, request: &ViewChangeRequest) -> Option<ViewState> {
        let survivors = current
            .members
            .iter()
            .cloned()
            .zip(current.addresses.iter().cloned())
            .chain(request.joins.iter().cloned())
            .filter(|(endpoint, _)| !request.removes(endpoint));
        let members = Self::ranked(survivors);

        if members.is_empty() {
            info!(
                group = %current.group_name,
                ltime = current.ltime.0,
                "All members departed, group dissolves"
            );
            return None;
        }

        let joined = members.keys().any(|e| !current.contains(e));
        let departed = current.members.iter().any(|e| !members.contains_key(e));
        let is_transfer_view =
            joined || (departed && current.is_primary && self.config.transfer_on_departure);

        let (members, addresses): (Vec<_>, Vec<_>) = members.into_iter().unzip();
        let is_primary = self.config.is_primary(members.len());
        if current.is_primary && !is_primary {
            warn!(
                ltime = current.ltime.next().0,
                members = members.len(),
                quorum = ?self.config.quorum_size,
                "Next view is below quorum"
            );
        }

        let protocol = request
            .protocol
            .clone()
            .or_else(|| request.properties.clone())
            .unwrap_or_else(|| current.protocol.clone());

        let next = ViewState {
            version: VSYNC_VERSION.to_string(),
            group_name: current.group_name.clone(),
            coordinator_rank: Rank::COORDINATOR,
            ltime: current.ltime.next(),
            is_primary,
            protocol,
            use_groupd: current.use_groupd,
            is_transfer_view,
            security_key: current.security_key.clone(),
            prior_view_ids: vec![current.view_id()],
            params: current.params.clone(),
            uptime: current.uptime.max(self.now),
            members,
            addresses,
        };

        debug!(
            ltime = next.ltime.0,
            members = next.len(),
            joined,
            departed,
            is_transfer_view,
            is_primary,
            "Computed next view"
        );

        Some(next)
    }

    /// Merge several partition views into one.
    ///
    /// The merged view's logical time exceeds every input's, its
    /// `prior_view_ids` lists the merged views in input order, and it is
    /// always a transfer view since the partitions' states must be
    /// reconciled. `request` is applied on top of the union.
    pub fn merge(&self, views: &[ViewState], request: &ViewChangeRequest) -> Option<ViewState> {
        let first = views.first()?;
        let max_ltime = views.iter().map(|v| v.ltime).max().unwrap_or(first.ltime);

        let union = views
            .iter()
            .flat_map(|v| v.members.iter().cloned().zip(v.addresses.iter().cloned()))
            .chain(request.joins.iter().cloned())
            .filter(|(endpoint, _)| !request.removes(endpoint));
        let members = Self::ranked(union);
        if members.is_empty() {
            return None;
        }

        let (members, addresses): (Vec<_>, Vec<_>) = members.into_iter().unzip();
        let is_primary = self.config.is_primary(members.len());
        let prior_view_ids: Vec<ViewId> = views.iter().map(|v| v.view_id()).collect();

        info!(
            partitions = views.len(),
            members = members.len(),
            ltime = max_ltime.next().0,
            "Merging partitions"
        );

        Some(ViewState {
            version: VSYNC_VERSION.to_string(),
            group_name: first.group_name.clone(),
            coordinator_rank: Rank::COORDINATOR,
            ltime: max_ltime.next(),
            is_primary,
            protocol: request
                .protocol
                .clone()
                .unwrap_or_else(|| first.protocol.clone()),
            use_groupd: first.use_groupd,
            is_transfer_view: true,
            security_key: first.security_key.clone(),
            prior_view_ids,
            params: first.params.clone(),
            uptime: views
                .iter()
                .map(|v| v.uptime)
                .max()
                .unwrap_or_default()
                .max(self.now),
            members,
            addresses,
        })
    }

    /// Deduplicate and rank members.
    ///
    /// Ranks follow endpoint identity, never arrival order. The first address
    /// seen for an endpoint wins.
    fn ranked(
        members: impl Iterator<Item = (EndpointId, Address)>,
    ) -> IndexMap<EndpointId, Address> {
        let mut ranked = IndexMap::new();
        for (endpoint, address) in members {
            ranked.entry(endpoint).or_insert(address);
        }
        ranked.sort_keys();
        ranked
    }
}
