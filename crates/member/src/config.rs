//! Member configuration.

use serde::{Deserialize, Serialize};
use vsync_coordinator::CoordinatorConfig;

/// Configuration for a group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberConfig {
    /// Fail instead of installing a non-primary view.
    pub primary_only: bool,

    /// Minimum number of members for a view to be primary.
    ///
    /// `None` means every view is primary.
    pub quorum_size: Option<usize>,

    /// Whether a departure from a primary view requires state transfer.
    pub transfer_on_departure: bool,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            primary_only: false,
            quorum_size: None,
            transfer_on_departure: true,
        }
    }
}

impl MemberConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a quorum of `quorum_size` members.
    pub fn with_quorum(mut self, quorum_size: usize) -> Self {
        self.quorum_size = Some(quorum_size);
        self
    }

    /// Fail on quorum loss.
    pub fn with_primary_only(mut self, primary_only: bool) -> Self {
        self.primary_only = primary_only;
        self
    }

    /// Set whether departures force a transfer view.
    pub fn with_transfer_on_departure(mut self, transfer_on_departure: bool) -> Self {
        self.transfer_on_departure = transfer_on_departure;
        self
    }

    /// The policy the view change coordinator runs with.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            quorum_size: self.quorum_size,
            transfer_on_departure: self.transfer_on_departure,
        }
    }
}
