//! Simulated network configuration.

use std::time::Duration;
use vsync_member::MemberConfig;

/// Configuration for a simulated group.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Group name used for joins.
    pub group_name: String,

    /// Delivery latency of every message.
    pub latency: Duration,

    /// Minimum number of members for a primary view.
    pub quorum_size: Option<usize>,

    /// Whether members fail on quorum loss.
    pub primary_only: bool,

    /// Whether departures from a primary view force a transfer view.
    pub transfer_on_departure: bool,

    /// Random seed for workloads driven by the simulation.
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            group_name: "sim".to_string(),
            latency: Duration::from_millis(10),
            quorum_size: None,
            primary_only: false,
            transfer_on_departure: true,
            seed: 12345,
        }
    }
}

impl NetworkConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a quorum of `quorum_size` members.
    pub fn with_quorum(mut self, quorum_size: usize) -> Self {
        self.quorum_size = Some(quorum_size);
        self
    }

    /// Fail members on quorum loss.
    pub fn with_primary_only(mut self, primary_only: bool) -> Self {
        self.primary_only = primary_only;
        self
    }

    /// Set the message latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The member policy every simulated member runs with.
    pub fn member_config(&self) -> MemberConfig {
        MemberConfig {
            primary_only: self.primary_only,
            quorum_size: self.quorum_size,
            transfer_on_departure: self.transfer_on_departure,
        }
    }
}
