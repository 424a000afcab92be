//! Configuration for view computation.

/// Primary-partition and transfer-view policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Minimum number of members for a view to be primary.
    ///
    /// `None` means every view is primary.
    pub quorum_size: Option<usize>,

    /// Whether a departure from a primary view makes the next view a
    /// transfer view. Joins always do.
    pub transfer_on_departure: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            quorum_size: None,
            transfer_on_departure: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with a quorum requirement.
    pub fn with_quorum(quorum_size: usize) -> Self {
        Self {
            quorum_size: Some(quorum_size),
            ..Default::default()
        }
    }

    /// Check whether a view with `member_count` members is primary.
    pub fn is_primary(&self, member_count: usize) -> bool {
        match self.quorum_size {
            Some(quorum) => member_count >= quorum,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_policy() {
        let config = CoordinatorConfig::default();
        assert!(config.is_primary(1));

        let config = CoordinatorConfig::with_quorum(3);
        assert!(!config.is_primary(2));
        assert!(config.is_primary(3));
        assert!(config.is_primary(4));
    }
}
