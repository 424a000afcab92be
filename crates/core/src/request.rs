//! View change requests.

use vsync_types::{Address, EndpointId};

/// The membership delta a view change is computed from.
///
/// Delivered by the transport in total order, so every member sees the same
/// sequence of requests and computes the same candidate view.
///
/// # Example
///
/// ```ignore
/// let request = ViewChangeRequest::new()
///     .join(EndpointId::new("c"), Address::new("10.0.0.3:6789"))
///     .suspect(EndpointId::new("b"));
/// let next = coordinator.next_view(&current, &request);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewChangeRequest {
    /// Endpoints asking to join, with their addresses.
    pub joins: Vec<(EndpointId, Address)>,

    /// Endpoints that asked to leave.
    pub leaves: Vec<EndpointId>,

    /// Endpoints suspected of having failed.
    pub suspects: Vec<EndpointId>,

    /// Requested protocol stack change.
    pub protocol: Option<String>,

    /// Requested property list change.
    pub properties: Option<String>,
}

impl ViewChangeRequest {
    /// Create an empty request (a "prompt": a new view with the same members).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a joining endpoint.
    pub fn join(mut self, endpoint: EndpointId, address: Address) -> Self {
        self.joins.push((endpoint, address));
        self
    }

    /// Add a leaving endpoint.
    pub fn leave(mut self, endpoint: EndpointId) -> Self {
        self.leaves.push(endpoint);
        self
    }

    /// Add a suspected endpoint.
    pub fn suspect(mut self, endpoint: EndpointId) -> Self {
        self.suspects.push(endpoint);
        self
    }

    /// Request a protocol change.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Request a property change.
    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }

    /// Whether the request removes `endpoint` from the group.
    pub fn removes(&self, endpoint: &EndpointId) -> bool {
        self.leaves.contains(endpoint) || self.suspects.contains(endpoint)
    }

    /// Whether the request changes membership at all.
    pub fn changes_membership(&self) -> bool {
        !self.joins.is_empty() || !self.leaves.is_empty() || !self.suspects.is_empty()
    }
}
