//! Join options.

use crate::EndpointId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default transport selector.
pub const DEFAULT_TRANSPORT: &str = "DEERING";

/// Default property list used to build the protocol stack.
pub const DEFAULT_PROPERTIES: &str = "Gmp:Switch:Sync:Heal:Frag:Suspect:Flow:Slander";

/// Default protocol stack, used when `use_properties` is false and no
/// explicit protocol was given.
pub const DEFAULT_PROTOCOL: &str = "Top:Heal:Switch:Leave:\
Inter:Intra:Elect:Merge:Sync:Suspect:\
Stable:Vsync:Frag_Abv:Top_appl:\
Frag:Pt2ptw:Mflow:Pt2pt:Mnak:Bottom";

/// Options recognized when joining a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Interval between heartbeat upcalls.
    #[serde(with = "millis", rename = "heartbeat_rate_ms")]
    pub heartbeat_rate: Duration,

    /// Requested transport(s), e.g. `"DEERING"`, `"UDP"`, `"TCP"`.
    pub transports: String,

    /// Explicit protocol stack. Used when `use_properties` is false.
    pub protocol: Option<String>,

    /// Group to join.
    pub group_name: String,

    /// Requested property list. Used when `use_properties` is true.
    pub properties: String,

    /// Whether `properties` (true) or `protocol` (false) selects the stack.
    pub use_properties: bool,

    /// Use the group daemon.
    pub groupd: bool,

    /// Parameters passed through to the group.
    pub params: Option<String>,

    /// Join as a client-only member.
    pub client: bool,

    /// Request a debugging stack.
    pub debug: bool,

    /// Explicit endpoint name; generated by the transport when absent.
    pub endpoint: Option<EndpointId>,

    /// Principal name.
    pub principal: Option<String>,

    /// Group security key.
    pub key: Option<Vec<u8>>,

    /// Request a secure stack.
    pub secure: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            heartbeat_rate: Duration::from_secs(10),
            transports: DEFAULT_TRANSPORT.to_string(),
            protocol: None,
            group_name: String::new(),
            properties: DEFAULT_PROPERTIES.to_string(),
            use_properties: true,
            groupd: false,
            params: None,
            client: false,
            debug: false,
            endpoint: None,
            principal: None,
            key: None,
            secure: false,
        }
    }
}

impl JoinOptions {
    /// Create options for joining the named group.
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            ..Default::default()
        }
    }

    /// Set the endpoint name.
    pub fn with_endpoint(mut self, endpoint: EndpointId) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_rate(mut self, rate: Duration) -> Self {
        self.heartbeat_rate = rate;
        self
    }

    /// Select the stack by explicit protocol rather than properties.
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self.use_properties = false;
        self
    }

    /// Select the stack by property list.
    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = properties.into();
        self.use_properties = true;
        self
    }

    /// Set the transport selector.
    pub fn with_transports(mut self, transports: impl Into<String>) -> Self {
        self.transports = transports.into();
        self
    }

    /// Set the group security key.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    /// Enable the debugging stack.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The stack description the group will run with.
    pub fn stack(&self) -> &str {
        if self.use_properties {
            &self.properties
        } else {
            self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL)
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
