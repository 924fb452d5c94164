use crate::component::Component;
use serde::{Deserialize, Serialize};

/// Subject the announcement is published on once per registration
pub const ANNOUNCE_COMPONENT_MESSAGE_SUBJECT: &str = "vcap.component.announce";

/// Subject collectors publish on to ask every component to re-announce
pub const DISCOVER_COMPONENT_MESSAGE_SUBJECT: &str = "vcap.component.discover";

/// Wire payload describing a component to the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceComponentMessage {
    #[serde(rename = "type")]
    pub component_type: String,
    pub index: u32,
    /// `ip:port` of the status server
    pub host: String,
    /// `{index}-{identifier}`
    pub uuid: String,
    /// `[username, password]`
    pub credentials: [String; 2],
}

impl AnnounceComponentMessage {
    /// Derive the announcement from the component's current identity
    pub fn new(component: &Component) -> Self {
        let credentials = component.credentials();
        Self {
            component_type: component.name().to_string(),
            index: component.index(),
            host: component.status_addr().to_string(),
            uuid: format!("{}-{}", component.index(), component.identifier()),
            credentials: [credentials.username.clone(), credentials.password.clone()],
        }
    }
}
