//! Shared vocabulary for the agent hub: connection identity, capability
//! tags, and the read-only agent snapshots handed out to callers.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use super::protocol::Envelope;

/// Opaque key/value body carried by envelopes and agent results.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Identifier assigned to a connection at accept time (UUID v4 string).
/// Never reused, even after the connection closes.
pub type ConnectionId = String;

/// A capability tag advertised by an agent during authentication.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    /// Executes raw shell commands (every agent has this by default).
    Command,
    /// Executes natural-language tasks autonomously ("smart" agent).
    Task,
    /// Any tag the hub does not interpret.
    Other(String),
}

impl From<String> for Capability {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "command" => Capability::Command,
            "task" => Capability::Task,
            _ => Capability::Other(tag),
        }
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.to_string()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Command => f.write_str("command"),
            Capability::Task => f.write_str("task"),
            Capability::Other(tag) => f.write_str(tag),
        }
    }
}

/// Set of capabilities held by one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn contains(&self, cap: &Capability) -> bool {
        self.0.contains(cap)
    }

    pub fn is_smart(&self) -> bool {
        self.contains(&Capability::Task)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self(BTreeSet::from([Capability::Command]))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Live state of one agent connection. Owned exclusively by the registry.
pub(crate) struct AgentConnection {
    pub id: ConnectionId,
    pub name: String,
    pub outbound: UnboundedSender<Envelope>,
    pub authenticated: bool,
    pub capabilities: CapabilitySet,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub version: Option<String>,
    pub peer: Option<String>,
}

impl AgentConnection {
    pub fn new(outbound: UnboundedSender<Envelope>, peer: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            outbound,
            authenticated: false,
            capabilities: CapabilitySet::default(),
            connected_at: now,
            last_heartbeat: now,
            version: None,
            peer,
        }
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            authenticated: self.authenticated,
            capabilities: self.capabilities.clone(),
            connected_at: self.connected_at,
            last_heartbeat: self.last_heartbeat,
            version: self.version.clone(),
            peer: self.peer.clone(),
        }
    }
}

/// Read-only snapshot of a connection. May be stale as soon as it is returned.
#[derive(Clone, Debug, Serialize)]
pub struct AgentInfo {
    pub id: ConnectionId,
    pub name: String,
    pub authenticated: bool,
    pub capabilities: CapabilitySet,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub version: Option<String>,
    pub peer: Option<String>,
}

impl AgentInfo {
    pub fn is_smart(&self) -> bool {
        self.capabilities.is_smart()
    }

    /// Whether the last heartbeat is older than `threshold` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat > threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_is_command_only() {
        let caps = CapabilitySet::default();
        assert!(caps.contains(&Capability::Command));
        assert!(!caps.is_smart());
    }

    #[test]
    fn capability_tags_round_trip_through_strings() {
        let caps: CapabilitySet =
            serde_json::from_value(serde_json::json!(["command", "task", "gpu"])).unwrap();
        assert!(caps.is_smart());
        assert!(caps.contains(&Capability::Other("gpu".into())));

        let back = serde_json::to_value(&caps).unwrap();
        assert_eq!(back, serde_json::json!(["command", "task", "gpu"]));
    }

    #[test]
    fn stale_check_uses_threshold() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let conn = AgentConnection::new(tx, None);
        let info = conn.info();
        let later = info.last_heartbeat + chrono::Duration::seconds(120);
        assert!(info.is_stale(later, chrono::Duration::seconds(90)));
        assert!(!info.is_stale(info.last_heartbeat, chrono::Duration::seconds(90)));
    }
}
