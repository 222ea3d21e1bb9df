//! Connection registry and authentication gate.
//!
//! [`ConnectionRegistry`] is the single owner of every [`AgentConnection`].
//! Other components only ever see [`AgentInfo`] snapshots or short-lived
//! [`Target`] handles resolved for one protocol call.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use super::protocol::{AuthRequest, Envelope};
use super::types::{AgentConnection, AgentInfo, CapabilitySet, ConnectionId};

/// Outcome of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected(String),
    /// The connection closed before its auth message was processed.
    UnknownConnection,
}

/// A resolved send target for one broadcast/dispatch/sync call.
#[derive(Clone, Debug)]
pub struct Target {
    pub id: ConnectionId,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub outbound: UnboundedSender<Envelope>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, AgentConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection and return its id.
    pub fn accept(
        &mut self,
        outbound: UnboundedSender<Envelope>,
        peer: Option<String>,
    ) -> ConnectionId {
        let conn = AgentConnection::new(outbound, peer);
        let id = conn.id.clone();
        self.connections.insert(id.clone(), conn);
        id
    }

    /// Remove a connection. Returns its final snapshot if it was registered.
    pub fn remove(&mut self, id: &str) -> Option<AgentInfo> {
        self.connections.remove(id).map(|c| c.info())
    }

    /// Validate `request` against the hub secret and promote the connection on match.
    ///
    /// An empty hub secret never matches, so a hub started without a secret
    /// admits nobody.
    pub fn authenticate(&mut self, id: &str, request: AuthRequest, secret: &str) -> AuthOutcome {
        let Some(conn) = self.connections.get_mut(id) else {
            return AuthOutcome::UnknownConnection;
        };

        if secret.is_empty() || request.secret_key != secret {
            return AuthOutcome::Rejected("Invalid secret key".to_string());
        }

        conn.authenticated = true;
        conn.name = request.agent_name;
        if let Some(caps) = request.capabilities.filter(|c| !c.is_empty()) {
            conn.capabilities = caps.into_iter().collect();
        }
        conn.version = request.version;
        AuthOutcome::Accepted
    }

    /// Record a heartbeat. Returns `false` if the connection is gone.
    pub fn touch_heartbeat(&mut self, id: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn is_authenticated(&self, id: &str) -> bool {
        self.connections.get(id).is_some_and(|c| c.authenticated)
    }

    pub fn get(&self, id: &str) -> Option<AgentInfo> {
        self.connections.get(id).map(|c| c.info())
    }

    pub fn outbound(&self, id: &str) -> Option<UnboundedSender<Envelope>> {
        self.connections.get(id).map(|c| c.outbound.clone())
    }

    /// Snapshot of authenticated connections.
    pub fn online(&self) -> Vec<AgentInfo> {
        self.connections
            .values()
            .filter(|c| c.authenticated)
            .map(|c| c.info())
            .collect()
    }

    /// Resolve `names` to authenticated targets. An empty list means every
    /// online agent; names without a matching agent are dropped.
    pub fn resolve(&self, names: &[String]) -> Vec<Target> {
        self.connections
            .values()
            .filter(|c| c.authenticated)
            .filter(|c| names.is_empty() || names.iter().any(|n| *n == c.name))
            .map(|c| Target {
                id: c.id.clone(),
                name: c.name.clone(),
                capabilities: c.capabilities.clone(),
                outbound: c.outbound.clone(),
            })
            .collect()
    }

    /// Total registered connections, authenticated or not.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
