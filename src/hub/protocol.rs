//! Wire envelope and the typed messages carried inside it.
//!
//! Every frame on an agent channel is one JSON object on its own line:
//!
//! ```text
//! { "type": string, "taskId"?: string, "payload": object, "timestamp": number }
//! ```
//!
//! Inbound envelopes are validated into [`InboundMessage`] at decode time;
//! anything that does not fit its message type is rejected with a
//! [`ProtocolError`] instead of being partially read.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use super::types::{Capability, Payload};
use crate::error::ProtocolError;

/// One wire message. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "taskId", default, skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    #[serde(default)]
    payload: Payload,
    #[serde(default, deserialize_with = "lenient_millis")]
    timestamp: i64,
}

/// Accept any JSON number (or null) as a millisecond timestamp. Fractions
/// are truncated; nothing downstream depends on the agent's clock.
fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number
        .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
        .unwrap_or_default())
}

impl Envelope {
    /// Build an envelope stamped with the current time (milliseconds since epoch).
    pub fn new(kind: impl Into<String>, task_id: Option<String>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            task_id,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Parse a single newline-free JSON frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Serialize to a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Body of an `auth` envelope.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub agent_name: String,
    pub secret_key: String,
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Messages an agent may send to the hub.
#[derive(Clone, Debug)]
pub enum InboundMessage {
    Auth(AuthRequest),
    Heartbeat,
    CommandResult { task_id: String, result: Payload },
    TaskProgress { task_id: String, progress: Payload },
    TaskResult { task_id: String, result: Payload },
    ConfigSyncAck { task_id: String, ack: Payload },
}

impl TryFrom<Envelope> for InboundMessage {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope {
            kind,
            task_id,
            payload,
            ..
        } = envelope;

        let require_task_id = |task_id: Option<String>| {
            task_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| ProtocolError::MissingTaskId { kind: kind.clone() })
        };

        match kind.as_str() {
            "auth" => {
                let request: AuthRequest = serde_json::from_value(Value::Object(payload))
                    .map_err(|e| ProtocolError::InvalidPayload {
                        kind: kind.clone(),
                        message: e.to_string(),
                    })?;
                Ok(InboundMessage::Auth(request))
            }
            "heartbeat" => Ok(InboundMessage::Heartbeat),
            "command_result" => Ok(InboundMessage::CommandResult {
                task_id: require_task_id(task_id)?,
                result: payload,
            }),
            "task_progress" => Ok(InboundMessage::TaskProgress {
                task_id: require_task_id(task_id)?,
                progress: payload,
            }),
            "task_result" => Ok(InboundMessage::TaskResult {
                task_id: require_task_id(task_id)?,
                result: payload,
            }),
            "config_sync_ack" => Ok(InboundMessage::ConfigSyncAck {
                task_id: require_task_id(task_id)?,
                ack: payload,
            }),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

/// Messages the hub sends to agents.
#[derive(Clone, Debug)]
pub enum OutboundMessage {
    AuthResult { success: bool, error: Option<String> },
    HeartbeatAck,
    Command { task_id: String, command: String },
    Task { task_id: String, task: String },
    ConfigSync { task_id: String, config: Value },
}

impl OutboundMessage {
    pub fn into_envelope(self) -> Envelope {
        let mut payload = Payload::new();
        match self {
            OutboundMessage::AuthResult { success, error } => {
                payload.insert("success".into(), Value::Bool(success));
                if let Some(error) = error {
                    payload.insert("error".into(), Value::String(error));
                }
                Envelope::new("auth_result", None, payload)
            }
            OutboundMessage::HeartbeatAck => Envelope::new("heartbeat_ack", None, payload),
            OutboundMessage::Command { task_id, command } => {
                payload.insert("command".into(), Value::String(command));
                Envelope::new("command", Some(task_id), payload)
            }
            OutboundMessage::Task { task_id, task } => {
                payload.insert("task".into(), Value::String(task));
                Envelope::new("task", Some(task_id), payload)
            }
            OutboundMessage::ConfigSync { task_id, config } => {
                payload.insert("config".into(), config);
                Envelope::new("config_sync", Some(task_id), payload)
            }
        }
    }
}
