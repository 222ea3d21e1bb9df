//! Inbound message routing.
//!
//! Decodes frames from an agent connection and dispatches them by message
//! kind. `auth` and `heartbeat` are handled for any connection; results,
//! progress and acks from a connection that has not authenticated are
//! dropped without a reply.

use super::AgentHub;
use super::exchange::{ExchangeKind, RecordOutcome};
use super::protocol::{AuthRequest, Envelope, InboundMessage, OutboundMessage};
use super::registry::AuthOutcome;
use super::types::Payload;

impl AgentHub {
    /// Decode one raw frame and route it. Malformed frames are logged and
    /// dropped, except a malformed `auth`, which is answered with a failed
    /// `auth_result` so the agent is not left waiting.
    pub fn handle_frame(&self, conn_id: &str, frame: &str) {
        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "Rejected inbound envelope");
                return;
            }
        };

        let is_auth = envelope.kind() == "auth";
        match InboundMessage::try_from(envelope) {
            Ok(message) => self.handle_message(conn_id, message),
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "Rejected inbound envelope");
                if is_auth {
                    self.reply(
                        conn_id,
                        OutboundMessage::AuthResult {
                            success: false,
                            error: Some(format!("Malformed auth request: {e}")),
                        },
                    );
                }
            }
        }
    }

    /// Route one decoded message from `conn_id`.
    pub fn handle_message(&self, conn_id: &str, message: InboundMessage) {
        match message {
            InboundMessage::Auth(request) => self.handle_auth(conn_id, request),
            InboundMessage::Heartbeat => self.handle_heartbeat(conn_id),
            InboundMessage::CommandResult { task_id, result } => {
                self.deliver(conn_id, ExchangeKind::Command, &task_id, result)
            }
            InboundMessage::TaskResult { task_id, result } => {
                self.deliver(conn_id, ExchangeKind::Task, &task_id, result)
            }
            InboundMessage::ConfigSyncAck { task_id, ack } => {
                self.deliver(conn_id, ExchangeKind::ConfigSync, &task_id, ack)
            }
            InboundMessage::TaskProgress { task_id, progress } => {
                if !self.registry().is_authenticated(conn_id) {
                    tracing::debug!(
                        conn_id = %conn_id,
                        "Ignoring task_progress from unauthenticated connection"
                    );
                    return;
                }
                let relayed = self.exchanges().relay_progress(&task_id, progress);
                if !relayed {
                    tracing::debug!(
                        conn_id = %conn_id,
                        task_id = %task_id,
                        "Progress for unknown or finished task dropped"
                    );
                }
            }
        }
    }

    fn handle_auth(&self, conn_id: &str, request: AuthRequest) {
        let agent_name = request.agent_name.clone();
        let outcome = self.registry().authenticate(conn_id, request, self.secret());

        let reply = match outcome {
            AuthOutcome::Accepted => {
                tracing::info!(conn_id = %conn_id, agent = %agent_name, "Agent authenticated");
                OutboundMessage::AuthResult {
                    success: true,
                    error: None,
                }
            }
            AuthOutcome::Rejected(reason) => {
                tracing::warn!(
                    conn_id = %conn_id,
                    agent = %agent_name,
                    "Agent authentication failed"
                );
                OutboundMessage::AuthResult {
                    success: false,
                    error: Some(reason),
                }
            }
            AuthOutcome::UnknownConnection => return,
        };
        self.reply(conn_id, reply);
    }

    fn handle_heartbeat(&self, conn_id: &str) {
        let known = self.registry().touch_heartbeat(conn_id);
        if known {
            self.reply(conn_id, OutboundMessage::HeartbeatAck);
        }
    }

    fn deliver(&self, conn_id: &str, kind: ExchangeKind, task_id: &str, payload: Payload) {
        if !self.registry().is_authenticated(conn_id) {
            tracing::debug!(
                conn_id = %conn_id,
                kind = kind.response_type(),
                "Ignoring response from unauthenticated connection"
            );
            return;
        }

        let outcome = self.exchanges().record(kind, task_id, payload);
        match outcome {
            RecordOutcome::Completed => {
                tracing::debug!(
                    task_id = %task_id,
                    kind = kind.response_type(),
                    "Exchange completed"
                );
            }
            RecordOutcome::Pending => {}
            RecordOutcome::Discarded => {
                tracing::debug!(
                    conn_id = %conn_id,
                    task_id = %task_id,
                    kind = kind.response_type(),
                    "Late or unmatched response discarded"
                );
            }
        }
    }

    fn reply(&self, conn_id: &str, message: OutboundMessage) {
        let outbound = self.registry().outbound(conn_id);
        if let Some(tx) = outbound {
            let _ = tx.send(message.into_envelope());
        }
    }
}
