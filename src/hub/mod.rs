//! Agent hub: connection registry, authentication, and the broadcast,
//! task-dispatch and config-sync exchanges built on top of it.
//!
//! [`AgentHub`] is cheap to clone; every clone shares the same registry and
//! exchange table. Both live behind their own `std::sync::Mutex`, and no
//! lock is ever held across an `.await`, so per-connection reader tasks on
//! different worker threads can feed responses in concurrently.

pub mod exchange;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use exchange::{ExchangeKind, ExchangeTable};
use protocol::{Envelope, OutboundMessage};
use registry::{ConnectionRegistry, Target};
pub use types::{AgentInfo, Capability, CapabilitySet, ConnectionId, Payload};

/// Interval between registry polls in [`AgentHub::wait_for_agents`].
const AGENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The hub operations the orchestration loop depends on.
#[async_trait]
pub trait HubHandle: Send + Sync {
    fn is_running(&self) -> bool;

    fn online_agents(&self) -> Vec<AgentInfo>;

    /// Whether any resolved target advertises the `task` capability.
    fn has_smart_agents(&self, targets: &[String]) -> bool;

    async fn broadcast(&self, command: &str, targets: &[String], timeout: Duration) -> Vec<Payload>;

    async fn dispatch_task(
        &self,
        task: &str,
        targets: &[String],
        timeout: Duration,
        on_progress: Option<UnboundedSender<Payload>>,
    ) -> Vec<Payload>;

    async fn sync_config(
        &self,
        config: &Value,
        targets: &[String],
        timeout: Duration,
    ) -> Vec<Payload>;
}

struct HubInner {
    secret: String,
    registry: Mutex<ConnectionRegistry>,
    exchanges: Mutex<ExchangeTable>,
    running: AtomicBool,
}

#[derive(Clone)]
pub struct AgentHub {
    inner: Arc<HubInner>,
}

impl AgentHub {
    /// Create a hub that admits agents presenting `secret`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                secret: secret.into(),
                registry: Mutex::new(ConnectionRegistry::new()),
                exchanges: Mutex::new(ExchangeTable::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn exchanges(&self) -> MutexGuard<'_, ExchangeTable> {
        self.inner
            .exchanges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn secret(&self) -> &str {
        &self.inner.secret
    }

    /// Whether a listener is currently serving this hub.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.inner.running.store(running, Ordering::SeqCst);
    }

    /// Register a newly accepted transport channel. Every frame the hub
    /// wants to send to this agent is pushed into `outbound`.
    pub fn accept(
        &self,
        outbound: UnboundedSender<Envelope>,
        peer: Option<String>,
    ) -> ConnectionId {
        let id = self.registry().accept(outbound, peer.clone());
        tracing::info!(
            conn_id = %id,
            peer = peer.as_deref().unwrap_or("-"),
            "Agent connection accepted"
        );
        id
    }

    /// Drop a connection whose transport closed. In-flight exchanges are
    /// not notified; they resolve through their own timeout.
    pub fn disconnect(&self, conn_id: &str) {
        if let Some(info) = self.registry().remove(conn_id) {
            tracing::info!(
                conn_id = %conn_id,
                agent = %info.name,
                authenticated = info.authenticated,
                "Agent disconnected"
            );
        }
    }

    pub fn online_agents(&self) -> Vec<AgentInfo> {
        self.registry().online()
    }

    pub fn agent(&self, conn_id: &str) -> Option<AgentInfo> {
        self.registry().get(conn_id)
    }

    pub fn has_smart_agents(&self, targets: &[String]) -> bool {
        self.registry()
            .resolve(targets)
            .iter()
            .any(|t| t.capabilities.is_smart())
    }

    /// Number of exchanges still waiting for responses.
    pub fn pending_exchanges(&self) -> usize {
        self.exchanges().len()
    }

    /// Authenticated agents whose last heartbeat is older than `threshold`.
    pub fn stale_agents(&self, threshold: Duration) -> Vec<AgentInfo> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        self.online_agents()
            .into_iter()
            .filter(|a| a.is_stale(now, threshold))
            .collect()
    }

    /// Poll until at least `min` agents are online or `timeout` elapses.
    /// Returns the number online when it stopped waiting.
    pub async fn wait_for_agents(&self, min: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let online = self.online_agents().len();
            if online >= min || tokio::time::Instant::now() >= deadline {
                return online;
            }
            tokio::time::sleep(AGENT_POLL_INTERVAL).await;
        }
    }

    /// Send a shell command to the targets and collect `command_result`s.
    ///
    /// An empty `targets` list means every online agent. Resolves as soon as
    /// every target answered, or with the partial list when `timeout` fires.
    pub async fn broadcast(
        &self,
        command: &str,
        targets: &[String],
        timeout: Duration,
    ) -> Vec<Payload> {
        let resolved = self.registry().resolve(targets);
        self.run_exchange(ExchangeKind::Command, resolved, timeout, None, |task_id| {
            OutboundMessage::Command {
                task_id,
                command: command.to_string(),
            }
        })
        .await
    }

    /// Hand a natural-language task to the smart agents among the targets.
    ///
    /// Agents without the `task` capability are never sent the task, even
    /// when named explicitly. `task_progress` events are forwarded to
    /// `on_progress` as they arrive.
    pub async fn dispatch_task(
        &self,
        task: &str,
        targets: &[String],
        timeout: Duration,
        on_progress: Option<UnboundedSender<Payload>>,
    ) -> Vec<Payload> {
        let (smart, skipped): (Vec<Target>, Vec<Target>) = self
            .registry()
            .resolve(targets)
            .into_iter()
            .partition(|t| t.capabilities.is_smart());
        if !skipped.is_empty() {
            tracing::debug!(
                skipped = ?skipped.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "Agents without task capability excluded from dispatch"
            );
        }
        drop(skipped);

        self.run_exchange(ExchangeKind::Task, smart, timeout, on_progress, |task_id| {
            OutboundMessage::Task {
                task_id,
                task: task.to_string(),
            }
        })
        .await
    }

    /// Push a configuration object to the targets and collect acknowledgements.
    pub async fn sync_config(
        &self,
        config: &Value,
        targets: &[String],
        timeout: Duration,
    ) -> Vec<Payload> {
        let resolved = self.registry().resolve(targets);
        self.run_exchange(ExchangeKind::ConfigSync, resolved, timeout, None, |task_id| {
            OutboundMessage::ConfigSync {
                task_id,
                config: config.clone(),
            }
        })
        .await
    }

    async fn run_exchange<F>(
        &self,
        kind: ExchangeKind,
        targets: Vec<Target>,
        timeout: Duration,
        progress: Option<UnboundedSender<Payload>>,
        message: F,
    ) -> Vec<Payload>
    where
        F: Fn(String) -> OutboundMessage,
    {
        if targets.is_empty() {
            tracing::debug!(?kind, "No matching agents; exchange not opened");
            return Vec::new();
        }

        let expected = targets.len();
        let (task_id, mut done) = self.exchanges().open(kind, expected, progress);
        tracing::debug!(task_id = %task_id, ?kind, expected, "Exchange opened");
        let _open = OpenExchange {
            hub: self,
            task_id: &task_id,
        };

        // Targets are consumed here so no outbound sender outlives the send.
        for target in targets {
            let envelope = message(task_id.clone()).into_envelope();
            if target.outbound.send(envelope).is_err() {
                tracing::debug!(
                    task_id = %task_id,
                    agent = %target.name,
                    "Agent channel closed before send"
                );
            }
        }

        match tokio::time::timeout(timeout, &mut done).await {
            Ok(Ok(results)) => results,
            Ok(Err(_)) => {
                let partial = self.exchanges().expire(&task_id);
                partial.unwrap_or_default()
            }
            Err(_) => {
                let partial = self.exchanges().expire(&task_id);
                match partial {
                    Some(results) => {
                        tracing::info!(
                            task_id = %task_id,
                            expected,
                            received = results.len(),
                            "Exchange timed out; returning partial results"
                        );
                        results
                    }
                    // Completed between the timer firing and the expiry.
                    None => done.try_recv().unwrap_or_default(),
                }
            }
        }
    }
}

/// Expires its exchange on drop, so a caller that stops polling
/// (outer timeout, `select!`, task abort) leaves no entry behind.
struct OpenExchange<'a> {
    hub: &'a AgentHub,
    task_id: &'a str,
}

impl Drop for OpenExchange<'_> {
    fn drop(&mut self) {
        if self.hub.exchanges().expire(self.task_id).is_some() {
            tracing::debug!(task_id = %self.task_id, "Abandoned exchange removed");
        }
    }
}

#[async_trait]
impl HubHandle for AgentHub {
    fn is_running(&self) -> bool {
        AgentHub::is_running(self)
    }

    fn online_agents(&self) -> Vec<AgentInfo> {
        AgentHub::online_agents(self)
    }

    fn has_smart_agents(&self, targets: &[String]) -> bool {
        AgentHub::has_smart_agents(self, targets)
    }

    async fn broadcast(
        &self,
        command: &str,
        targets: &[String],
        timeout: Duration,
    ) -> Vec<Payload> {
        AgentHub::broadcast(self, command, targets, timeout).await
    }

    async fn dispatch_task(
        &self,
        task: &str,
        targets: &[String],
        timeout: Duration,
        on_progress: Option<UnboundedSender<Payload>>,
    ) -> Vec<Payload> {
        AgentHub::dispatch_task(self, task, targets, timeout, on_progress).await
    }

    async fn sync_config(
        &self,
        config: &Value,
        targets: &[String],
        timeout: Duration,
    ) -> Vec<Payload> {
        AgentHub::sync_config(self, config, targets, timeout).await
    }
}
