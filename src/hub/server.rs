//! TCP transport for the hub.
//!
//! Agents connect over plain TCP and exchange newline-delimited JSON
//! envelopes. Each connection gets one reader loop, which feeds frames to
//! the router strictly in arrival order, and one writer task draining the
//! connection's outbound channel. When the reader sees EOF or an I/O error
//! the connection is removed from the registry.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;

use super::AgentHub;
use super::protocol::Envelope;

/// Default age after which an agent's heartbeat is reported as stale.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(90);

pub struct HubServer {
    hub: AgentHub,
    listener: TcpListener,
    stale_after: Duration,
}

impl HubServer {
    /// Bind the listener. The hub reports itself running from here until
    /// [`HubServer::run`] returns.
    pub async fn bind(hub: AgentHub, addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        hub.set_running(true);
        Ok(Self {
            hub,
            listener,
            stale_after: DEFAULT_STALE_AFTER,
        })
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept agent connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!(addr = %addr, "Agent hub listening");

        tokio::spawn(sweep_stale_agents(
            self.hub.clone(),
            self.stale_after,
            shutdown.child_token(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = self.hub.clone();
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(hub, stream, peer, token).await {
                                tracing::warn!(peer = %peer, error = %e, "Agent connection error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to accept agent connection"),
                },
            }
        }

        self.hub.set_running(false);
        tracing::info!("Agent hub stopped");
        Ok(())
    }
}

async fn handle_connection(
    hub: AgentHub,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = unbounded_channel::<Envelope>();
    let conn_id = hub.accept(tx, Some(peer.to_string()));

    // Ends once the registry and every in-flight exchange have dropped their senders.
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let line = match envelope.to_line() {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode outbound envelope");
                    continue;
                }
            };
            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await
            }
            .await;
            if written.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => hub.handle_frame(&conn_id, &line),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e.into()),
            },
        }
    };

    hub.disconnect(&conn_id);
    result
}

/// Periodically log authenticated agents whose heartbeat has gone quiet.
/// Nothing is disconnected; the transport close is the only removal path.
async fn sweep_stale_agents(hub: AgentHub, stale_after: Duration, shutdown: CancellationToken) {
    let period = (stale_after / 2).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                for agent in hub.stale_agents(stale_after) {
                    tracing::warn!(
                        agent = %agent.name,
                        conn_id = %agent.id,
                        last_heartbeat = %agent.last_heartbeat,
                        "Agent heartbeat is stale"
                    );
                }
            }
        }
    }
}
