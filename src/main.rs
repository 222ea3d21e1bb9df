use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use agenthub::cli::{Cli, Commands};
use agenthub::config::{self, AppConfig};
use agenthub::hub::AgentHub;
use agenthub::hub::server::HubServer;
use agenthub::orchestrator::{Orchestrator, OrchestratorEvent};
use agenthub::safety;

/// Default wait for `exec` results, in seconds.
const EXEC_TIMEOUT_SECS: u64 = 60;
/// Default wait for `sync` acknowledgements, in seconds.
const SYNC_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only JSON output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("Agent hub starting");

    let config = config::load_config(&cli)?;
    tracing::info!(
        bind = %config.hub.bind,
        model = config.model.as_ref().map(|m| m.model.as_str()).unwrap_or("-"),
        guard = config.safety.enabled,
        "Config loaded"
    );
    if config.hub.secret_key.is_empty() {
        tracing::warn!("No hub secret configured; every agent will be rejected");
    }

    let hub = AgentHub::new(config.hub.secret_key.clone());
    let server = HubServer::bind(hub.clone(), &config.hub.bind)
        .await
        .with_context(|| format!("Failed to bind agent listener on {}", config.hub.bind))?
        .with_stale_after(config.hub.heartbeat_stale);
    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    let outcome = run_command(&cli, &config, &hub).await;

    shutdown.cancel();
    server_task.await??;
    outcome
}

async fn run_command(cli: &Cli, config: &AppConfig, hub: &AgentHub) -> anyhow::Result<()> {
    if let Commands::Serve = cli.command {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Interrupted; shutting down");
        return Ok(());
    }

    let online = hub.wait_for_agents(cli.wait_agents, config.agent_wait).await;
    if online < cli.wait_agents {
        tracing::warn!(
            online,
            wanted = cli.wait_agents,
            "Proceeding with fewer agents than requested"
        );
    }

    match &cli.command {
        Commands::Serve => Ok(()),
        Commands::Exec { command, timeout } => {
            let timeout = Duration::from_secs(timeout.unwrap_or(EXEC_TIMEOUT_SECS));
            let results = hub.broadcast(command, &cli.targets, timeout).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Commands::Sync { file, timeout } => {
            let contents = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload: serde_json::Value = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            anyhow::ensure!(payload.is_object(), "{} must contain a JSON object", file.display());

            let timeout = Duration::from_secs(timeout.unwrap_or(SYNC_TIMEOUT_SECS));
            let acks = hub.sync_config(&payload, &cli.targets, timeout).await;
            println!("{}", serde_json::to_string_pretty(&acks)?);
            Ok(())
        }
        Commands::Run { task, .. } => run_task(cli, config, hub, task).await,
    }
}

/// Drive the orchestration loop, printing each event as one JSON line.
/// Ctrl+C abandons the run; commands already sent keep running on the agents.
async fn run_task(cli: &Cli, config: &AppConfig, hub: &AgentHub, task: &str) -> anyhow::Result<()> {
    let guard = safety::command_guard(&config.safety)?;
    let orchestrator = Orchestrator::new(
        Arc::new(hub.clone()),
        config.model.clone(),
        config.orchestrator.clone(),
    )
    .with_guard(guard);

    let (handle, mut events) = orchestrator.spawn(task.to_string(), cli.targets.clone());
    let mut succeeded = false;
    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if event.is_terminal() {
                        succeeded =
                            matches!(event, OrchestratorEvent::Complete { success: true, .. });
                    }
                    println!("{}", serde_json::to_string(&event)?);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; abandoning orchestration run");
                interrupted = true;
                break;
            }
        }
    }
    drop(events);
    if interrupted {
        handle.abort();
        let _ = handle.await;
        return Ok(());
    }
    handle.await?;

    anyhow::ensure!(succeeded, "task did not complete successfully");
    Ok(())
}
