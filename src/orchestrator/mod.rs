//! AI orchestration loop.
//!
//! Drives a natural-language task to completion over the agent fleet. When
//! any target agent advertises the `task` capability the whole task is
//! handed to the smart agents and their progress is relayed. Otherwise the
//! loop asks the model for a plan, broadcasts up to three commands per
//! iteration, feeds the results back into the next prompt, and stops when
//! the model declares the task complete (optionally proven by a
//! verification command) or the iteration budget runs out.
//!
//! Every step is reported as an [`OrchestratorEvent`] on a channel. Dropping
//! the receiver abandons the run at the next step boundary; commands that
//! were already broadcast keep running on the agents.

pub mod events;
pub mod plan;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

pub use events::OrchestratorEvent;
pub use plan::Plan;
pub use prompt::HistoryEntry;

use crate::error::OrchestratorError;
use crate::hub::{AgentInfo, HubHandle, Payload};
use crate::llm::{ModelClient, ModelEndpoint};
use crate::safety::CommandFilter;

/// Limits and timeouts for one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_iterations: u32,
    pub command_timeout: Duration,
    pub verification_timeout: Duration,
    /// Overall timeout for a smart-agent dispatch.
    pub task_timeout: Duration,
    /// Most recent history entries included in each prompt; `None` keeps all.
    pub history_window: Option<usize>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            command_timeout: Duration::from_secs(60),
            verification_timeout: Duration::from_secs(30),
            task_timeout: Duration::from_secs(600),
            history_window: None,
        }
    }
}

pub struct Orchestrator<H: HubHandle + ?Sized> {
    hub: Arc<H>,
    model: Option<ModelClient>,
    settings: OrchestratorSettings,
    guard: Option<CommandFilter>,
}

impl<H: HubHandle + ?Sized + 'static> Orchestrator<H> {
    pub fn new(
        hub: Arc<H>,
        endpoint: Option<ModelEndpoint>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            hub,
            model: endpoint.map(ModelClient::new),
            settings,
            guard: None,
        }
    }

    /// Refuse model-proposed commands matching `guard` instead of broadcasting them.
    pub fn with_guard(mut self, guard: Option<CommandFilter>) -> Self {
        self.guard = guard;
        self
    }

    /// Run `task` on a background task and return the event stream.
    pub fn spawn(
        self,
        task: String,
        targets: Vec<String>,
    ) -> (JoinHandle<()>, UnboundedReceiver<OrchestratorEvent>) {
        let (tx, rx) = unbounded_channel();
        let handle = tokio::spawn(async move { self.run_task(&task, &targets, tx).await });
        (handle, rx)
    }

    /// Run `task` against `targets` (empty means every online agent),
    /// reporting each step on `events`. Ends with exactly one terminal
    /// event unless the receiver is dropped first.
    pub async fn run_task(
        &self,
        task: &str,
        targets: &[String],
        events: UnboundedSender<OrchestratorEvent>,
    ) {
        if let Err(e) = self.drive(task, targets, &events).await {
            tracing::warn!(error = %e, "Orchestration run aborted");
            send_event(&events, OrchestratorEvent::Error { message: e.to_string() });
        }
    }

    async fn drive(
        &self,
        task: &str,
        targets: &[String],
        events: &UnboundedSender<OrchestratorEvent>,
    ) -> Result<(), OrchestratorError> {
        let model = self.model.as_ref().ok_or(OrchestratorError::NoEndpoint)?;
        if !self.hub.is_running() {
            return Err(OrchestratorError::HubNotRunning);
        }
        let agents = resolve_agents(self.hub.online_agents(), targets);
        if agents.is_empty() {
            return Err(OrchestratorError::NoTargets);
        }

        tracing::info!(agents = agents.len(), "Orchestration run started");
        send_event(
            events,
            OrchestratorEvent::Start {
                task: task.to_string(),
                agents: agents.iter().map(|a| a.name.clone()).collect(),
            },
        );

        if self.hub.has_smart_agents(targets) {
            let smart: Vec<String> = agents
                .iter()
                .filter(|a| a.is_smart())
                .map(|a| a.name.clone())
                .collect();
            self.dispatch_to_smart_agents(task, targets, smart, events).await;
            return Ok(());
        }

        self.iterate(model, task, targets, &agents, events).await
    }

    // -----------------------------------------------------------------------
    // Smart-agent path
    // -----------------------------------------------------------------------

    async fn dispatch_to_smart_agents(
        &self,
        task: &str,
        targets: &[String],
        smart: Vec<String>,
        events: &UnboundedSender<OrchestratorEvent>,
    ) {
        send_event(
            events,
            OrchestratorEvent::TaskDispatched {
                task: task.to_string(),
                agents: smart,
            },
        );

        let (progress_tx, mut progress_rx) = unbounded_channel::<Payload>();
        let dispatch = self
            .hub
            .dispatch_task(task, targets, self.settings.task_timeout, Some(progress_tx));
        tokio::pin!(dispatch);

        // Progress queued before the results resolve is always relayed first.
        let results = loop {
            tokio::select! {
                biased;
                Some(progress) = progress_rx.recv() => {
                    send_event(events, OrchestratorEvent::AgentProgress { progress });
                }
                results = &mut dispatch => break results,
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            send_event(events, OrchestratorEvent::AgentProgress { progress });
        }

        let success = results
            .iter()
            .all(|r| r.get("success").and_then(|v| v.as_bool()) != Some(false));
        let reported = results.len();
        for result in results {
            send_event(events, OrchestratorEvent::AgentComplete { result });
        }

        tracing::info!(reported, success, "Smart-agent dispatch finished");
        let message = if success {
            format!("{reported} agent(s) completed the task")
        } else {
            "one or more agents reported failure".to_string()
        };
        send_event(events, OrchestratorEvent::Complete { success, message });
    }

    // -----------------------------------------------------------------------
    // Iterative path
    // -----------------------------------------------------------------------

    async fn iterate(
        &self,
        model: &ModelClient,
        task: &str,
        targets: &[String],
        agents: &[AgentInfo],
        events: &UnboundedSender<OrchestratorEvent>,
    ) -> Result<(), OrchestratorError> {
        let max_iterations = self.settings.max_iterations;
        let mut history: Vec<HistoryEntry> = Vec::new();

        for iteration in 1..=max_iterations {
            if events.is_closed() {
                tracing::info!(iteration, "Event consumer gone; abandoning run");
                return Ok(());
            }
            send_event(
                events,
                OrchestratorEvent::IterationStart {
                    iteration,
                    max_iterations,
                },
            );

            let user_prompt = prompt::build_user_prompt(
                task,
                agents,
                &history,
                iteration,
                max_iterations,
                self.settings.history_window,
            );
            let reply = model.complete(prompt::SYSTEM_PROMPT, &user_prompt).await?;
            let plan = Plan::parse(&reply);
            tracing::debug!(
                iteration,
                commands = plan.commands.len(),
                complete = plan.is_complete,
                "Plan received"
            );

            send_event(
                events,
                OrchestratorEvent::Reasoning {
                    iteration,
                    reasoning: plan.reasoning.clone(),
                    commands: plan.commands.clone(),
                    is_complete: plan.is_complete,
                },
            );

            for command in &plan.commands {
                if events.is_closed() {
                    return Ok(());
                }
                send_event(
                    events,
                    OrchestratorEvent::CommandStart {
                        iteration,
                        command: command.clone(),
                    },
                );
                let results = self
                    .execute(command, targets, self.settings.command_timeout)
                    .await;
                send_event(
                    events,
                    OrchestratorEvent::CommandOutput {
                        iteration,
                        command: command.clone(),
                        results: results.clone(),
                    },
                );
                history.push(HistoryEntry {
                    iteration,
                    command: command.clone(),
                    results,
                });
            }

            if !plan.is_complete {
                continue;
            }

            let Some(verification) = plan.verification_command else {
                send_event(
                    events,
                    OrchestratorEvent::Complete {
                        success: true,
                        message: completion_message(&plan.reasoning),
                    },
                );
                return Ok(());
            };

            let results = self
                .execute(&verification, targets, self.settings.verification_timeout)
                .await;
            let passed = verification_passed(&results);
            send_event(
                events,
                OrchestratorEvent::Verification {
                    iteration,
                    command: verification.clone(),
                    results: results.clone(),
                    passed,
                },
            );
            history.push(HistoryEntry {
                iteration,
                command: verification,
                results,
            });

            if passed {
                send_event(
                    events,
                    OrchestratorEvent::Complete {
                        success: true,
                        message: completion_message(&plan.reasoning),
                    },
                );
                return Ok(());
            }
            tracing::info!(iteration, "Verification failed; continuing");
        }

        tracing::info!(max_iterations, "Orchestration run hit the iteration limit");
        send_event(
            events,
            OrchestratorEvent::Complete {
                success: false,
                message: "max iterations reached".to_string(),
            },
        );
        Ok(())
    }

    /// Broadcast `command`, unless the guard refuses it, in which case the
    /// refusal stands in as the only result.
    async fn execute(&self, command: &str, targets: &[String], timeout: Duration) -> Vec<Payload> {
        if let Some(blocked) = self.guard.as_ref().and_then(|g| g.check(command)) {
            tracing::warn!(
                command = %command,
                reason = %blocked.reason,
                "Command blocked by guard"
            );
            return vec![blocked.to_result()];
        }
        self.hub.broadcast(command, targets, timeout).await
    }
}

/// Online agents named in `targets`, or all of them when `targets` is empty.
fn resolve_agents(online: Vec<AgentInfo>, targets: &[String]) -> Vec<AgentInfo> {
    online
        .into_iter()
        .filter(|a| targets.is_empty() || targets.iter().any(|t| *t == a.name))
        .collect()
}

/// A verification passes only if someone answered and every answer has exit code 0.
pub fn verification_passed(results: &[Payload]) -> bool {
    !results.is_empty()
        && results
            .iter()
            .all(|r| r.get("exitCode").and_then(|v| v.as_i64()) == Some(0))
}

fn completion_message(reasoning: &str) -> String {
    if reasoning.trim().is_empty() {
        "task complete".to_string()
    } else {
        reasoning.to_string()
    }
}

fn send_event(events: &UnboundedSender<OrchestratorEvent>, event: OrchestratorEvent) {
    let _ = events.send(event);
}
