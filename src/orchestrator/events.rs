use serde::Serialize;

use crate::hub::Payload;

/// One step of an orchestration run, as seen by the caller.
///
/// Serializes as `{"type": "<snake_case>", "data": {...}}`. Exactly one
/// terminal event (`complete` or `error`) ends every run that is not
/// abandoned by its consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Start {
        task: String,
        agents: Vec<String>,
    },
    IterationStart {
        iteration: u32,
        max_iterations: u32,
    },
    Reasoning {
        iteration: u32,
        reasoning: String,
        commands: Vec<String>,
        is_complete: bool,
    },
    CommandStart {
        iteration: u32,
        command: String,
    },
    CommandOutput {
        iteration: u32,
        command: String,
        results: Vec<Payload>,
    },
    Verification {
        iteration: u32,
        command: String,
        results: Vec<Payload>,
        passed: bool,
    },
    Complete {
        success: bool,
        message: String,
    },
    Error {
        message: String,
    },
    TaskDispatched {
        task: String,
        agents: Vec<String>,
    },
    AgentProgress {
        progress: Payload,
    },
    AgentComplete {
        result: Payload,
    },
}

impl OrchestratorEvent {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
