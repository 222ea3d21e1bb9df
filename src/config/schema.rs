use std::time::Duration;

use serde::Deserialize;

use crate::llm::ModelEndpoint;
use crate::orchestrator::OrchestratorSettings;

/// The TOML file structure for agenthub.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub hub: Option<HubSection>,
    pub model: Option<ModelSection>,
    pub orchestrator: Option<OrchestratorSection>,
    pub safety: Option<SafetySection>,
}

#[derive(Debug, Deserialize)]
pub struct HubSection {
    pub bind: Option<String>,
    pub secret_key: Option<String>,
    pub heartbeat_stale_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ModelSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSection {
    pub max_iterations: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub verification_timeout_secs: Option<u64>,
    pub task_timeout_secs: Option<u64>,
    pub history_window: Option<usize>,
    pub agent_wait_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SafetySection {
    pub enabled: Option<bool>,
    /// If specified, fully replaces the default blocklist.
    pub blocked_patterns: Option<Vec<BlocklistEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocklistEntry {
    pub pattern: String,
    pub reason: String,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub hub: HubSettings,
    /// `None` when any of api key, base URL or model name is missing.
    pub model: Option<ModelEndpoint>,
    pub orchestrator: OrchestratorSettings,
    /// How long one-shot commands wait for agents to come online.
    pub agent_wait: Duration,
    pub safety: SafetySettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub bind: String,
    /// Shared secret agents must present. Empty rejects every agent.
    pub secret_key: String,
    pub heartbeat_stale: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetySettings {
    pub enabled: bool,
    pub blocked_patterns: Vec<(String, String)>,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub bind: Option<String>,
    pub secret_key: Option<String>,
    pub heartbeat_stale_secs: Option<u64>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub command_timeout_secs: Option<u64>,
    pub verification_timeout_secs: Option<u64>,
    pub task_timeout_secs: Option<u64>,
    pub history_window: Option<usize>,
    pub agent_wait_secs: Option<u64>,
    pub safety_enabled: Option<bool>,
    pub blocked_patterns: Option<Vec<(String, String)>>,
}

impl ConfigFile {
    /// Flatten the sectioned file into mergeable fields.
    pub fn to_partial(self) -> PartialConfig {
        let hub = self.hub.as_ref();
        let model = self.model.as_ref();
        let orch = self.orchestrator.as_ref();
        let safety = self.safety.as_ref();

        PartialConfig {
            bind: hub.and_then(|h| h.bind.clone()),
            secret_key: hub.and_then(|h| h.secret_key.clone()),
            heartbeat_stale_secs: hub.and_then(|h| h.heartbeat_stale_secs),
            api_key: model.and_then(|m| m.api_key.clone()),
            base_url: model.and_then(|m| m.base_url.clone()),
            model: model.and_then(|m| m.model.clone()),
            max_iterations: orch.and_then(|o| o.max_iterations),
            command_timeout_secs: orch.and_then(|o| o.command_timeout_secs),
            verification_timeout_secs: orch.and_then(|o| o.verification_timeout_secs),
            task_timeout_secs: orch.and_then(|o| o.task_timeout_secs),
            history_window: orch.and_then(|o| o.history_window),
            agent_wait_secs: orch.and_then(|o| o.agent_wait_secs),
            safety_enabled: safety.and_then(|s| s.enabled),
            blocked_patterns: safety.and_then(|s| {
                s.blocked_patterns.as_ref().map(|entries| {
                    entries
                        .iter()
                        .map(|e| (e.pattern.clone(), e.reason.clone()))
                        .collect()
                })
            }),
        }
    }
}
