use std::time::Duration;

use super::schema::{AppConfig, HubSettings, PartialConfig, SafetySettings};
use crate::llm::ModelEndpoint;
use crate::orchestrator::OrchestratorSettings;
use crate::safety::defaults::default_blocklist;

pub const DEFAULT_BIND: &str = "0.0.0.0:2620";
const DEFAULT_HEARTBEAT_STALE_SECS: u64 = 90;
const DEFAULT_AGENT_WAIT_SECS: u64 = 10;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For blocked_patterns: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            bind: self.bind.or(fallback.bind),
            secret_key: self.secret_key.or(fallback.secret_key),
            heartbeat_stale_secs: self.heartbeat_stale_secs.or(fallback.heartbeat_stale_secs),
            api_key: self.api_key.or(fallback.api_key),
            base_url: self.base_url.or(fallback.base_url),
            model: self.model.or(fallback.model),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
            command_timeout_secs: self.command_timeout_secs.or(fallback.command_timeout_secs),
            verification_timeout_secs: self
                .verification_timeout_secs
                .or(fallback.verification_timeout_secs),
            task_timeout_secs: self.task_timeout_secs.or(fallback.task_timeout_secs),
            history_window: self.history_window.or(fallback.history_window),
            agent_wait_secs: self.agent_wait_secs.or(fallback.agent_wait_secs),
            safety_enabled: self.safety_enabled.or(fallback.safety_enabled),
            blocked_patterns: self.blocked_patterns.or(fallback.blocked_patterns),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let defaults = OrchestratorSettings::default();
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let model = match (
            non_empty(self.api_key),
            non_empty(self.base_url),
            non_empty(self.model),
        ) {
            (Some(api_key), Some(base_url), Some(model)) => Some(ModelEndpoint {
                api_key,
                base_url,
                model,
            }),
            _ => None,
        };

        AppConfig {
            hub: HubSettings {
                bind: self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
                secret_key: self.secret_key.unwrap_or_default(),
                heartbeat_stale: Duration::from_secs(
                    self.heartbeat_stale_secs.unwrap_or(DEFAULT_HEARTBEAT_STALE_SECS),
                ),
            },
            model,
            orchestrator: OrchestratorSettings {
                max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
                command_timeout: self
                    .command_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.command_timeout),
                verification_timeout: self
                    .verification_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.verification_timeout),
                task_timeout: self
                    .task_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.task_timeout),
                history_window: self.history_window.or(defaults.history_window),
            },
            agent_wait: Duration::from_secs(
                self.agent_wait_secs.unwrap_or(DEFAULT_AGENT_WAIT_SECS),
            ),
            safety: SafetySettings {
                enabled: self.safety_enabled.unwrap_or(false),
                blocked_patterns: self.blocked_patterns.unwrap_or_else(default_blocklist),
            },
        }
    }
}
