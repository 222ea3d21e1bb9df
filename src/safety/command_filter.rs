use regex::{Regex, RegexSet};
use serde_json::json;

use crate::error::ConfigError;
use crate::hub::Payload;

/// Exit code reported for a command the guard refused to send.
pub const BLOCKED_EXIT_CODE: i64 = 126;

/// Name recorded as the reporting agent for guard rejections.
pub const GUARD_AGENT_NAME: &str = "hub";

/// Checks model-proposed commands against a set of blocked patterns.
#[derive(Debug)]
pub struct CommandFilter {
    patterns: RegexSet,
    pattern_reasons: Vec<String>,
}

/// A command the filter refused.
#[derive(Debug, Clone)]
pub struct BlockedCommand {
    pub blocked: bool,
    pub reason: String,
    pub command: String,
}

impl CommandFilter {
    /// Compile a filter from `(pattern, reason)` pairs. The first pattern
    /// that fails to compile is named in the error.
    pub fn new(patterns: &[(String, String)]) -> Result<Self, ConfigError> {
        for (pattern, _) in patterns {
            if let Err(e) = Regex::new(pattern) {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                });
            }
        }

        let (regexes, reasons): (Vec<_>, Vec<_>) = patterns.iter().cloned().unzip();
        let patterns = RegexSet::new(&regexes).map_err(|e| ConfigError::InvalidPattern {
            pattern: regexes.join(" | "),
            message: e.to_string(),
        })?;
        Ok(Self {
            patterns,
            pattern_reasons: reasons,
        })
    }

    pub fn from_defaults() -> Result<Self, ConfigError> {
        Self::new(&super::defaults::default_blocklist())
    }

    pub fn len(&self) -> usize {
        self.pattern_reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_reasons.is_empty()
    }

    /// Returns `Some` with the first matching pattern's reason if the command is blocked.
    pub fn check(&self, command: &str) -> Option<BlockedCommand> {
        let first = self.patterns.matches(command).into_iter().next()?;
        Some(BlockedCommand {
            blocked: true,
            reason: self.pattern_reasons[first].clone(),
            command: command.to_string(),
        })
    }
}

impl BlockedCommand {
    /// The stand-in agent result recorded in history instead of a broadcast.
    pub fn to_result(&self) -> Payload {
        let value = json!({
            "agentName": GUARD_AGENT_NAME,
            "error": format!("Command blocked by hub guard: {}", self.reason),
            "exitCode": BLOCKED_EXIT_CODE,
            "blocked": true,
        });
        match value {
            serde_json::Value::Object(map) => map,
            _ => Payload::new(),
        }
    }
}
