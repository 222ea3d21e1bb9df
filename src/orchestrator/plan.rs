//! Parsing of the model's per-iteration plan.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

/// Commands beyond this count in a single plan are ignored.
pub const MAX_COMMANDS_PER_ITERATION: usize = 3;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*```\s*$").expect("valid fence regex")
});

/// What the model wants done in one iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, alias = "isComplete")]
    pub is_complete: bool,
    #[serde(default, alias = "verificationCommand")]
    pub verification_command: Option<String>,
}

impl Plan {
    /// Parse a model reply. Never fails: a reply that is not a JSON plan
    /// becomes a plan whose reasoning is the raw text, with no commands and
    /// not complete.
    pub fn parse(raw: &str) -> Self {
        let body = strip_code_fence(raw);
        match serde_json::from_str::<Plan>(body) {
            Ok(plan) => plan.normalized(),
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    "Model reply is not a JSON plan; using it as reasoning"
                );
                Plan {
                    reasoning: raw.trim().to_string(),
                    ..Plan::default()
                }
            }
        }
    }

    fn normalized(mut self) -> Self {
        self.commands.retain(|c| !c.trim().is_empty());
        self.commands.truncate(MAX_COMMANDS_PER_ITERATION);
        self.verification_command = self
            .verification_command
            .filter(|c| !c.trim().is_empty());
        self
    }
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let plan = Plan::parse(
            r#"{"reasoning":"check disk","commands":["df -h"],"is_complete":false}"#,
        );
        assert_eq!(plan.reasoning, "check disk");
        assert_eq!(plan.commands, vec!["df -h"]);
        assert!(!plan.is_complete);
        assert_eq!(plan.verification_command, None);
    }

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"reasoning\":\"done\",\"commands\":[],\"is_complete\":true,\"verification_command\":\"test -f /tmp/x\"}\n```";
        let plan = Plan::parse(raw);
        assert!(plan.is_complete);
        assert_eq!(plan.verification_command.as_deref(), Some("test -f /tmp/x"));
    }

    #[test]
    fn strips_bare_code_fence() {
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn caps_commands_per_iteration() {
        let plan = Plan::parse(r#"{"reasoning":"r","commands":["a","b","c","d","e"]}"#);
        assert_eq!(plan.commands, vec!["a", "b", "c"]);
    }

    #[test]
    fn blank_verification_command_is_none() {
        let plan = Plan::parse(r#"{"is_complete":true,"verification_command":"  "}"#);
        assert!(plan.is_complete);
        assert_eq!(plan.verification_command, None);
    }

    #[test]
    fn accepts_camel_case_keys() {
        let plan = Plan::parse(r#"{"isComplete":true,"verificationCommand":"true"}"#);
        assert!(plan.is_complete);
        assert_eq!(plan.verification_command.as_deref(), Some("true"));
    }

    #[test]
    fn non_json_reply_becomes_reasoning() {
        let plan = Plan::parse("I think we should look at the logs first.");
        assert_eq!(plan.reasoning, "I think we should look at the logs first.");
        assert!(plan.commands.is_empty());
        assert!(!plan.is_complete);
    }
}
