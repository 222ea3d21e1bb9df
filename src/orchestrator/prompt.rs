//! Prompt construction for the iterative loop.
//!
//! The system prompt fixes the reply format. The user prompt carries the
//! task, the agents in play and the execution history so far, so the model
//! can react to earlier failures.

use std::fmt::Write;

use serde::Serialize;

use crate::hub::{AgentInfo, Payload};
use crate::text::truncate_chars;

/// Characters of output (or error text) kept per agent per history entry.
pub const HISTORY_OUTPUT_LIMIT: usize = 500;

/// One executed command and what every reporting agent said about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub command: String,
    pub results: Vec<Payload>,
}

pub const SYSTEM_PROMPT: &str = "\
You are the orchestrator of a fleet of remote machines. Each machine runs an agent that \
executes shell commands you choose and reports the output and exit code.

Work toward the user's task in small, observable steps. Every reply must be a single JSON \
object and nothing else:

{
  \"reasoning\": \"what you learned and what you will do next\",
  \"commands\": [\"shell command\", \"...\"],
  \"is_complete\": false,
  \"verification_command\": null
}

Rules:
- At most 3 commands per reply. Each command runs on every target agent.
- Commands must be non-interactive and finish within 60 seconds.
- Set is_complete to true only when the task is done. If a command can prove it \
(exit code 0 on every agent), put it in verification_command.
- If an earlier command failed, read its output and adjust instead of repeating it.";

/// Build the user message for one iteration.
///
/// With `window` set, only the most recent `window` history entries are
/// included and the number of omitted entries is stated.
pub fn build_user_prompt(
    task: &str,
    agents: &[AgentInfo],
    history: &[HistoryEntry],
    iteration: u32,
    max_iterations: u32,
    window: Option<usize>,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Task\n{task}\n");

    let _ = writeln!(prompt, "## Target agents");
    for agent in agents {
        let capabilities: Vec<String> = agent.capabilities.iter().map(|c| c.to_string()).collect();
        let _ = writeln!(prompt, "- {} ({})", agent.name, capabilities.join(", "));
    }
    prompt.push('\n');

    let _ = writeln!(prompt, "## Iteration\n{iteration} of {max_iterations}\n");

    let _ = writeln!(prompt, "## Execution history");
    if history.is_empty() {
        prompt.push_str("No commands have been run yet.\n");
    } else {
        let skip = window.map_or(0, |w| history.len().saturating_sub(w));
        if skip > 0 {
            let _ = writeln!(prompt, "({skip} earlier entries omitted)");
        }
        for entry in &history[skip..] {
            render_entry(&mut prompt, entry);
        }
    }

    prompt
}

fn render_entry(out: &mut String, entry: &HistoryEntry) {
    let _ = writeln!(out, "\n[iteration {}] $ {}", entry.iteration, entry.command);
    if entry.results.is_empty() {
        out.push_str("  (no agent responded before the timeout)\n");
        return;
    }
    for result in &entry.results {
        let agent = str_field(result, "agentName").unwrap_or("unknown");
        let exit = result
            .get("exitCode")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "?".to_string());
        let text = str_field(result, "output")
            .filter(|s| !s.is_empty())
            .or_else(|| str_field(result, "error"))
            .unwrap_or("");
        let _ = writeln!(
            out,
            "  {agent} (exit {exit}): {}",
            truncate_chars(text.trim(), HISTORY_OUTPUT_LIMIT)
        );
    }
}

fn str_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str())
}
