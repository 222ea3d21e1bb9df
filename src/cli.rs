use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "agenthub",
    version,
    about = "Hub for remote command agents, with an AI orchestration loop"
)]
pub struct Cli {
    /// Path to config file (overrides ./agenthub.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address the agent listener binds to (e.g. "0.0.0.0:2620")
    #[arg(long, global = true)]
    pub bind: Option<String>,

    /// Shared secret agents must present when authenticating
    #[arg(long, global = true, env = "AGENTHUB_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Agent name to target; repeat for several. Omit to target every online agent
    #[arg(short, long = "target", global = true)]
    pub targets: Vec<String>,

    /// Minimum number of agents to wait for before acting
    #[arg(long, global = true, default_value_t = 1)]
    pub wait_agents: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the hub until interrupted
    Serve,
    /// Broadcast one shell command and print the results as JSON
    Exec {
        /// Shell command to run on every target agent
        command: String,

        /// Seconds to wait for results
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Drive a natural-language task with the AI loop, printing one JSON event per line
    Run {
        /// Task description
        task: String,

        /// Maximum plan/execute iterations
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Push a JSON config object to agents and print their acknowledgements
    Sync {
        /// JSON file holding the config object
        file: PathBuf,

        /// Seconds to wait for acknowledgements
        #[arg(long)]
        timeout: Option<u64>,
    },
}
