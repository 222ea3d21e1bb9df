pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::{Cli, Commands};
use crate::error::ConfigError;
use anyhow::Context;
use std::path::{Path, PathBuf};

/// File name searched for in the working directory and the global config dir.
pub const CONFIG_FILE_NAME: &str = "agenthub.toml";

/// Load configuration by merging global, local, and CLI sources.
/// Precedence: CLI > `--config` file (or ./agenthub.toml) > global config > defaults.
///
/// Missing config files are handled gracefully (defaults apply). An explicit
/// `--config` path that does not exist is an error.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    // Layer 1: Global config (~/.config/agenthub/agenthub.toml or platform equivalent)
    let global = load_global_config();

    // Layer 2: Explicit or working-directory config
    let local = match &cli.config {
        Some(path) => {
            let partial = read_config_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            partial
        }
        None => load_toml_file(Path::new(CONFIG_FILE_NAME)).unwrap_or_default(),
    };

    // Layer 3: CLI args (converted to PartialConfig)
    let cli_partial = cli_to_partial(cli);

    // Merge: CLI > local > global > defaults
    let config = cli_partial
        .with_fallback(local)
        .with_fallback(global)
        .finalize();

    Ok(config)
}

/// Load global config from the platform-specific config directory.
/// Returns empty PartialConfig if file not found.
fn load_global_config() -> PartialConfig {
    let path = global_config_path();
    match path {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

/// Read and parse one config file, reporting every failure.
pub fn read_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, path)
}

/// Parse TOML text into a PartialConfig. `path` is only used in the error.
pub fn parse_config(contents: &str, path: &Path) -> Result<PartialConfig, ConfigError> {
    toml::from_str::<ConfigFile>(contents)
        .map(ConfigFile::to_partial)
        .map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Load and parse a TOML config file into a PartialConfig.
/// Returns None on file-not-found; parse and read errors are logged.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match read_config_file(path) {
        Ok(partial) => {
            tracing::info!("Loaded config from {}", path.display());
            Some(partial)
        }
        Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Config error: {}", e);
            None
        }
    }
}

/// Resolve the platform-specific global config path.
/// Linux: ~/.config/agenthub/agenthub.toml
/// macOS: ~/Library/Application Support/agenthub/agenthub.toml
fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agenthub")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Convert CLI arguments to a PartialConfig for merging.
fn cli_to_partial(cli: &Cli) -> PartialConfig {
    let base = PartialConfig {
        bind: cli.bind.clone(),
        secret_key: cli.secret.clone(),
        ..Default::default()
    };
    match &cli.command {
        Commands::Run { max_iterations, .. } => PartialConfig {
            max_iterations: *max_iterations,
            ..base
        },
        Commands::Serve | Commands::Exec { .. } | Commands::Sync { .. } => base,
    }
}
