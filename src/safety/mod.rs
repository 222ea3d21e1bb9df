//! Optional guard applied to model-proposed commands before they are broadcast.

pub mod command_filter;
pub mod defaults;

pub use command_filter::{BlockedCommand, CommandFilter};

use crate::config::SafetySettings;
use crate::error::ConfigError;

/// Build the command guard described by `settings`, or `None` when disabled.
pub fn command_guard(settings: &SafetySettings) -> Result<Option<CommandFilter>, ConfigError> {
    if !settings.enabled {
        return Ok(None);
    }
    let filter = CommandFilter::new(&settings.blocked_patterns)?;
    tracing::info!(patterns = filter.len(), "Command guard enabled");
    Ok(Some(filter))
}
