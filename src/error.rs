use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid command guard pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Errors raised while decoding an inbound wire envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unknown message type `{0}`")]
    UnknownType(String),

    #[error("`{kind}` envelope is missing its taskId")]
    MissingTaskId { kind: String },

    #[error("Invalid `{kind}` payload: {message}")]
    InvalidPayload { kind: String, message: String },
}

/// Errors related to calling the language model endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Model API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected model response: {0}")]
    InvalidResponse(String),
}

/// Terminal failures of one orchestration run. Each is surfaced to the
/// caller as a single `error` event.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No model endpoint configured")]
    NoEndpoint,

    #[error("Agent hub is not running")]
    HubNotRunning,

    #[error("No online agents match the requested targets")]
    NoTargets,

    #[error(transparent)]
    ModelCall(#[from] ModelError),
}
