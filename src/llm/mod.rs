//! Language model client used by the orchestration loop.
//!
//! One [`ModelClient`] speaks either the Anthropic Messages API or an
//! OpenAI-compatible chat completions API, picked from the configured
//! endpoint. Non-2xx responses are returned as [`ModelError::Http`] with the
//! response body truncated; callers do not retry.

mod anthropic;
mod openai;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::text::truncate_chars;

/// Maximum characters of an error response body kept in [`ModelError::Http`].
const ERROR_BODY_LIMIT: usize = 200;

/// Completion budget requested from the model.
const MAX_TOKENS: u32 = 2048;

/// Whole-request timeout for one model call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The base URL, key and model name of the model API to call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Wire dialect of a model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    Anthropic,
    OpenAiCompatible,
}

impl ModelEndpoint {
    /// Anthropic when the base URL or the model name says so, otherwise
    /// OpenAI-compatible.
    pub fn flavor(&self) -> ApiFlavor {
        let base = self.base_url.to_ascii_lowercase();
        let model = self.model.to_ascii_lowercase();
        if base.contains("anthropic") || model.starts_with("claude") {
            ApiFlavor::Anthropic
        } else {
            ApiFlavor::OpenAiCompatible
        }
    }
}

/// HTTP client bound to one [`ModelEndpoint`].
pub struct ModelClient {
    http: reqwest::Client,
    endpoint: ModelEndpoint,
}

impl ModelClient {
    pub fn new(endpoint: ModelEndpoint) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Send one system + user exchange and return the model's text reply.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let request = match self.endpoint.flavor() {
            ApiFlavor::Anthropic => anthropic::request(&self.http, &self.endpoint, system, user),
            ApiFlavor::OpenAiCompatible => {
                openai::request(&self.http, &self.endpoint, system, user)
            }
        };

        let response = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body: truncate_chars(&body, ERROR_BODY_LIMIT),
            });
        }

        match self.endpoint.flavor() {
            ApiFlavor::Anthropic => anthropic::parse(response).await,
            ApiFlavor::OpenAiCompatible => openai::parse(response).await,
        }
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
