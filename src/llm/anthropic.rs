//! Anthropic Messages API request and response shapes.

use serde::{Deserialize, Serialize};

use super::{MAX_TOKENS, ModelEndpoint, join_url};
use crate::error::ModelError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// `{base}/v1/messages`, or `{base}/messages` when the base already ends in `/v1`.
fn messages_url(base_url: &str) -> String {
    if base_url.trim_end_matches('/').ends_with("/v1") {
        join_url(base_url, "messages")
    } else {
        join_url(base_url, "v1/messages")
    }
}

pub(super) fn request(
    http: &reqwest::Client,
    endpoint: &ModelEndpoint,
    system: &str,
    user: &str,
) -> reqwest::RequestBuilder {
    let body = MessagesRequest {
        model: &endpoint.model,
        max_tokens: MAX_TOKENS,
        system,
        messages: vec![Message {
            role: "user",
            content: user,
        }],
    };

    http.post(messages_url(&endpoint.base_url))
        .header("x-api-key", &endpoint.api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&body)
}

pub(super) async fn parse(response: reqwest::Response) -> Result<String, ModelError> {
    let body: MessagesResponse = response
        .json()
        .await
        .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

    let text: String = body
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect();
    Ok(text)
}
