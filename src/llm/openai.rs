//! OpenAI-compatible chat completions request and response shapes.

use serde::{Deserialize, Serialize};

use super::{MAX_TOKENS, ModelEndpoint, join_url};
use crate::error::ModelError;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub(super) fn request(
    http: &reqwest::Client,
    endpoint: &ModelEndpoint,
    system: &str,
    user: &str,
) -> reqwest::RequestBuilder {
    let body = ChatRequest {
        model: &endpoint.model,
        max_tokens: MAX_TOKENS,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
    };

    http.post(join_url(&endpoint.base_url, "chat/completions"))
        .bearer_auth(&endpoint.api_key)
        .json(&body)
}

pub(super) async fn parse(response: reqwest::Response) -> Result<String, ModelError> {
    let body: ChatResponse = response
        .json()
        .await
        .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

    body.choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| ModelError::InvalidResponse("response contained no choices".into()))
}
