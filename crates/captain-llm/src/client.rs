// Claude API streaming client using reqwest-eventsource.
//
// Sends messages to the Anthropic Messages API with `stream: true`, folds the
// Server-Sent Events into the full response text and returns it once the
// stream completes. The whole exchange runs under the request's timeout.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::Value;
use tracing::{debug, warn};

use captain_core::config::Config;

use crate::{Completion, CompletionRequest, TransportError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// ClaudeClient
// ---------------------------------------------------------------------------

/// Low-level Claude API streaming client.
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            endpoint: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Point the client at a different Messages endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Stream one message and return the concatenated text deltas.
    async fn stream_text(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        if self.api_key.is_empty() {
            return Err(TransportError::NotConfigured);
        }

        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "stream": true,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.prompt }]
        });

        let es = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .eventsource()
            .map_err(|e| TransportError::Stream(format!("failed to create event source: {e}")))?;

        collect_stream(es).await
    }
}

/// Drain an SSE stream into the full response text.
async fn collect_stream(mut es: EventSource) -> Result<String, TransportError> {
    let mut full_text = String::new();
    let mut input_tokens: u32 = 0;
    let mut output_tokens: u32 = 0;

    while let Some(event) = es.next().await {
        match event {
            Ok(Event::Open) => {
                debug!("SSE connection opened");
            }
            Ok(Event::Message(msg)) => match msg.event.as_str() {
                "message_start" => {
                    match parse_input_tokens(&msg.data) {
                        Some(n) => input_tokens = n,
                        None => warn!("failed to parse input_tokens from message_start"),
                    }
                }
                "content_block_delta" => {
                    if let Some(text) = parse_delta_text(&msg.data) {
                        full_text.push_str(&text);
                    }
                }
                "message_delta" => {
                    if let Some(n) = parse_output_tokens(&msg.data) {
                        output_tokens = n;
                    }
                    if parse_stop_reason(&msg.data).as_deref() == Some("max_tokens") {
                        warn!("model response truncated at max_tokens");
                    }
                }
                "message_stop" => {
                    debug!(input_tokens, output_tokens, "message_stop, streaming complete");
                    es.close();
                    return Ok(full_text);
                }
                "error" => {
                    es.close();
                    return Err(TransportError::Stream(
                        parse_error_message(&msg.data).unwrap_or_else(|| msg.data.clone()),
                    ));
                }
                other => {
                    debug!(event_type = other, "ignoring SSE event");
                }
            },
            Err(reqwest_eventsource::Error::StreamEnded) => break,
            Err(err) => {
                warn!(?err, "SSE stream error");
                es.close();
                return Err(map_stream_error(&err));
            }
        }
    }

    // Stream ended without message_stop.
    es.close();
    if full_text.is_empty() {
        Err(TransportError::EmptyResponse)
    } else {
        Ok(full_text)
    }
}

#[async_trait]
impl Completion for ClaudeClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, TransportError> {
        match tokio::time::timeout(request.timeout, self.stream_text(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(request.timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either an active Claude client or disabled (no API key configured).
pub enum LlmClient {
    Active(ClaudeClient),
    Disabled,
}

impl LlmClient {
    /// `Active` when credentials carry a non-empty API key, else `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match &config.credentials.anthropic_api_key {
            Some(key) if !key.is_empty() => LlmClient::Active(ClaudeClient::new(key.clone())),
            _ => LlmClient::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, TransportError> {
        match self {
            LlmClient::Active(client) => client.complete(request).await,
            LlmClient::Disabled => Err(TransportError::NotConfigured),
        }
    }
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract `input_tokens` from a `message_start` event's JSON.
///
/// Expected shape: `{ "type": "message_start", "message": { "usage": { "input_tokens": N } } }`
pub(crate) fn parse_input_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("message")?
        .get("usage")?
        .get("input_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// Extract `delta.text` from a `content_block_delta` event's JSON.
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract `usage.output_tokens` from a `message_delta` event's JSON.
pub(crate) fn parse_output_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("usage")?
        .get("output_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// Extract `delta.stop_reason` from a `message_delta` event's JSON.
pub(crate) fn parse_stop_reason(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("stop_reason")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract `error.message` from an in-stream `error` event.
pub(crate) fn parse_error_message(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

fn map_stream_error(err: &reqwest_eventsource::Error) -> TransportError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            TransportError::Status(status.as_u16())
        }
        reqwest_eventsource::Error::Transport(e) => TransportError::Network(e.to_string()),
        other => TransportError::Stream(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
