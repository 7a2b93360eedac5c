// Language-model boundary.
//
// The recommendation pipeline only needs one capability: send a prompt to a
// named model with a deadline and get text back. `Completion` is that seam;
// `client` provides the Claude implementation and a disabled stand-in.

pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A single prompt sent to the model.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Failure to get text back from the model. Always retryable from the
/// caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("LLM not configured")]
    NotConfigured,

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("API returned status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("stream ended without any content")]
    EmptyResponse,
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, TransportError>;
}
