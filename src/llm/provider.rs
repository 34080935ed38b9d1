use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use thiserror::Error;

use super::types::{LLMRequest, LLMResponse};

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded")]
    RateLimit,
}

#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    Token { delta: String },
    Completed,
}

pub type LLMStream = Pin<Box<dyn futures::Stream<Item = Result<LLMStreamEvent, LLMError>> + Send>>;

/// Seam between the engine and a model endpoint.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Generate one complete response, optionally with structured tool calls.
    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError>;

    /// Stream a response token by token. The default falls back to a single
    /// non-streaming call emitted as one token.
    async fn stream(&self, mut request: LLMRequest) -> Result<LLMStream, LLMError> {
        request.stream = false;
        let response = self.generate(request).await?;
        let stream = try_stream! {
            if let Some(content) = response.content {
                if !content.is_empty() {
                    yield LLMStreamEvent::Token { delta: content };
                }
            }
            yield LLMStreamEvent::Completed;
        };
        Ok(Box::pin(stream))
    }
}
