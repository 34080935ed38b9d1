//! OpenAI-compatible chat completion client.
//!
//! Targets any endpoint speaking the `/chat/completions` dialect, including
//! local runtimes such as LM Studio and Ollama's compatibility layer.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::debug;

use super::provider::{LLMError, LLMProvider, LLMStream, LLMStreamEvent};
use super::types::{
    ContentPart, FunctionCall, LLMRequest, LLMResponse, Message, MessageContent, ToolCall,
};
use crate::config::EngineConfig;

pub struct OpenAiCompatProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, LLMError> {
        Self::with_timeout(base_url, api_key, std::time::Duration::from_secs(120))
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, LLMError> {
        Self::with_timeout(
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        )
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, LLMError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LLMError::Network(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &LLMRequest) -> Result<Value, LLMError> {
        if request.messages.is_empty() {
            return Err(LLMError::InvalidRequest("messages cannot be empty".to_owned()));
        }
        if request.model.trim().is_empty() {
            return Err(LLMError::InvalidRequest("model cannot be empty".to_owned()));
        }

        let messages: Vec<Value> = request.messages.iter().map(serialize_message).collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": request.stream,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(tools) = &request.tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::to_value(tools)
                    .map_err(|err| LLMError::InvalidRequest(err.to_string()))?;
            }
        }

        Ok(body)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LLMError> {
        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| LLMError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || error_text.contains("rate limit") {
                return Err(LLMError::RateLimit);
            }
            return Err(LLMError::Provider(format!("HTTP {status}: {error_text}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn generate(&self, mut request: LLMRequest) -> Result<LLMResponse, LLMError> {
        request.stream = false;
        let body = self.build_body(&request)?;
        debug!(
            target = "turngate::llm",
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "dispatching completion request"
        );

        let response = self.send(&body).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|err| LLMError::Provider(format!("invalid response body: {err}")))?;

        parse_completion(&payload)
    }

    async fn stream(&self, mut request: LLMRequest) -> Result<LLMStream, LLMError> {
        request.stream = true;
        let body = self.build_body(&request)?;
        debug!(
            target = "turngate::llm",
            model = %request.model,
            messages = request.messages.len(),
            "dispatching streaming request"
        );

        let response = self.send(&body).await?;

        let stream = try_stream! {
            let mut body_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut done = false;

            while let Some(chunk_result) = body_stream.next().await {
                let chunk = chunk_result.map_err(|err| LLMError::Network(format!("streaming error: {err}")))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some((split_idx, delimiter_len)) = find_sse_boundary(&buffer) {
                    let event = buffer[..split_idx].to_string();
                    buffer.drain(..split_idx + delimiter_len);

                    let Some(payload) = extract_data_payload(&event) else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if payload == "[DONE]" {
                        done = true;
                        break;
                    }

                    let value: Value = serde_json::from_str(payload)
                        .map_err(|err| LLMError::Provider(format!("invalid stream payload: {err}")))?;
                    if let Some(delta) = value
                        .pointer("/choices/0/delta/content")
                        .and_then(Value::as_str)
                    {
                        if !delta.is_empty() {
                            yield LLMStreamEvent::Token { delta: delta.to_owned() };
                        }
                    }
                }

                if done {
                    break;
                }
            }

            yield LLMStreamEvent::Completed;
        };

        Ok(Box::pin(stream))
    }
}

fn serialize_message(message: &Message) -> Value {
    let mut out = json!({ "role": message.role.to_string() });

    match &message.content {
        MessageContent::Text(text) => {
            out["content"] = json!(text);
        }
        MessageContent::Parts(parts) => {
            let parts: Vec<Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::Image { data, mime_type } => json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                    }),
                })
                .collect();
            out["content"] = json!(parts);
        }
    }

    if let Some(tool_calls) = &message.tool_calls {
        out["tool_calls"] = json!(tool_calls);
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        out["tool_call_id"] = json!(tool_call_id);
    }

    out
}

fn parse_completion(payload: &Value) -> Result<LLMResponse, LLMError> {
    let message = payload
        .pointer("/choices/0/message")
        .ok_or_else(|| LLMError::Provider("response has no choices".to_owned()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    Some(ToolCall {
                        id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_owned(),
                        call_type: "function".to_owned(),
                        function: FunctionCall {
                            name: function.get("name").and_then(Value::as_str)?.to_owned(),
                            arguments: function
                                .get("arguments")
                                .and_then(Value::as_str)
                                .unwrap_or("{}")
                                .to_owned(),
                        },
                    })
                })
                .collect::<Vec<_>>()
        })
        .filter(|calls| !calls.is_empty());

    Ok(LLMResponse { content, tool_calls })
}

/// Locate the next SSE event boundary (`\n\n` or `\r\n\r\n`).
fn find_sse_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|idx| (idx, 2));
    let crlf = buffer.find("\r\n\r\n").map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn extract_data_payload(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|line| line.strip_prefix(' ').unwrap_or(line))
        .collect();
    if lines.is_empty() { None } else { Some(lines.join("\n")) }
}
