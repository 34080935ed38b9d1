//! Model endpoint abstraction and the OpenAI-compatible implementation.

mod openai;
mod provider;
mod types;

pub use openai::OpenAiCompatProvider;
pub use provider::{LLMError, LLMProvider, LLMStream, LLMStreamEvent};
pub use types::{
    ContentPart, FunctionCall, FunctionDefinition, LLMRequest, LLMResponse, Message,
    MessageContent, MessageRole, ToolCall, ToolDefinition,
};
