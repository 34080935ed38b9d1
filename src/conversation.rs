use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// A persisted conversation thread.
///
/// Owned by the checkpoint store and keyed by `thread_id`; only the engine
/// mutates it, and only within a turn. The design assumes sequential turns
/// per thread — callers must serialize concurrent submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub thinking_mode: bool,
    pub web_search: bool,
    pub terminal_access: bool,
}

impl Conversation {
    pub fn new(thread_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            model: model.into(),
            thinking_mode: false,
            web_search: false,
            terminal_access: false,
        }
    }

    /// Whether any tool capability is switched on for this conversation.
    pub fn has_tools_enabled(&self) -> bool {
        self.web_search || self.terminal_access
    }
}
