//! History budget monitoring and lossy compression.
//!
//! The token estimate is chars-of-text / 4; image payloads are excluded.
//! When the estimate exceeds the configured budget, the entire history is
//! replaced with a two-message distillation obtained from an auxiliary model
//! call. This is the engine's only history-management policy — there is no
//! sliding window and no per-message eviction.

use tracing::warn;

use crate::llm::{LLMProvider, LLMRequest, Message};

/// Rough token estimate over the textual content of `messages`.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|message| message.text_content().len())
        .sum::<usize>()
        / 4
}

pub fn over_budget(messages: &[Message], max_history_tokens: usize) -> bool {
    estimate_tokens(messages) > max_history_tokens
}

/// Collapse `messages` into a two-message summary in place.
///
/// Failure is recoverable by policy: the history is left untouched and the
/// error is logged, so the turn proceeds uncompressed.
pub async fn compress_history(provider: &dyn LLMProvider, model: &str, messages: &mut Vec<Message>) {
    let transcript = messages
        .iter()
        .filter(|message| !message.text_content().is_empty())
        .map(|message| {
            format!(
                "{}: {}",
                message.role.to_string().to_uppercase(),
                message.text_content()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let request = LLMRequest {
        messages: vec![Message::user(format!(
            "Summarize the following conversation history concisely, \
             preserving key facts and context:\n\n{transcript}"
        ))],
        model: model.to_owned(),
        ..Default::default()
    };

    let summary = match provider.generate(request).await {
        Ok(response) => response.content.unwrap_or_default(),
        Err(err) => {
            warn!(
                target = "turngate::budget",
                error = %err,
                "history summarization failed, keeping uncompressed history"
            );
            return;
        }
    };

    *messages = vec![
        Message::user(format!("[Previous conversation summary: {summary}]")),
        Message::assistant("Understood. I have the context from our previous conversation."),
    ];
}
