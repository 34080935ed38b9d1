//! Request assembly and the model-call node of the turn loop.

use tracing::warn;

use super::prompts::build_system_prompt;
use super::state::TurnRecord;
use crate::config::EngineConfig;
use crate::llm::{
    ContentPart, LLMError, LLMProvider, LLMRequest, LLMResponse, Message, MessageRole,
};
use crate::tools::ToolRegistry;

/// Markup fragments some local models emit in place of (or alongside)
/// structured tool calls. Each entry is an opening marker and either a
/// closing marker or `None` for strip-to-end-of-line.
const PSEUDO_TOOL_MARKUP: &[(&str, Option<&str>)] = &[
    ("<tool_call>", Some("</tool_call>")),
    ("[TOOL_REQUEST]", Some("[END_TOOL_REQUEST]")),
    ("[TOOL_CALLS]", None),
];

/// Assemble the request for one responder invocation: system prompt, the
/// stored history, then the fresh user message. The new message is not part
/// of the stored history while the turn is running.
pub fn build_request(record: &TurnRecord, config: &EngineConfig) -> LLMRequest {
    let conversation = &record.conversation;
    let tools_active = record.tools_active(config);

    let system = build_system_prompt(
        record.kind,
        tools_active && conversation.web_search,
        tools_active && conversation.terminal_access,
    );

    let mut messages = Vec::with_capacity(conversation.messages.len() + 2);
    messages.push(Message::system(system));
    messages.extend(conversation.messages.iter().cloned());
    messages.push(user_message(record));

    let model = if conversation.model.is_empty() {
        config.default_model.clone()
    } else {
        conversation.model.clone()
    };

    LLMRequest {
        messages,
        model,
        ..Default::default()
    }
}

/// The user message this turn contributes, as it will be sent and persisted.
pub fn user_message(record: &TurnRecord) -> Message {
    match &record.image {
        Some(image) => Message::user_with_parts(vec![
            ContentPart::text(record.new_message.clone()),
            ContentPart::image(image.data.clone(), image.mime_type.clone()),
        ]),
        None => Message::user(record.new_message.clone()),
    }
}

/// Assemble the request for the final streamed answer.
///
/// The conversation is flattened: assistant messages carrying tool calls and
/// tool-role messages are dropped, because chat templates on models without
/// tool-role support choke on them. When the turn ran tools, their results
/// are injected as one synthetic instruction message ahead of the user's
/// question.
pub fn build_streaming_request(record: &TurnRecord, config: &EngineConfig) -> LLMRequest {
    let base = build_request(record, config);
    let model = base.model;
    let mut source = base.messages;
    let user = source.pop();
    let system = source.remove(0);

    let mut messages = vec![system];
    messages.extend(source.into_iter().filter(|message| {
        matches!(message.role, MessageRole::User | MessageRole::Assistant)
            && !message.has_tool_calls()
    }));

    if !record.tool_log.is_empty() {
        let context = record
            .tool_log
            .iter()
            .map(|entry| format!("[Tool call: {}({})]\n{}", entry.name, entry.args, entry.result))
            .collect::<Vec<_>>()
            .join("\n\n");
        messages.push(Message::system(format!(
            "The following tool results were retrieved. \
             Use them to answer the user's question:\n\n{context}"
        )));
    }

    messages.extend(user);

    LLMRequest {
        messages,
        model,
        stream: true,
        ..Default::default()
    }
}

/// Call the model once and append its response to the conversation.
///
/// The iteration counter advances exactly once per invocation. When the
/// tool-bound call fails, one toolless retry is attempted before the error
/// propagates; this keeps endpoints that reject tool schemas usable.
pub async fn call_model(
    provider: &dyn LLMProvider,
    record: &mut TurnRecord,
    registry: &ToolRegistry,
    config: &EngineConfig,
) -> Result<LLMResponse, LLMError> {
    record.iterations += 1;

    let tools = if record.tools_active(config) {
        let definitions = registry.definitions(
            record.conversation.web_search,
            record.conversation.terminal_access,
        );
        (!definitions.is_empty()).then_some(definitions)
    } else {
        None
    };

    let mut request = build_request(record, config);
    let bound_tools = tools.is_some();
    request.tools = tools;

    let mut response = match provider.generate(request).await {
        Ok(response) => response,
        Err(err) if bound_tools => {
            warn!(
                target = "turngate::responder",
                provider = provider.name(),
                error = %err,
                "tool-bound call failed, retrying without tools"
            );
            provider.generate(build_request(record, config)).await?
        }
        Err(err) => return Err(err),
    };

    if let Some(content) = response.content.take() {
        response.content = Some(strip_pseudo_tool_markup(&content));
    }

    record
        .conversation
        .messages
        .push(response.clone().into_message());

    Ok(response)
}

/// Remove leaked tool-call markup from response text.
pub fn strip_pseudo_tool_markup(content: &str) -> String {
    let mut text = content.to_owned();
    for (open, close) in PSEUDO_TOOL_MARKUP {
        while let Some(start) = text.find(open) {
            let end = match close {
                Some(close) => text[start..]
                    .find(close)
                    .map(|offset| start + offset + close.len()),
                None => text[start..].find('\n').map(|offset| start + offset + 1),
            };
            match end {
                Some(end) => text.replace_range(start..end, ""),
                None => text.truncate(start),
            }
        }
    }
    text.trim().to_owned()
}
