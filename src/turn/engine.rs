//! The turn engine: drives one user message through classification, budget
//! control, the bounded tool loop, and response streaming.
//!
//! All collaborators are injected. The engine owns no global state; the only
//! thing that survives a turn is the conversation snapshot written to the
//! checkpoint store.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use super::budget::{compress_history, over_budget};
use super::classifier::classify_message;
use super::responder::{
    build_streaming_request, call_model, strip_pseudo_tool_markup, user_message,
};
use super::state::{
    next_state, ImageAttachment, PendingCommand, ToolCallLogEntry, TurnRecord, TurnState,
};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::EngineConfig;
use crate::conversation::Conversation;
use crate::error::EngineError;
use crate::llm::{LLMProvider, LLMStreamEvent, Message, MessageRole};
use crate::stream::{
    event_channel, EventEmitter, EventReceiver, EventSender, ReasoningFilter, TurnEvent,
};
use crate::tools::{execute_approved, TerminalCommandResult, ToolInvocation, ToolOutcome, ToolRegistry};

/// One user submission.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub thread_id: String,
    pub message: String,
    pub image: Option<ImageAttachment>,
    /// Overrides the conversation's model when set.
    pub model: Option<String>,
    pub thinking_mode: bool,
    pub web_search: bool,
    pub terminal_access: bool,
}

impl TurnInput {
    pub fn new(thread_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message: message.into(),
            image: None,
            model: None,
            thinking_mode: false,
            web_search: false,
            terminal_access: false,
        }
    }
}

pub struct TurnEngine {
    provider: Arc<dyn LLMProvider>,
    registry: ToolRegistry,
    store: Arc<dyn CheckpointStore>,
    config: EngineConfig,
}

impl TurnEngine {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        registry: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn a turn and hand back the receiving end of its event stream.
    /// Dropping the receiver cancels the turn.
    pub fn stream_turn(self: Arc<Self>, input: TurnInput) -> EventReceiver {
        let (sender, receiver) = event_channel();
        tokio::spawn(async move {
            let _ = self.run_turn(input, sender).await;
        });
        receiver
    }

    /// Run one turn to completion, emitting events into `sender`.
    ///
    /// Always terminates the stream with `done` or `error`. Recoverable
    /// failures (tool errors, compression failures) never reach the error
    /// event; they are folded into the turn as structured results.
    pub async fn run_turn(
        &self,
        input: TurnInput,
        sender: EventSender,
    ) -> Result<(), EngineError> {
        let mut emitter = EventEmitter::new(sender);
        match self.drive(input, &mut emitter).await {
            Ok(()) => {
                emitter.emit(TurnEvent::Done);
                Ok(())
            }
            Err(err) => {
                emitter.emit(TurnEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        input: TurnInput,
        emitter: &mut EventEmitter,
    ) -> Result<(), EngineError> {
        let conversation = self.load_conversation(&input).await?;
        let mut record = TurnRecord::new(conversation, input.message);
        if let Some(image) = input.image {
            record = record.with_image(image);
        }

        // Classification is pure, and the budget check only reads prior
        // history, so both events go out before the machine runs.
        record.kind = classify_message(&record.new_message);
        debug!(
            target = "turngate::engine",
            thread_id = %record.conversation.thread_id,
            kind = record.kind.as_str(),
            "turn classified"
        );
        emitter.emit(TurnEvent::MessageType {
            message_type: record.kind.as_str().to_owned(),
        });

        let will_compress = over_budget(
            &record.conversation.messages,
            self.config.max_history_tokens,
        );
        if will_compress {
            emitter.emit(TurnEvent::Compressing);
        }

        // Where this turn's user message will sit once persisted: before any
        // message the turn itself appends.
        let mut user_slot = record.conversation.messages.len();

        let mut state = TurnState::PreProcess;
        loop {
            match state {
                TurnState::PreProcess => {}

                TurnState::CheckHistory => {
                    record.history_compressed = will_compress;
                }

                TurnState::CompressHistory => {
                    let model = self.model_for(&record);
                    compress_history(
                        self.provider.as_ref(),
                        &model,
                        &mut record.conversation.messages,
                    )
                    .await;
                    user_slot = record.conversation.messages.len();
                }

                TurnState::CallModel => {
                    call_model(
                        self.provider.as_ref(),
                        &mut record,
                        &self.registry,
                        &self.config,
                    )
                    .await?;
                }

                TurnState::ToolNode => {
                    self.run_tools(&mut record).await;
                }

                TurnState::End => break,
            }

            if emitter.is_cancelled() {
                info!(
                    target = "turngate::engine",
                    thread_id = %record.conversation.thread_id,
                    "event receiver dropped, cancelling turn"
                );
                break;
            }
            state = next_state(state, &record, &self.config);
        }

        for entry in &record.tool_log {
            match &entry.pending {
                Some(PendingCommand {
                    command,
                    working_directory,
                }) => {
                    emitter.emit(TurnEvent::TerminalPending {
                        command: command.clone(),
                        working_directory: working_directory.clone(),
                    });
                }
                None => {
                    emitter.emit(TurnEvent::ToolStart {
                        name: entry.name.clone(),
                        args: entry.args.clone(),
                    });
                    emitter.emit(TurnEvent::ToolResult {
                        name: entry.name.clone(),
                        result: entry.result.clone(),
                    });
                }
            }
        }

        // A parked terminal command halts the turn before the final answer;
        // the approval round-trip supplies the context for the next one.
        if !record.pending_terminal && !emitter.is_cancelled() {
            self.stream_answer(&mut record, emitter).await?;
        }

        record
            .conversation
            .messages
            .insert(user_slot, user_message(&record));
        self.store
            .save(Checkpoint {
                conversation: record.conversation.clone(),
                pending_terminal: record.pending_terminal,
            })
            .await?;

        Ok(())
    }

    async fn load_conversation(&self, input: &TurnInput) -> Result<Conversation, EngineError> {
        let mut conversation = match self.store.load(&input.thread_id).await? {
            Some(checkpoint) => checkpoint.conversation,
            None => Conversation::new(&input.thread_id, &self.config.default_model),
        };
        if let Some(model) = &input.model {
            conversation.model = model.clone();
        }
        conversation.thinking_mode = input.thinking_mode;
        conversation.web_search = input.web_search;
        conversation.terminal_access = input.terminal_access;
        Ok(conversation)
    }

    fn model_for(&self, record: &TurnRecord) -> String {
        if record.conversation.model.is_empty() {
            self.config.default_model.clone()
        } else {
            record.conversation.model.clone()
        }
    }

    /// Service every tool call on the loop's latest assistant message.
    ///
    /// Each call gets a tool response message, even when it fails or parks a
    /// terminal command, so the transcript keeps call/response pairing.
    async fn run_tools(&self, record: &mut TurnRecord) {
        let calls = record
            .conversation
            .messages
            .last()
            .and_then(|message| message.tool_calls.clone())
            .unwrap_or_default();

        for call in calls {
            let name = call.function.name.clone();
            let args = call.parsed_arguments();

            let mut pending = None;
            let output = match ToolInvocation::parse(&name, &args) {
                Ok(invocation) => {
                    let outcome = self.registry.dispatch(invocation).await;
                    if let ToolOutcome::PendingTerminal {
                        command,
                        working_directory,
                        ..
                    } = &outcome
                    {
                        record.pending_terminal = true;
                        pending = Some(PendingCommand {
                            command: command.clone(),
                            working_directory: working_directory.clone(),
                        });
                    }
                    outcome.output().to_owned()
                }
                Err(message) => message,
            };

            record
                .conversation
                .messages
                .push(Message::tool_response(call.id.clone(), output.clone()));
            record.tool_log.push(ToolCallLogEntry {
                name,
                args,
                result: output,
                pending,
            });
        }
    }

    /// Stream the final answer as a fresh model call.
    ///
    /// The loop's own closing response, if any, is a draft: it is replaced by
    /// the streamed answer so the stored transcript matches what the user
    /// saw. With thinking mode on, reasoning markup is forwarded untouched;
    /// otherwise every token passes through the reasoning filter.
    async fn stream_answer(
        &self,
        record: &mut TurnRecord,
        emitter: &mut EventEmitter,
    ) -> Result<(), EngineError> {
        if record.iterations > 0 {
            let drop_draft = record
                .conversation
                .messages
                .last()
                .is_some_and(|message| {
                    message.role == MessageRole::Assistant && !message.has_tool_calls()
                });
            if drop_draft {
                record.conversation.messages.pop();
            }
        }

        let thinking = record.conversation.thinking_mode;
        if thinking {
            emitter.emit(TurnEvent::ThinkingStart);
        }

        let request = build_streaming_request(record, &self.config);
        let mut stream = self.provider.stream(request).await.map_err(EngineError::Llm)?;
        let mut filter = ReasoningFilter::new();
        let mut raw = String::new();

        while let Some(event) = stream.next().await {
            match event.map_err(EngineError::Llm)? {
                LLMStreamEvent::Token { delta } => {
                    raw.push_str(&delta);
                    let visible = if thinking {
                        delta
                    } else {
                        filter.push(&delta)
                    };
                    if !visible.is_empty() {
                        emitter.emit(TurnEvent::Token { content: visible });
                    }
                    if emitter.is_cancelled() {
                        // Dropping the stream tears down the request.
                        break;
                    }
                }
                LLMStreamEvent::Completed => break,
            }
        }

        if !thinking {
            let tail = filter.finish();
            if !tail.is_empty() {
                emitter.emit(TurnEvent::Token { content: tail });
            }
        }

        record
            .conversation
            .messages
            .push(Message::assistant(strip_pseudo_tool_markup(&raw)));
        Ok(())
    }

    /// Explicit approval path for a parked terminal command.
    ///
    /// Re-validates and executes, then clears the pending flag on the
    /// thread's checkpoint. The caller decides how to feed the output back
    /// into the conversation.
    pub async fn approve_terminal(
        &self,
        thread_id: &str,
        command: &str,
        working_directory: &str,
    ) -> Result<TerminalCommandResult, EngineError> {
        let result = execute_approved(
            command,
            working_directory,
            self.config.terminal_timeout,
            self.config.terminal_output_cap,
        )
        .await;

        if let Some(mut checkpoint) = self.store.load(thread_id).await? {
            if checkpoint.pending_terminal {
                checkpoint.pending_terminal = false;
                self.store.save(checkpoint).await?;
            }
        }

        Ok(result)
    }
}
