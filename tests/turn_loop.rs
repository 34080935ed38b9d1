//! End-to-end turn loop tests against a scripted model endpoint.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

use turngate::checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use turngate::config::EngineConfig;
use turngate::conversation::Conversation;
use turngate::llm::{
    LLMError, LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, ToolCall,
};
use turngate::stream::{event_channel, TurnEvent};
use turngate::tools::{
    render_search_output, SearchError, SearchProvider, SearchResult, ToolRegistry,
};
use turngate::turn::{TurnEngine, TurnInput};

/// Pops one scripted result per `generate` call and records every request.
struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<LLMResponse, LLMError>>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<LLMResponse, LLMError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: LLMRequest) -> Result<LLMResponse, LLMError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LLMError::Provider("script exhausted".to_owned())))
    }
}

struct StubSearch;

#[async_trait]
impl SearchProvider for StubSearch {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(
        &self,
        query: &str,
        _num_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        Ok(vec![stub_hit(query)])
    }
}

fn stub_hit(query: &str) -> SearchResult {
    SearchResult {
        title: "Stub hit".to_owned(),
        url: "https://example.com".to_owned(),
        snippet: format!("results for {query}"),
    }
}

fn text(content: &str) -> Result<LLMResponse, LLMError> {
    Ok(LLMResponse {
        content: Some(content.to_owned()),
        tool_calls: None,
    })
}

fn tool_call(name: &str, args: serde_json::Value) -> Result<LLMResponse, LLMError> {
    Ok(LLMResponse {
        content: None,
        tool_calls: Some(vec![ToolCall::function("call_1", name, args)]),
    })
}

fn build_engine(
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryCheckpointStore>,
) -> TurnEngine {
    TurnEngine::new(
        provider,
        ToolRegistry::new(Arc::new(StubSearch)),
        store,
        EngineConfig::default(),
    )
}

async fn run_turn(engine: &TurnEngine, input: TurnInput) -> Vec<TurnEvent> {
    let (sender, receiver) = event_channel();
    let _ = engine.run_turn(input, sender).await;
    UnboundedReceiverStream::new(receiver).collect().await
}

#[tokio::test]
async fn simple_turn_streams_filtered_tokens() {
    let provider = ScriptedProvider::new(vec![text("<think>greeting, keep it short</think>Oi!")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(Arc::clone(&provider), Arc::clone(&store));

    let events = run_turn(&engine, TurnInput::new("t1", "oi")).await;
    assert_eq!(
        events,
        vec![
            TurnEvent::MessageType {
                message_type: "simple".to_owned()
            },
            TurnEvent::Token {
                content: "Oi!".to_owned()
            },
            TurnEvent::Done,
        ]
    );

    let checkpoint = store.load("t1").await.unwrap().unwrap();
    assert_eq!(checkpoint.conversation.messages.len(), 2);
    assert_eq!(checkpoint.conversation.messages[0].role, MessageRole::User);
    assert_eq!(checkpoint.conversation.messages[0].text_content(), "oi");
    assert_eq!(
        checkpoint.conversation.messages[1].role,
        MessageRole::Assistant
    );
    assert!(!checkpoint.pending_terminal);
}

#[tokio::test]
async fn thinking_mode_forwards_reasoning_markup_raw() {
    let provider = ScriptedProvider::new(vec![text("<think>plan</think>Oi!")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, store);

    let mut input = TurnInput::new("t1", "oi");
    input.thinking_mode = true;
    let events = run_turn(&engine, input).await;

    assert_eq!(
        events,
        vec![
            TurnEvent::MessageType {
                message_type: "simple".to_owned()
            },
            TurnEvent::ThinkingStart,
            TurnEvent::Token {
                content: "<think>plan</think>Oi!".to_owned()
            },
            TurnEvent::Done,
        ]
    );
}

#[tokio::test]
async fn classification_is_the_first_event() {
    let provider = ScriptedProvider::new(vec![text("Aqui vai um resumo.")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, store);

    let events = run_turn(&engine, TurnInput::new("t1", "resume isso")).await;
    assert_eq!(
        events[0],
        TurnEvent::MessageType {
            message_type: "summary_request".to_owned()
        }
    );
}

#[tokio::test]
async fn web_search_round_trip_feeds_the_streamed_answer() {
    let provider = ScriptedProvider::new(vec![
        tool_call("web_search", json!({"query": "rust news"})),
        text("draft answer"),
        text("Here's the news."),
    ]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(Arc::clone(&provider), Arc::clone(&store));

    let mut input = TurnInput::new("t1", "any rust news?");
    input.web_search = true;
    let events = run_turn(&engine, input).await;

    assert_eq!(
        events,
        vec![
            TurnEvent::MessageType {
                message_type: "simple".to_owned()
            },
            TurnEvent::ToolStart {
                name: "web_search".to_owned(),
                args: json!({"query": "rust news"}),
            },
            TurnEvent::ToolResult {
                name: "web_search".to_owned(),
                result: render_search_output("rust news", Ok(vec![stub_hit("rust news")])),
            },
            TurnEvent::Token {
                content: "Here's the news.".to_owned()
            },
            TurnEvent::Done,
        ]
    );

    // Call 1 binds the tool schema, call 2 sees the tool response, call 3 is
    // the flattened streaming request: no tool-role messages, results
    // injected as an instruction.
    let requests = provider.requests.lock().await;
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(1));
    assert!(requests[1]
        .messages
        .iter()
        .any(|message| message.role == MessageRole::Tool));
    assert!(requests[2]
        .messages
        .iter()
        .all(|message| message.role != MessageRole::Tool && !message.has_tool_calls()));
    assert!(requests[2]
        .messages
        .iter()
        .any(|message| message.text_content().contains("results for rust news")));
    drop(requests);

    // Persisted order: user, assistant tool call, tool response, streamed
    // answer. The loop's draft answer is replaced by the streamed one.
    let checkpoint = store.load("t1").await.unwrap().unwrap();
    let roles: Vec<MessageRole> = checkpoint
        .conversation
        .messages
        .iter()
        .map(|message| message.role)
        .collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant,
        ]
    );
    assert_eq!(
        checkpoint.conversation.messages[3].text_content(),
        "Here's the news."
    );
}

#[tokio::test]
async fn tool_loop_stops_at_the_iteration_cap() {
    let searching = || tool_call("web_search", json!({"query": "more"}));
    let provider = ScriptedProvider::new(vec![
        searching(),
        searching(),
        searching(),
        text("wrap-up"),
    ]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(Arc::clone(&provider), store);

    let mut input = TurnInput::new("t1", "search forever");
    input.web_search = true;
    let events = run_turn(&engine, input).await;

    // Three responder invocations (the cap), then one streamed answer call.
    assert_eq!(provider.request_count().await, 4);
    let tool_starts = events
        .iter()
        .filter(|event| matches!(event, TurnEvent::ToolStart { .. }))
        .count();
    assert_eq!(tool_starts, 2);
    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn safe_terminal_command_halts_the_turn_as_pending() {
    let provider = ScriptedProvider::new(vec![tool_call(
        "terminal_execute",
        json!({"command": "ls | grep foo", "working_directory": "/tmp"}),
    )]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(Arc::clone(&provider), Arc::clone(&store));

    let mut input = TurnInput::new("t1", "list my files");
    input.terminal_access = true;
    let events = run_turn(&engine, input).await;

    assert_eq!(
        events,
        vec![
            TurnEvent::MessageType {
                message_type: "simple".to_owned()
            },
            TurnEvent::TerminalPending {
                command: "ls | grep foo".to_owned(),
                working_directory: "/tmp".to_owned(),
            },
            TurnEvent::Done,
        ]
    );
    // The turn halts: no streamed answer until the approval round-trip.
    assert_eq!(provider.request_count().await, 1);

    let checkpoint = store.load("t1").await.unwrap().unwrap();
    assert!(checkpoint.pending_terminal);
}

#[tokio::test]
async fn blocked_terminal_command_keeps_the_loop_going() {
    let provider = ScriptedProvider::new(vec![
        tool_call("terminal_execute", json!({"command": "rm -rf /"})),
        text("draft"),
        text("I can't run that command."),
    ]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, Arc::clone(&store));

    let mut input = TurnInput::new("t1", "clean up my disk");
    input.terminal_access = true;
    let events = run_turn(&engine, input).await;

    assert!(events.iter().any(|event| matches!(
        event,
        TurnEvent::ToolResult { result, .. } if result.contains("\"status\":\"blocked\"")
    )));
    assert!(!events
        .iter()
        .any(|event| matches!(event, TurnEvent::TerminalPending { .. })));
    assert!(events.contains(&TurnEvent::Token {
        content: "I can't run that command.".to_owned()
    }));
    assert!(!store.load("t1").await.unwrap().unwrap().pending_terminal);
}

#[tokio::test]
async fn unknown_tool_names_get_an_explicit_refusal() {
    let provider = ScriptedProvider::new(vec![
        tool_call("file_delete", json!({"path": "/etc"})),
        text("draft"),
        text("That tool does not exist."),
    ]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, store);

    let mut input = TurnInput::new("t1", "delete it");
    input.web_search = true;
    let events = run_turn(&engine, input).await;

    assert!(events.contains(&TurnEvent::ToolResult {
        name: "file_delete".to_owned(),
        result: "Unknown tool: file_delete".to_owned(),
    }));
    assert_eq!(events.last(), Some(&TurnEvent::Done));
}

#[tokio::test]
async fn over_budget_history_is_compressed_before_responding() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut conversation = Conversation::new("t1", "local-model");
    // ~3000 estimated tokens, over the default 2000 budget.
    conversation.messages.push(Message::user("x".repeat(12_000)));
    store
        .save(Checkpoint {
            conversation,
            pending_terminal: false,
        })
        .await
        .unwrap();

    let provider = ScriptedProvider::new(vec![
        text("They discussed the letter x at length."),
        text("ok"),
    ]);
    let engine = build_engine(provider, Arc::clone(&store));

    let events = run_turn(&engine, TurnInput::new("t1", "oi")).await;
    assert_eq!(events[1], TurnEvent::Compressing);
    assert_eq!(events.last(), Some(&TurnEvent::Done));

    let checkpoint = store.load("t1").await.unwrap().unwrap();
    let messages = &checkpoint.conversation.messages;
    assert_eq!(messages.len(), 4);
    assert!(messages[0]
        .text_content()
        .starts_with("[Previous conversation summary:"));
    assert_eq!(messages[2].text_content(), "oi");
    assert_eq!(messages[3].text_content(), "ok");
}

#[tokio::test]
async fn failed_compression_keeps_the_history_and_the_turn() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut conversation = Conversation::new("t1", "local-model");
    conversation.messages.push(Message::user("x".repeat(12_000)));
    store
        .save(Checkpoint {
            conversation,
            pending_terminal: false,
        })
        .await
        .unwrap();

    let provider = ScriptedProvider::new(vec![
        Err(LLMError::Provider("summarizer down".to_owned())),
        text("still here"),
    ]);
    let engine = build_engine(provider, Arc::clone(&store));

    let events = run_turn(&engine, TurnInput::new("t1", "oi")).await;
    assert_eq!(events.last(), Some(&TurnEvent::Done));

    let checkpoint = store.load("t1").await.unwrap().unwrap();
    let messages = &checkpoint.conversation.messages;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].text_content().len(), 12_000);
}

#[tokio::test]
async fn endpoint_failure_ends_the_stream_with_an_error_event() {
    let provider = ScriptedProvider::new(vec![]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, store);

    let (sender, receiver) = event_channel();
    let result = engine.run_turn(TurnInput::new("t1", "oi"), sender).await;
    assert!(result.is_err());

    let events: Vec<TurnEvent> = UnboundedReceiverStream::new(receiver).collect().await;
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Error { message }) if message.contains("script exhausted")
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn terminal_approval_executes_and_clears_the_pending_flag() {
    let provider = ScriptedProvider::new(vec![tool_call(
        "terminal_execute",
        json!({"command": "echo approved"}),
    )]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(provider, Arc::clone(&store));

    let mut input = TurnInput::new("t1", "run it");
    input.terminal_access = true;
    run_turn(&engine, input).await;
    assert!(store.load("t1").await.unwrap().unwrap().pending_terminal);

    let result = engine
        .approve_terminal("t1", "echo approved", ".")
        .await
        .unwrap();
    match result {
        turngate::tools::TerminalCommandResult::Success {
            exit_code, stdout, ..
        } => {
            assert_eq!(exit_code, 0);
            assert_eq!(stdout.trim(), "approved");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert!(!store.load("t1").await.unwrap().unwrap().pending_terminal);
}

#[tokio::test]
async fn dropping_the_receiver_cancels_without_error() {
    let provider = ScriptedProvider::new(vec![text("never seen")]);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(Arc::clone(&provider), store);

    let (sender, receiver) = event_channel();
    drop(receiver);
    let result = engine.run_turn(TurnInput::new("t1", "oi"), sender).await;
    assert!(result.is_ok());
    // The model endpoint is never contacted for a cancelled turn.
    assert_eq!(provider.request_count().await, 0);
}
