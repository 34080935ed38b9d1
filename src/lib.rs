//! Conversational turn engine for local OpenAI-compatible model endpoints.
//!
//! Mediates between a user-facing surface and a model endpoint: classifies
//! each incoming message, keeps the history inside a token budget via lossy
//! compression, runs a bounded tool loop (web search plus a two-phase
//! terminal safety gate), and streams the response with reasoning blocks
//! filtered out. Everything is injected; the crate holds no global state.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use turngate::checkpoint::InMemoryCheckpointStore;
//! use turngate::config::EngineConfig;
//! use turngate::llm::OpenAiCompatProvider;
//! use turngate::tools::{DuckDuckGoSearch, ToolRegistry};
//! use turngate::turn::{TurnEngine, TurnInput};
//!
//! # async fn run() -> Result<(), turngate::llm::LLMError> {
//! let config = EngineConfig::from_env();
//! let provider = Arc::new(OpenAiCompatProvider::from_config(&config)?);
//! let registry = ToolRegistry::new(Arc::new(DuckDuckGoSearch::new()));
//! let store = Arc::new(InMemoryCheckpointStore::new());
//! let engine = Arc::new(TurnEngine::new(provider, registry, store, config));
//!
//! let mut events = Arc::clone(&engine).stream_turn(TurnInput::new("thread-1", "oi"));
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod stream;
pub mod title;
pub mod tools;
pub mod turn;

pub use checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
pub use config::EngineConfig;
pub use conversation::Conversation;
pub use error::EngineError;
pub use stream::{EventReceiver, EventSender, TurnEvent};
pub use title::generate_title;
pub use turn::{TurnEngine, TurnInput};
