use thiserror::Error;

use crate::llm::LLMError;

/// Errors surfaced by the turn engine.
///
/// Most failure modes inside a turn are recovered locally (tool errors become
/// structured results, compression failures keep the uncompressed history).
/// Anything that reaches this type ends the turn with a stream-level `error`
/// event.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Llm(#[from] LLMError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checkpoint store error: {0}")]
    Checkpoint(String),
}
