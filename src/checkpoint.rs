//! Conversation checkpointing.
//!
//! The store is injected rather than process-global so hosts can plug in a
//! durable backend. Checkpoints let a turn resume after an out-of-band
//! terminal approval round-trip.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::conversation::Conversation;
use crate::error::EngineError;

/// Snapshot of a conversation's processing state, keyed by thread id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub conversation: Conversation,
    /// True when the last turn halted on a terminal command awaiting
    /// approval.
    pub pending_terminal: bool,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError>;
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError>;
}

/// Process-local store backed by a map. Suitable for tests and single-node
/// deployments without durability requirements.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self.entries.read().await.get(thread_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        self.entries
            .write()
            .await
            .insert(checkpoint.conversation.thread_id.clone(), checkpoint);
        Ok(())
    }
}
