//! Turn event stream: the wire-level events a turn emits and the channel
//! emitter that carries them.
//!
//! Streaming is channel-based. The engine pushes [`TurnEvent`]s into an
//! unbounded sender; the consumer cancels simply by dropping the receiver,
//! which the emitter observes as a closed channel and reports upward so the
//! turn stops doing work nobody will see.

pub mod filter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use filter::ReasoningFilter;

/// Events emitted over the course of one turn, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Classification of the user message, first event of every turn.
    MessageType { message_type: String },
    /// History compression is about to run.
    Compressing,
    ToolStart {
        name: String,
        args: Value,
    },
    ToolResult {
        name: String,
        result: String,
    },
    /// A terminal command passed validation and awaits user approval.
    TerminalPending {
        command: String,
        working_directory: String,
    },
    /// Thinking mode is on: reasoning markup follows unfiltered.
    ThinkingStart,
    Token {
        content: String,
    },
    /// Terminal event on success.
    Done,
    /// Terminal event on failure.
    Error { message: String },
}

/// Sending half of a turn's event channel.
pub type EventSender = mpsc::UnboundedSender<TurnEvent>;

/// Receiving half handed to the consumer; dropping it cancels the turn.
pub type EventReceiver = mpsc::UnboundedReceiver<TurnEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Wraps the sender with closed-channel tracking.
pub struct EventEmitter {
    sender: EventSender,
    cancelled: bool,
}

impl EventEmitter {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender,
            cancelled: false,
        }
    }

    /// Emit one event. Returns false once the consumer has gone away; from
    /// then on every emit is a no-op.
    pub fn emit(&mut self, event: TurnEvent) -> bool {
        if self.cancelled {
            return false;
        }
        if self.sender.send(event).is_err() {
            self.cancelled = true;
            return false;
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}
