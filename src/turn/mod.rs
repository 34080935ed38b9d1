//! Turn processing: classification, history budget, the model-call loop, and
//! the engine that orchestrates them.

pub mod budget;
pub mod classifier;
pub mod engine;
pub mod prompts;
pub mod responder;
pub mod state;

pub use classifier::{classify_message, MessageKind};
pub use engine::{TurnEngine, TurnInput};
pub use state::{ImageAttachment, PendingCommand, ToolCallLogEntry, TurnRecord, TurnState};
