//! Per-turn state and the explicit control state machine.
//!
//! The machine replaces predicate-guarded graph edges with an enumerated
//! state type and a pure transition function so routing is unit-testable in
//! isolation from any I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::classifier::MessageKind;
use crate::config::EngineConfig;
use crate::conversation::Conversation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// Base64-encoded image payload.
    pub data: String,
    pub mime_type: String,
}

/// A validated terminal command parked for user approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub command: String,
    pub working_directory: String,
}

/// One entry per tool call actually issued in the turn, in issuance order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallLogEntry {
    pub name: String,
    pub args: Value,
    pub result: String,
    /// Set when this call parked a terminal command instead of producing a
    /// result.
    pub pending: Option<PendingCommand>,
}

/// Ephemeral record threaded through a single turn.
///
/// Created when a turn starts and discarded once streaming completes; the
/// only state that survives across turns is the embedded [`Conversation`],
/// via the checkpoint store.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub conversation: Conversation,
    pub new_message: String,
    pub image: Option<ImageAttachment>,
    pub kind: MessageKind,
    /// Set by the budget check; doubles as the "history was compressed" flag
    /// once the compressor has run.
    pub history_compressed: bool,
    pub tool_log: Vec<ToolCallLogEntry>,
    /// Responder invocations so far. Monotonically non-decreasing, bounded
    /// by `max_tool_iterations`.
    pub iterations: u32,
    /// True once a terminal command has been validated and parked for user
    /// approval; halts the loop for the rest of the turn.
    pub pending_terminal: bool,
}

impl TurnRecord {
    pub fn new(conversation: Conversation, new_message: impl Into<String>) -> Self {
        Self {
            conversation,
            new_message: new_message.into(),
            image: None,
            kind: MessageKind::Simple,
            history_compressed: false,
            tool_log: Vec::new(),
            iterations: 0,
            pending_terminal: false,
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.image = Some(image);
        self
    }

    /// Whether tool capabilities are effectively active for this turn.
    pub fn tools_active(&self, config: &EngineConfig) -> bool {
        config.tools_enabled && self.conversation.has_tools_enabled()
    }

    fn latest_response_has_tool_calls(&self) -> bool {
        self.conversation
            .messages
            .last()
            .is_some_and(|message| message.has_tool_calls())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    PreProcess,
    CheckHistory,
    CompressHistory,
    CallModel,
    ToolNode,
    End,
}

/// Pure transition function of the turn control machine.
pub fn next_state(state: TurnState, record: &TurnRecord, config: &EngineConfig) -> TurnState {
    let tools_active = record.tools_active(config);

    match state {
        TurnState::PreProcess => TurnState::CheckHistory,

        TurnState::CheckHistory => {
            if record.history_compressed {
                TurnState::CompressHistory
            } else if tools_active {
                TurnState::CallModel
            } else {
                TurnState::End
            }
        }

        TurnState::CompressHistory => {
            if tools_active {
                TurnState::CallModel
            } else {
                TurnState::End
            }
        }

        TurnState::CallModel => {
            if tools_active
                && record.latest_response_has_tool_calls()
                && record.iterations < config.max_tool_iterations
            {
                TurnState::ToolNode
            } else {
                TurnState::End
            }
        }

        TurnState::ToolNode => {
            if record.pending_terminal {
                TurnState::End
            } else {
                TurnState::CallModel
            }
        }

        TurnState::End => TurnState::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, ToolCall};
    use serde_json::json;

    fn record_with_tools() -> TurnRecord {
        let mut conversation = Conversation::new("t", "m");
        conversation.web_search = true;
        TurnRecord::new(conversation, "hi")
    }

    #[test]
    fn pre_process_always_checks_history() {
        let record = record_with_tools();
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::PreProcess, &record, &config),
            TurnState::CheckHistory
        );
    }

    #[test]
    fn over_budget_routes_to_compression() {
        let mut record = record_with_tools();
        record.history_compressed = true;
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::CheckHistory, &record, &config),
            TurnState::CompressHistory
        );
    }

    #[test]
    fn no_tools_ends_after_history_check() {
        let record = TurnRecord::new(Conversation::new("t", "m"), "hi");
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::CheckHistory, &record, &config),
            TurnState::End
        );
        let mut compressed = TurnRecord::new(Conversation::new("t", "m"), "hi");
        compressed.history_compressed = true;
        assert_eq!(
            next_state(TurnState::CompressHistory, &compressed, &config),
            TurnState::End
        );
    }

    #[test]
    fn tool_calls_route_to_tool_node_until_iteration_cap() {
        let mut record = record_with_tools();
        record.conversation.messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall::function("call_1", "web_search", json!({}))],
        ));
        record.iterations = 1;
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::CallModel, &record, &config),
            TurnState::ToolNode
        );

        record.iterations = config.max_tool_iterations;
        assert_eq!(
            next_state(TurnState::CallModel, &record, &config),
            TurnState::End
        );
    }

    #[test]
    fn plain_response_ends_the_loop() {
        let mut record = record_with_tools();
        record.conversation.messages.push(Message::assistant("done"));
        record.iterations = 1;
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::CallModel, &record, &config),
            TurnState::End
        );
    }

    #[test]
    fn pending_terminal_halts_the_loop() {
        let mut record = record_with_tools();
        record.pending_terminal = true;
        let config = EngineConfig::default();
        assert_eq!(
            next_state(TurnState::ToolNode, &record, &config),
            TurnState::End
        );

        record.pending_terminal = false;
        assert_eq!(
            next_state(TurnState::ToolNode, &record, &config),
            TurnState::CallModel
        );
    }

    #[test]
    fn global_tools_switch_overrides_conversation_flags() {
        let record = record_with_tools();
        let config = EngineConfig {
            tools_enabled: false,
            ..EngineConfig::default()
        };
        assert_eq!(
            next_state(TurnState::CheckHistory, &record, &config),
            TurnState::End
        );
    }
}
