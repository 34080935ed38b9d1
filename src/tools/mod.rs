//! Tool layer: closed dispatch over the engine's built-in tools.
//!
//! Tool calls are parsed into a tagged union rather than looked up in an
//! open registry, so an unhandled tool name is a compile-time concern at the
//! match sites and a structured refusal at runtime.

pub mod search;
pub mod terminal;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::ToolDefinition;

pub use search::{
    render_search_output, web_search_tool_definition, DuckDuckGoSearch, SearchError,
    SearchProvider, SearchResult, DEFAULT_NUM_RESULTS, MAX_NUM_RESULTS, WEB_SEARCH_TOOL_NAME,
};
pub use terminal::{
    execute_approved, pending_result, terminal_tool_definition, validate_command, CommandVerdict,
    TerminalCommandResult, TERMINAL_TOOL_NAME,
};

/// A tool call the engine knows how to service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    WebSearch {
        query: String,
        num_results: usize,
    },
    Terminal {
        command: String,
        working_directory: String,
    },
}

impl ToolInvocation {
    /// Parse a wire-level tool call. Unknown names are rejected rather than
    /// ignored so the model gets explicit feedback.
    pub fn parse(name: &str, args: &Value) -> Result<Self, String> {
        match name {
            WEB_SEARCH_TOOL_NAME => Ok(ToolInvocation::WebSearch {
                query: string_arg(args, "query"),
                num_results: args
                    .get("num_results")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_NUM_RESULTS)
                    .clamp(1, MAX_NUM_RESULTS),
            }),
            TERMINAL_TOOL_NAME => Ok(ToolInvocation::Terminal {
                command: string_arg(args, "command"),
                working_directory: {
                    let dir = string_arg(args, "working_directory");
                    if dir.is_empty() {
                        ".".to_owned()
                    } else {
                        dir
                    }
                },
            }),
            other => Err(format!("Unknown tool: {other}")),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::WebSearch { .. } => WEB_SEARCH_TOOL_NAME,
            ToolInvocation::Terminal { .. } => TERMINAL_TOOL_NAME,
        }
    }
}

fn string_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// What a dispatched tool produced.
///
/// `output` is always the string appended as the tool response message;
/// the pending variant additionally carries the parked command so the
/// caller can halt the loop and surface the approval request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed {
        output: String,
    },
    PendingTerminal {
        output: String,
        command: String,
        working_directory: String,
    },
}

impl ToolOutcome {
    pub fn output(&self) -> &str {
        match self {
            ToolOutcome::Completed { output } => output,
            ToolOutcome::PendingTerminal { output, .. } => output,
        }
    }
}

/// Holds the injected tool backends and services invocations.
#[derive(Clone)]
pub struct ToolRegistry {
    search: Arc<dyn SearchProvider>,
}

impl ToolRegistry {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self { search }
    }

    /// Schemas for the tools active on this turn, in binding order.
    pub fn definitions(&self, web_search: bool, terminal_access: bool) -> Vec<ToolDefinition> {
        let mut definitions = Vec::new();
        if web_search {
            definitions.push(web_search_tool_definition());
        }
        if terminal_access {
            definitions.push(terminal_tool_definition());
        }
        definitions
    }

    /// Service one invocation.
    ///
    /// Tool failures never abort the turn: they become error text in the
    /// tool response so the model can react. Terminal commands are only
    /// validated here; execution happens on the separate approval path.
    pub async fn dispatch(&self, invocation: ToolInvocation) -> ToolOutcome {
        match invocation {
            ToolInvocation::WebSearch { query, num_results } => {
                debug!(target = "turngate::tools", query, num_results, "web_search invoked");
                let outcome = self.search.search(&query, num_results).await;
                if let Err(err) = &outcome {
                    warn!(
                        target = "turngate::tools",
                        error = %err,
                        "web search failed, reporting to the model"
                    );
                }
                ToolOutcome::Completed {
                    output: render_search_output(&query, outcome),
                }
            }
            ToolInvocation::Terminal {
                command,
                working_directory,
            } => {
                let result = pending_result(&command, &working_directory);
                let output = result.to_json_string();
                match result {
                    TerminalCommandResult::PendingApproval { .. } => {
                        ToolOutcome::PendingTerminal {
                            output,
                            command,
                            working_directory,
                        }
                    }
                    _ => ToolOutcome::Completed { output },
                }
            }
        }
    }
}
