//! System prompt assembly for the responder and the streaming emitter.

use super::classifier::MessageKind;

const BASE_PROMPT: &str = "You are a helpful and concise AI assistant.";

const SUMMARY_ADDENDUM: &str =
    " The user is asking for a summary. Provide a clear, structured, and concise summary.";

const INSTRUCTION_ADDENDUM: &str = " The user is giving you an instruction about how you should \
     behave. Acknowledge and follow it precisely.";

const WEB_SEARCH_GUIDANCE: &str = " You have access to a web_search tool. Use it ONLY when the \
     user's question requires up-to-date information, recent events, real-time data, current \
     prices, weather, news, or facts you are not confident about. For general knowledge, coding \
     help, or creative tasks, answer directly without searching.";

const TERMINAL_GUIDANCE: &str = " You have access to a terminal_execute tool that can run \
     read-only shell commands on the user's machine. Use it when the user asks to inspect files, \
     check directory contents, view git status, read file contents, or get system information. \
     Only safe, read-only commands are allowed. Commands have a 15-second timeout, so keep them \
     fast. NEVER scan root directories recursively as it will time out on thousands of files. \
     Always scope commands to specific folders. If the user asks about a broad location, list \
     the top level first, then drill down into specific subdirectories as needed.";

const TERMINAL_RETRY_GUIDANCE: &str = " IMPORTANT: If a command fails or returns an error, do \
     NOT give up. Analyze the error, fix the command, and try again with the corrected version. \
     Only explain the error to the user if you have exhausted all alternatives.";

/// Build the mode-specific system prompt.
///
/// Thinking mode is deliberately absent here: reasoning markup is a native
/// model behavior, handled downstream by the streaming filter.
pub fn build_system_prompt(
    kind: MessageKind,
    web_search: bool,
    terminal_access: bool,
) -> String {
    let mut prompt = String::from(BASE_PROMPT);

    match kind {
        MessageKind::SummaryRequest => prompt.push_str(SUMMARY_ADDENDUM),
        MessageKind::SystemInstruction => prompt.push_str(INSTRUCTION_ADDENDUM),
        MessageKind::Simple => {}
    }

    if web_search {
        prompt.push_str(WEB_SEARCH_GUIDANCE);
    }

    if terminal_access {
        prompt.push_str(TERMINAL_GUIDANCE);
        prompt.push(' ');
        prompt.push_str(os_hint());
        prompt.push_str(TERMINAL_RETRY_GUIDANCE);
    }

    prompt
}

fn os_hint() -> &'static str {
    match std::env::consts::OS {
        "windows" => {
            "The user is on Windows and commands run via PowerShell. Use PowerShell cmdlets: \
             Get-ChildItem (list files), Get-Content (read file), Get-Process, Get-Service, \
             Get-ComputerInfo, Test-Path, Select-Object, Sort-Object, Format-Table, etc. \
             Pipelines with | are allowed (e.g. Get-ChildItem | Select-Object Name, Length). \
             Classic commands like dir, type, tree, git also work."
        }
        "macos" => "The user is on macOS. Use Unix commands like ls, cat, grep, find.",
        _ => "The user is on Linux. Use Unix commands like ls, cat, grep, find.",
    }
}
