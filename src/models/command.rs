use serde::Serialize;

use crate::rcon::error::{ErrorKind, RconError};

/// The longest error text handed back to an operator.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// The outcome of one command run through an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: u64,
}

impl CommandExecutionResult {
    pub fn succeeded(output: String, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error_kind: None,
            duration_ms,
        }
    }

    pub fn failed(error: &RconError, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: truncate_message(&error.to_string(), MAX_ERROR_MESSAGE_CHARS),
            error_kind: Some(error.kind()),
            duration_ms,
        }
    }
}

/// Cuts `message` to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
