use crate::error::{AppError, Result};
use crate::rcon::packet::MAX_COMMAND_LENGTH;

/// Commands that are allowed but always logged at warn level.
pub const DANGEROUS_COMMANDS: &[&str] = &["stop", "restart", "ban", "kick", "op", "deop"];

/// Validates an RCON host name or address.
///
/// # Arguments
///
/// * `host` - The host to validate.
pub fn validate_host(host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(AppError::Validation("Host must not be empty".to_string()));
    }

    if host.chars().count() > 253 {
        return Err(AppError::Validation(
            "Host must be at most 253 characters".to_string(),
        ));
    }

    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::Validation(
            "Host must not contain whitespace or control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates an RCON port.
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(AppError::Validation(
            "Port must be between 1 and 65535".to_string(),
        ));
    }

    Ok(())
}

/// Validates an RCON credential. The credential is never echoed back.
pub fn validate_credential(credential: &str) -> Result<()> {
    if credential.is_empty() {
        return Err(AppError::Validation(
            "Credential must not be empty".to_string(),
        ));
    }

    if credential.len() > 512 {
        return Err(AppError::Validation(
            "Credential must be at most 512 bytes".to_string(),
        ));
    }

    if credential.contains('\0') {
        return Err(AppError::Validation(
            "Credential must not contain NUL characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a command and returns it trimmed.
///
/// # Returns
///
/// The command as it will be sent to the server.
pub fn validate_command(command: &str) -> Result<&str> {
    let command = command.trim();

    if command.is_empty() {
        return Err(AppError::Validation("Command must not be empty".to_string()));
    }

    if command.len() > MAX_COMMAND_LENGTH {
        return Err(AppError::Validation(format!(
            "Command must be at most {} bytes",
            MAX_COMMAND_LENGTH
        )));
    }

    if command.contains(['\0', '\n', '\r']) {
        return Err(AppError::Validation(
            "Command must be a single line without NUL characters".to_string(),
        ));
    }

    Ok(command)
}

/// Whether the command's base word is one of [`DANGEROUS_COMMANDS`].
/// A leading `/` and letter case are ignored.
pub fn is_dangerous_command(command: &str) -> bool {
    let base = command
        .trim()
        .trim_start_matches('/')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    DANGEROUS_COMMANDS.contains(&base.as_str())
}
