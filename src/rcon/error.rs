use serde::Serialize;
use std::io;

/// A stable, serializable classification of an [`RconError`].
///
/// Callers match on this to pick remediation guidance; the names never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HostUnreachable,
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    AuthenticationRejected,
    MalformedResponse,
    Unknown,
}

impl ErrorKind {
    /// Returns the snake_case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::HostUnreachable => "host_unreachable",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::Timeout => "timeout",
            ErrorKind::AuthenticationRejected => "authentication_rejected",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Errors produced while talking to an RCON endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    /// Name resolution failed or the network has no route to the host.
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// The host answered but nothing listens on the port.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The peer reset or closed the connection before replying.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// Connect, write or read exceeded the configured timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The server answered the AUTH packet with request id -1.
    #[error("authentication rejected by server")]
    AuthenticationRejected,

    /// The server sent bytes that do not form a valid RCON reply.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("rcon failure: {0}")]
    Unknown(String),
}

impl RconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RconError::HostUnreachable(_) => ErrorKind::HostUnreachable,
            RconError::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
            RconError::ConnectionReset(_) => ErrorKind::ConnectionReset,
            RconError::Timeout(_) => ErrorKind::Timeout,
            RconError::AuthenticationRejected => ErrorKind::AuthenticationRejected,
            RconError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            RconError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether another attempt on a fresh connection may succeed.
    ///
    /// Only network-class failures qualify. A rejected credential or a
    /// protocol violation will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RconError::HostUnreachable(_)
                | RconError::ConnectionRefused(_)
                | RconError::ConnectionReset(_)
                | RconError::Timeout(_)
        )
    }

    /// Operator-facing guidance for fixing the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            RconError::HostUnreachable(_) => {
                "Cannot reach the host. Check the address and that the server is online."
            }
            RconError::ConnectionRefused(_) => {
                "The server refused the connection. Check the RCON port and that RCON is enabled."
            }
            RconError::ConnectionReset(_) => {
                "The server dropped the connection. Try again in a moment."
            }
            RconError::Timeout(_) => {
                "The server did not answer in time. Check firewalls and server load."
            }
            RconError::AuthenticationRejected => "Wrong RCON password.",
            RconError::MalformedResponse(_) => {
                "The server replied with data that is not RCON. Check the port number."
            }
            RconError::Unknown(_) => "Unexpected RCON failure.",
        }
    }
}

impl From<io::Error> for RconError {
    fn from(err: io::Error) -> Self {
        let detail = err.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => RconError::ConnectionRefused(detail),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => RconError::Timeout(detail),
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => RconError::ConnectionReset(detail),
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable => RconError::HostUnreachable(detail),
            io::ErrorKind::InvalidData => RconError::MalformedResponse(detail),
            _ => RconError::Unknown(detail),
        }
    }
}
