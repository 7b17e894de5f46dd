use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::rcon::error::{ErrorKind, RconError};

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection could not be taken from the pool.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The pool could not be built.
    #[error("Database pool creation error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A storage failure not tied to a specific backend.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The RCON server could not be reached, rejected the credential, or misbehaved.
    #[error("RCON error: {0}")]
    Rcon(#[from] RconError),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A stored credential could not be decrypted; the session is unusable.
    #[error("Stored credential cannot be decrypted")]
    Decryption,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operator has no active session.
    #[error("Not authorized")]
    Unauthorized,

    /// A stored row is missing a column or has the wrong type.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// An internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The RCON error kind, when this error came from the protocol client.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            AppError::Rcon(e) => Some(e.kind()),
            _ => None,
        }
    }
}

fn rcon_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::AuthenticationRejected => StatusCode::UNAUTHORIZED,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::HostUnreachable
        | ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::MalformedResponse
        | ErrorKind::Unknown => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "storage", "Database unavailable".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Database pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", "Cache error".to_string())
            }

            AppError::Storage(ref msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", "Storage error".to_string())
            }

            AppError::MissingData(ref msg) => {
                tracing::error!("Missing data: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage", "Storage error".to_string())
            }

            AppError::Rcon(ref e) => {
                tracing::warn!("RCON error: {}", e);
                (rcon_status(e.kind()), e.kind().as_str(), e.remediation().to_string())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "encryption", "Encryption error".to_string())
            }

            AppError::Decryption => {
                tracing::warn!("Stored credential could not be decrypted");
                (
                    StatusCode::UNAUTHORIZED,
                    "decryption_failed",
                    "Stored credential is unusable. Please authorize again.".to_string(),
                )
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, "validation", msg.clone())
            }

            AppError::Unauthorized => {
                tracing::debug!("No active session");
                (StatusCode::FORBIDDEN, "unauthorized", "No active session".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "kind": kind,
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","kind":"internal"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
