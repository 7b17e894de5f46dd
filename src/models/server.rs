use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An RCON endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A stored RCON server belonging to one operator.
///
/// At most one record exists per `(owner_id, host, port)`; re-authorizing to
/// the same destination replaces `encrypted_credential` in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerRecord {
    /// The unique identifier of the record.
    pub id: i64,
    /// The operator who owns the record.
    pub owner_id: i64,
    /// Where the server listens.
    pub destination: Destination,
    /// The RCON credential, sealed by the credential cipher.
    /// Never log this field.
    pub encrypted_credential: Vec<u8>,
    /// The timestamp when the record was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the credential was last replaced.
    pub updated_at: DateTime<Utc>,
}
