use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::models::server::{Destination, ServerRecord};

/// A persisted authorization binding one operator to one server.
///
/// There is never more than one record per `owner_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// The operator this session belongs to.
    pub owner_id: i64,
    /// The server the operator is authorized against.
    pub server_id: i64,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last lookup that found the session.
    pub last_activity_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A session as held by the session cache.
///
/// ⚠️ `encrypted_credential` is the SEALED credential, exactly as stored in the
/// server record. It must go through the credential cipher before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCacheEntry {
    pub owner_id: i64,
    pub server_id: i64,
    pub host: String,
    pub port: u16,
    pub encrypted_credential: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionCacheEntry {
    pub fn new(session: &SessionRecord, server: &ServerRecord) -> Self {
        Self {
            owner_id: session.owner_id,
            server_id: server.id,
            host: server.destination.host.clone(),
            port: server.destination.port,
            encrypted_credential: server.encrypted_credential.clone(),
            expires_at: session.expires_at,
            created_at: session.created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn destination(&self) -> Destination {
        Destination::new(self.host.clone(), self.port)
    }
}

/// The server an authorized operator currently drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveServer {
    pub server_id: i64,
    pub destination: Destination,
    pub encrypted_credential: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionCacheEntry> for ActiveServer {
    fn from(entry: SessionCacheEntry) -> Self {
        Self {
            server_id: entry.server_id,
            destination: Destination::new(entry.host, entry.port),
            encrypted_credential: entry.encrypted_credential,
            expires_at: entry.expires_at,
        }
    }
}

/// What a caller learns after a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub owner_id: i64,
    pub host: String,
    pub port: u16,
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: i64,
    pub remaining: String,
}

impl SessionSummary {
    pub fn new(owner_id: i64, destination: &Destination, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let remaining = (expires_at - now).max(TimeDelta::zero());
        Self {
            owner_id,
            host: destination.host.clone(),
            port: destination.port,
            expires_at,
            remaining_secs: remaining.num_seconds(),
            remaining: format_remaining(remaining),
        }
    }
}

/// Renders a remaining duration as `"{hours}h {minutes}m"`.
pub fn format_remaining(remaining: TimeDelta) -> String {
    let total_minutes = remaining.num_minutes().max(0);
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_rendered_in_hours_and_minutes() {
        assert_eq!(format_remaining(TimeDelta::minutes(6 * 60)), "6h 0m");
        assert_eq!(format_remaining(TimeDelta::seconds(5 * 3600 + 59 * 60 + 59)), "5h 59m");
        assert_eq!(format_remaining(TimeDelta::seconds(-30)), "0h 0m");
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let now = Utc::now();
        let record = SessionRecord {
            owner_id: 1,
            server_id: 1,
            expires_at: now,
            created_at: now,
            last_activity_at: now,
        };
        assert!(record.is_expired(now));
        assert!(!record.is_expired(now - TimeDelta::seconds(1)));
    }
}
