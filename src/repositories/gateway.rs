use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;
use crate::models::server::{Destination, ServerRecord};
use crate::models::session::SessionRecord;

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Opens a new atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// Typed accessors inside one transaction. Dropping a unit without calling
/// [`commit`](UnitOfWork::commit) rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Upserts the server for `(owner_id, destination)`. An existing record
    /// keeps its id and gets the new credential.
    async fn save_server(
        &mut self,
        owner_id: i64,
        destination: &Destination,
        encrypted_credential: &[u8],
    ) -> Result<ServerRecord>;

    async fn get_server(&mut self, server_id: i64) -> Result<Option<ServerRecord>>;

    /// Replaces any session of `owner_id` with a fresh one expiring
    /// `duration` from now.
    async fn create_session(
        &mut self,
        owner_id: i64,
        server_id: i64,
        duration: TimeDelta,
    ) -> Result<SessionRecord>;

    /// Returns the owner's session only if it has not expired, stamping its
    /// `last_activity_at`. An expired record is deleted on the way.
    async fn get_active_session(&mut self, owner_id: i64) -> Result<Option<SessionRecord>>;

    /// Moves the expiry of an existing, unexpired session.
    async fn extend_session(&mut self, owner_id: i64, expires_at: DateTime<Utc>) -> Result<bool>;

    /// Returns whether a record was removed.
    async fn delete_session(&mut self, owner_id: i64) -> Result<bool>;

    /// Deletes every session whose `expires_at` has passed. Returns the count.
    async fn cleanup_expired_sessions(&mut self) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
