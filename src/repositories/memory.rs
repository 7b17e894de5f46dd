use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::server::{Destination, ServerRecord};
use crate::models::session::SessionRecord;
use crate::repositories::gateway::{PersistenceGateway, UnitOfWork};

#[derive(Clone, Default)]
struct Tables {
    servers: HashMap<i64, ServerRecord>,
    sessions: HashMap<i64, SessionRecord>,
    next_server_id: i64,
}

/// In-process store. A unit holds the table lock until it finishes and
/// mutates a private copy that `commit` publishes.
#[derive(Clone)]
pub struct MemoryGateway {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
}

impl MemoryGateway {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
        }
    }

    /// Number of committed server records.
    pub async fn server_count(&self) -> usize {
        self.tables.lock().await.servers.len()
    }

    /// Number of committed session records, expired or not.
    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    /// The committed session record of `owner_id`, ignoring expiry.
    pub async fn session_of(&self, owner_id: i64) -> Option<SessionRecord> {
        self.tables.lock().await.sessions.get(&owner_id).cloned()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryUnit {
            guard,
            working,
            clock: self.clock.clone(),
        }))
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn save_server(
        &mut self,
        owner_id: i64,
        destination: &Destination,
        encrypted_credential: &[u8],
    ) -> Result<ServerRecord> {
        let now = self.clock.now();

        if let Some(existing) = self
            .working
            .servers
            .values_mut()
            .find(|s| s.owner_id == owner_id && s.destination == *destination)
        {
            existing.encrypted_credential = encrypted_credential.to_vec();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        self.working.next_server_id += 1;
        let record = ServerRecord {
            id: self.working.next_server_id,
            owner_id,
            destination: destination.clone(),
            encrypted_credential: encrypted_credential.to_vec(),
            created_at: now,
            updated_at: now,
        };
        self.working.servers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_server(&mut self, server_id: i64) -> Result<Option<ServerRecord>> {
        Ok(self.working.servers.get(&server_id).cloned())
    }

    async fn create_session(
        &mut self,
        owner_id: i64,
        server_id: i64,
        duration: TimeDelta,
    ) -> Result<SessionRecord> {
        let now = self.clock.now();
        let record = SessionRecord {
            owner_id,
            server_id,
            expires_at: now + duration,
            created_at: now,
            last_activity_at: now,
        };
        self.working.sessions.insert(owner_id, record.clone());
        Ok(record)
    }

    async fn get_active_session(&mut self, owner_id: i64) -> Result<Option<SessionRecord>> {
        let now = self.clock.now();
        match self.working.sessions.get_mut(&owner_id) {
            Some(session) if session.is_expired(now) => {
                self.working.sessions.remove(&owner_id);
                Ok(None)
            }
            Some(session) => {
                session.last_activity_at = now;
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    async fn extend_session(&mut self, owner_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let now = self.clock.now();
        match self.working.sessions.get_mut(&owner_id) {
            Some(session) if !session.is_expired(now) => {
                session.expires_at = expires_at;
                session.last_activity_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_session(&mut self, owner_id: i64) -> Result<bool> {
        Ok(self.working.sessions.remove(&owner_id).is_some())
    }

    async fn cleanup_expired_sessions(&mut self) -> Result<u64> {
        let now = self.clock.now();
        let before = self.working.sessions.len();
        self.working.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - self.working.sessions.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnit {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn gateway() -> (MemoryGateway, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryGateway::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn save_server_upserts_per_owner_and_destination() {
        let (gateway, _) = gateway();
        let dest = Destination::new("mc.example.org", 25575);

        let mut uow = gateway.begin().await.unwrap();
        let first = uow.save_server(1, &dest, b"one").await.unwrap();
        let second = uow.save_server(1, &dest, b"two").await.unwrap();
        let other_owner = uow.save_server(2, &dest, b"three").await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.encrypted_credential, b"two");
        assert_ne!(first.id, other_owner.id);
        assert_eq!(gateway.server_count().await, 2);
    }

    #[tokio::test]
    async fn dropped_unit_rolls_back() {
        let (gateway, _) = gateway();
        {
            let mut uow = gateway.begin().await.unwrap();
            uow.save_server(1, &Destination::new("h", 1), b"x").await.unwrap();
            uow.create_session(1, 1, TimeDelta::hours(1)).await.unwrap();
        }
        assert_eq!(gateway.server_count().await, 0);
        assert_eq!(gateway.session_count().await, 0);
    }

    #[tokio::test]
    async fn create_session_replaces_the_previous_one() {
        let (gateway, clock) = gateway();
        let mut uow = gateway.begin().await.unwrap();
        let first = uow.create_session(1, 10, TimeDelta::hours(1)).await.unwrap();
        clock.advance(TimeDelta::minutes(5));
        let second = uow.create_session(1, 11, TimeDelta::hours(1)).await.unwrap();
        uow.commit().await.unwrap();

        assert!(second.expires_at > first.expires_at);
        assert_eq!(gateway.session_count().await, 1);
        assert_eq!(gateway.session_of(1).await.unwrap().server_id, 11);
    }

    #[tokio::test]
    async fn expired_sessions_are_hidden_and_removed() {
        let (gateway, clock) = gateway();
        let mut uow = gateway.begin().await.unwrap();
        uow.create_session(1, 10, TimeDelta::hours(1)).await.unwrap();
        uow.create_session(2, 10, TimeDelta::hours(3)).await.unwrap();
        uow.commit().await.unwrap();

        clock.advance(TimeDelta::hours(1));

        let mut uow = gateway.begin().await.unwrap();
        assert!(uow.get_active_session(1).await.unwrap().is_none());
        assert!(uow.get_active_session(2).await.unwrap().is_some());
        uow.commit().await.unwrap();
        assert!(gateway.session_of(1).await.is_none());

        clock.advance(TimeDelta::hours(5));
        let mut uow = gateway.begin().await.unwrap();
        assert_eq!(uow.cleanup_expired_sessions().await.unwrap(), 1);
        uow.commit().await.unwrap();
        assert_eq!(gateway.session_count().await, 0);
    }
}
