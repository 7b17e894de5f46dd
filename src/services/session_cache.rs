use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{AppError, Result};
use crate::models::session::SessionCacheEntry;

/// Lookup cache in front of the persistent store. Losing it costs lookups, not sessions.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, owner_id: i64) -> Result<Option<SessionCacheEntry>>;

    /// Inserts or replaces the owner's entry.
    async fn put(&self, entry: SessionCacheEntry) -> Result<()>;

    /// Returns whether an entry was removed.
    async fn invalidate(&self, owner_id: i64) -> Result<bool>;

    /// Drops every entry that expired at or before `now`. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// A process-local cache.
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<RwLock<HashMap<i64, SessionCacheEntry>>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get(&self, owner_id: i64) -> Result<Option<SessionCacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(&owner_id).cloned())
    }

    async fn put(&self, entry: SessionCacheEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.owner_id, entry);
        Ok(())
    }

    async fn invalidate(&self, owner_id: i64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(&owner_id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }
}

/// A cache shared between instances through Redis.
///
/// Entries are stored as JSON under `rcon_session:{owner_id}` with a TTL
/// matching the session's remaining lifetime, so Redis drops them on its own.
#[derive(Clone)]
pub struct RedisSessionCache {
    redis: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl RedisSessionCache {
    /// `clock` must be the one the authority compares expiries against.
    pub fn new(redis: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self { redis, clock }
    }

    /// Connects to `redis_url` with a managed, auto-reconnecting connection.
    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis Connection Manager initialized for the session cache");
        Ok(Self::new(redis, clock))
    }

    fn key(owner_id: i64) -> String {
        format!("rcon_session:{}", owner_id)
    }
}

/// Seconds Redis should keep an entry expiring at `expires_at`. Never zero,
/// since `SETEX` rejects it.
fn ttl_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (expires_at - now).num_seconds().max(1) as u64
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get(&self, owner_id: i64) -> Result<Option<SessionCacheEntry>> {
        let mut redis = self.redis.clone();
        let json: Option<String> = redis.get(Self::key(owner_id)).await?;

        let Some(json) = json else {
            return Ok(None);
        };

        match sonic_rs::from_str::<SessionCacheEntry>(&json) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!("⚠️  Discarding unreadable cache entry for owner {}: {}", owner_id, e);
                let _: () = redis.del(Self::key(owner_id)).await?;
                Ok(None)
            }
        }
    }

    async fn put(&self, entry: SessionCacheEntry) -> Result<()> {
        let ttl = ttl_secs(entry.expires_at, self.clock.now());
        let json = sonic_rs::to_string(&entry)
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;

        let mut redis = self.redis.clone();
        let _: () = redis.set_ex(Self::key(entry.owner_id), &json, ttl).await?;
        Ok(())
    }

    async fn invalidate(&self, owner_id: i64) -> Result<bool> {
        let mut redis = self.redis.clone();
        let removed: u64 = redis.del(Self::key(owner_id)).await?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
        // Redis expires keys by TTL.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry(owner_id: i64, expires_at: DateTime<Utc>) -> SessionCacheEntry {
        SessionCacheEntry {
            owner_id,
            server_id: 7,
            host: "mc.example.org".to_string(),
            port: 25575,
            encrypted_credential: vec![1, 2, 3],
            expires_at,
            created_at: expires_at - TimeDelta::hours(6),
        }
    }

    #[tokio::test]
    async fn put_replaces_the_owners_entry() {
        let cache = MemorySessionCache::new();
        let now = Utc::now();
        cache.put(entry(1, now + TimeDelta::hours(1))).await.unwrap();
        cache.put(entry(1, now + TimeDelta::hours(2))).await.unwrap();

        assert_eq!(cache.len().await, 1);
        let got = cache.get(1).await.unwrap().unwrap();
        assert_eq!(got.expires_at, now + TimeDelta::hours(2));
    }

    #[tokio::test]
    async fn invalidate_reports_whether_anything_was_removed() {
        let cache = MemorySessionCache::new();
        cache.put(entry(1, Utc::now() + TimeDelta::hours(1))).await.unwrap();

        assert!(cache.invalidate(1).await.unwrap());
        assert!(!cache.invalidate(1).await.unwrap());
        assert!(cache.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_expired_keeps_live_entries() {
        let cache = MemorySessionCache::new();
        let now = Utc::now();
        cache.put(entry(1, now - TimeDelta::seconds(1))).await.unwrap();
        cache.put(entry(2, now)).await.unwrap();
        cache.put(entry(3, now + TimeDelta::minutes(1))).await.unwrap();

        assert_eq!(cache.purge_expired(now).await.unwrap(), 2);
        assert!(cache.get(3).await.unwrap().is_some());
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn ttl_follows_the_given_clock() {
        let now = Utc::now() - TimeDelta::days(30);
        assert_eq!(ttl_secs(now + TimeDelta::seconds(90), now), 90);
        assert_eq!(ttl_secs(now + TimeDelta::hours(6), now), 6 * 3600);
        assert_eq!(ttl_secs(now, now), 1);
        assert_eq!(ttl_secs(now - TimeDelta::minutes(1), now), 1);
    }

    #[test]
    fn cache_entries_survive_json() {
        let original = entry(42, Utc::now());
        let json = sonic_rs::to_string(&original).unwrap();
        let back: SessionCacheEntry = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
