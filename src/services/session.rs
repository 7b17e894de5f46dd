use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::crypto::cipher::CredentialCipher;
use crate::error::{AppError, Result};
use crate::models::command::CommandExecutionResult;
use crate::models::server::Destination;
use crate::models::session::{ActiveServer, SessionCacheEntry, SessionSummary};
use crate::rcon::client::RconClient;
use crate::repositories::gateway::PersistenceGateway;
use crate::services::session_cache::SessionCache;
use crate::validation::rcon as rules;

/// How sessions are granted and kept alive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Lifetime of a fresh session.
    pub duration: TimeDelta,
    /// Push `expires_at` forward after every successful command.
    pub auto_renew: bool,
    /// Authorize without probing the server. Development only.
    pub skip_rcon_check: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            duration: TimeDelta::hours(6),
            auto_renew: false,
            skip_rcon_check: false,
        }
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: u64,
    pub cache_entries: usize,
    pub idle_locks: usize,
}

/// Grants, looks up and expires the single session each operator may hold.
///
/// Lookups try the [`SessionCache`] first and fall back to the
/// [`PersistenceGateway`]. Writes for one owner run under that owner's lock.
pub struct SessionAuthority {
    gateway: Arc<dyn PersistenceGateway>,
    cache: Arc<dyn SessionCache>,
    cipher: Arc<CredentialCipher>,
    rcon: RconClient,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    owner_locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionAuthority {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        cache: Arc<dyn SessionCache>,
        cipher: Arc<CredentialCipher>,
        rcon: RconClient,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            gateway,
            cache,
            cipher,
            rcon,
            clock,
            policy,
            owner_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    fn owner_lock(&self, owner_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(owner_id).or_default().clone()
    }

    /// Forgets the owner's lock when no task holds or waits on it.
    fn release_owner_lock(&self, owner_id: i64) {
        let mut locks = self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&owner_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&owner_id);
        }
    }

    /// Verifies `credential` against `destination` and, on success, replaces
    /// the operator's session with a fresh one.
    ///
    /// Re-authorizing resets the expiry to `now + duration`; it never adds
    /// to the remaining time.
    ///
    /// # Errors
    ///
    /// * [`AppError::Validation`] for a malformed destination or credential.
    /// * [`AppError::Rcon`] with the probe's failure, unchanged. Nothing is
    ///   written in that case.
    /// * Storage errors from the gateway.
    pub async fn authorize(
        &self,
        owner_id: i64,
        destination: Destination,
        credential: &str,
    ) -> Result<SessionSummary> {
        rules::validate_host(&destination.host)?;
        rules::validate_port(destination.port)?;
        rules::validate_credential(credential)?;

        if self.policy.skip_rcon_check {
            tracing::warn!(
                "⚠️  DEV MODE: authorizing owner {} on {} without checking the credential",
                owner_id,
                destination
            );
        } else {
            match self.rcon.test_connection(&destination, credential).await {
                Ok(report) => tracing::debug!("Probe of {}: {}", destination, report.detail),
                Err(e) => {
                    tracing::warn!(
                        "❌ Authorization of owner {} on {} refused: {}",
                        owner_id,
                        destination,
                        e
                    );
                    return Err(e.into());
                }
            }
        }

        let encrypted = self.cipher.encrypt(credential)?;

        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let mut uow = self.gateway.begin().await?;
        let server = uow.save_server(owner_id, &destination, &encrypted).await?;
        let session = uow
            .create_session(owner_id, server.id, self.policy.duration)
            .await?;
        uow.commit().await?;

        if let Err(e) = self.cache.put(SessionCacheEntry::new(&session, &server)).await {
            tracing::warn!("⚠️  Session cache write failed for owner {}: {}", owner_id, e);
            // A stale entry would shadow the new session until it expires.
            let _ = self.cache.invalidate(owner_id).await;
        }

        tracing::info!(
            "✅ Owner {} authorized on {} until {}",
            owner_id,
            destination,
            session.expires_at
        );

        Ok(SessionSummary::new(
            owner_id,
            &destination,
            session.expires_at,
            self.clock.now(),
        ))
    }

    pub async fn is_authorized(&self, owner_id: i64) -> Result<bool> {
        Ok(self.get_active_server(owner_id).await?.is_some())
    }

    /// The server the operator is currently authorized against, if any.
    pub async fn get_active_server(&self, owner_id: i64) -> Result<Option<ActiveServer>> {
        let now = self.clock.now();

        match self.cache.get(owner_id).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                tracing::debug!("Session cache hit for owner {}", owner_id);
                return Ok(Some(entry.into()));
            }
            Ok(Some(_)) => {
                tracing::debug!("Cached session of owner {} has expired", owner_id);
                if let Err(e) = self.cache.invalidate(owner_id).await {
                    tracing::warn!("⚠️  Session cache invalidation failed for owner {}: {}", owner_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("⚠️  Session cache read failed for owner {}, using the store: {}", owner_id, e);
            }
        }

        let loaded = self.load_from_store(owner_id).await;
        if !matches!(loaded, Ok(Some(_))) {
            // Lookups of unknown owners must not leave a lock behind.
            self.release_owner_lock(owner_id);
        }
        Ok(loaded?.map(ActiveServer::from))
    }

    /// Reads the owner's session from the store and refills the cache.
    async fn load_from_store(&self, owner_id: i64) -> Result<Option<SessionCacheEntry>> {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let mut uow = self.gateway.begin().await?;
        let Some(session) = uow.get_active_session(owner_id).await? else {
            // Commits the lazy deletion of an expired record, if any.
            uow.commit().await?;
            return Ok(None);
        };

        let Some(server) = uow.get_server(session.server_id).await? else {
            tracing::warn!(
                "⚠️  Session of owner {} points at missing server {}, dropping it",
                owner_id,
                session.server_id
            );
            uow.delete_session(owner_id).await?;
            uow.commit().await?;
            return Ok(None);
        };
        uow.commit().await?;

        let entry = SessionCacheEntry::new(&session, &server);
        if let Err(e) = self.cache.put(entry.clone()).await {
            tracing::warn!("⚠️  Session cache write failed for owner {}: {}", owner_id, e);
        }
        Ok(Some(entry))
    }

    /// Removes the operator's session from the cache and the store.
    ///
    /// Returns whether anything was removed; calling it again is not an error.
    pub async fn end_session(&self, owner_id: i64) -> Result<bool> {
        let ended = self.remove_session(owner_id).await;
        self.release_owner_lock(owner_id);
        ended
    }

    async fn remove_session(&self, owner_id: i64) -> Result<bool> {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let cached = match self.cache.invalidate(owner_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("⚠️  Session cache invalidation failed for owner {}: {}", owner_id, e);
                false
            }
        };

        let mut uow = self.gateway.begin().await?;
        let stored = uow.delete_session(owner_id).await?;
        uow.commit().await?;

        if stored || cached {
            tracing::info!("👋 Session of owner {} ended", owner_id);
        }
        Ok(stored || cached)
    }

    /// Time left on the operator's session, if one is active.
    pub async fn remaining_time(&self, owner_id: i64) -> Result<Option<TimeDelta>> {
        let now = self.clock.now();
        Ok(self
            .get_active_server(owner_id)
            .await?
            .map(|active| (active.expires_at - now).max(TimeDelta::zero())))
    }

    /// The operator's session rendered for callers, if one is active.
    pub async fn session_summary(&self, owner_id: i64) -> Result<Option<SessionSummary>> {
        let active = self.get_active_server(owner_id).await?;
        let now = self.clock.now();
        Ok(active.map(|a| SessionSummary::new(owner_id, &a.destination, a.expires_at, now)))
    }

    /// Runs `command` on the operator's active server.
    ///
    /// An RCON failure is reported inside the returned
    /// [`CommandExecutionResult`] and leaves the session intact.
    ///
    /// # Errors
    ///
    /// * [`AppError::Validation`] for an empty or malformed command.
    /// * [`AppError::Unauthorized`] when the operator has no active session.
    /// * [`AppError::Decryption`] when the stored credential is unusable; the
    ///   session is ended so the operator has to authorize again.
    pub async fn execute(&self, owner_id: i64, command: &str) -> Result<CommandExecutionResult> {
        let command = rules::validate_command(command)?;

        let active = self
            .get_active_server(owner_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if rules::is_dangerous_command(command) {
            tracing::warn!(
                "⚠️  Owner {} runs dangerous command on {}: {}",
                owner_id,
                active.destination,
                command
            );
        } else {
            tracing::info!("🎮 Owner {} runs on {}: {}", owner_id, active.destination, command);
        }

        let credential = match self.cipher.decrypt(&active.encrypted_credential) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(
                    "❌ Stored credential of owner {} is unusable, ending the session",
                    owner_id
                );
                self.end_session(owner_id).await?;
                return Err(e);
            }
        };

        let started = Instant::now();
        let outcome = self.rcon.execute(&active.destination, &credential, command).await;
        drop(credential);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                if self.policy.auto_renew {
                    if let Err(e) = self.renew(owner_id).await {
                        tracing::warn!("⚠️  Could not renew the session of owner {}: {}", owner_id, e);
                    }
                }
                Ok(CommandExecutionResult::succeeded(output, duration_ms))
            }
            Err(e) => {
                tracing::warn!(
                    "❌ Command of owner {} on {} failed: {}",
                    owner_id,
                    active.destination,
                    e
                );
                Ok(CommandExecutionResult::failed(&e, duration_ms))
            }
        }
    }

    async fn renew(&self, owner_id: i64) -> Result<()> {
        let lock = self.owner_lock(owner_id);
        let _guard = lock.lock().await;

        let expires_at = self.clock.now() + self.policy.duration;
        let mut uow = self.gateway.begin().await?;
        let extended = uow.extend_session(owner_id, expires_at).await?;
        uow.commit().await?;

        if !extended {
            return Ok(());
        }

        match self.cache.get(owner_id).await {
            Ok(Some(mut entry)) => {
                entry.expires_at = expires_at;
                self.cache.put(entry).await?;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("⚠️  Session cache read failed for owner {}: {}", owner_id, e);
                self.cache.invalidate(owner_id).await?;
            }
        }

        tracing::debug!("Session of owner {} renewed until {}", owner_id, expires_at);
        Ok(())
    }

    /// Deletes every expired session from the store, purges expired cache
    /// entries and forgets locks no task is holding.
    pub async fn sweep_expired(&self) -> Result<SweepReport> {
        let mut uow = self.gateway.begin().await?;
        let sessions = uow.cleanup_expired_sessions().await?;
        uow.commit().await?;

        let cache_entries = match self.cache.purge_expired(self.clock.now()).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("⚠️  Session cache purge failed: {}", e);
                0
            }
        };

        let idle_locks = {
            let mut locks = self.owner_locks.lock().unwrap_or_else(PoisonError::into_inner);
            let before = locks.len();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            before - locks.len()
        };

        let report = SweepReport {
            sessions,
            cache_entries,
            idle_locks,
        };
        if report.sessions > 0 || report.cache_entries > 0 {
            tracing::info!(
                "🧹 Swept {} expired session(s) and {} cache entr(ies)",
                report.sessions,
                report.cache_entries
            );
        }
        Ok(report)
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `period` until the
    /// returned task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_expired().await {
                    tracing::error!("❌ Session sweep failed: {}", e);
                }
            }
        })
    }
}
