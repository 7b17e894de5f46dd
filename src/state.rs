use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::crypto::cipher::CredentialCipher;
use crate::error::Result;
use crate::rcon::client::RconClient;
use crate::repositories::gateway::PersistenceGateway;
use crate::repositories::memory::MemoryGateway;
use crate::repositories::postgres::{self, PgGateway};
use crate::services::session::SessionAuthority;
use crate::services::session_cache::{MemorySessionCache, RedisSessionCache, SessionCache};

/// The maximum number of pooled PostgreSQL connections.
pub const DB_POOL_MAX_SIZE: usize = 16;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The session authority every handler goes through.
    pub authority: Arc<SessionAuthority>,
    /// The application's configuration.
    pub config: Config,
}

impl AppState {
    /// Wires the storage backends, cipher and RCON client from `config`.
    pub async fn new(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let cipher = CredentialCipher::from_config(config.encryption_key.as_deref().map(String::as_str))?;

        let gateway: Arc<dyn PersistenceGateway> = match &config.database_url {
            Some(url) => {
                if cipher.is_ephemeral() {
                    tracing::warn!(
                        "⚠️  DATABASE_URL is set but ENCRYPTION_KEY is not: stored credentials \
                         become unreadable on restart"
                    );
                }
                let pool = crate::db::create_pool(url, DB_POOL_MAX_SIZE)?;
                postgres::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");
                Arc::new(PgGateway::new(pool, clock.clone()))
            }
            None => {
                tracing::warn!("⚠️  DATABASE_URL is not set: sessions live in memory and are lost on restart");
                Arc::new(MemoryGateway::new(clock.clone()))
            }
        };

        let cache: Arc<dyn SessionCache> = match &config.redis_url {
            Some(url) => Arc::new(RedisSessionCache::connect(url, clock.clone()).await?),
            None => {
                tracing::info!("✅ In-process session cache initialized");
                Arc::new(MemorySessionCache::new())
            }
        };

        let rcon = RconClient::tcp(config.rcon_settings(), config.retry_policy());

        let authority = SessionAuthority::new(
            gateway,
            cache,
            Arc::new(cipher),
            rcon,
            clock,
            config.session_policy(),
        );

        Ok(Self {
            authority: Arc::new(authority),
            config: config.clone(),
        })
    }

    /// State around an already built authority.
    pub fn with_authority(authority: Arc<SessionAuthority>, config: Config) -> Self {
        Self { authority, config }
    }
}
