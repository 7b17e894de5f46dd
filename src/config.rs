use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use zeroize::Zeroizing;

use crate::rcon::client::RconSettings;
use crate::rcon::retry::RetryPolicy;
use crate::services::session::SessionPolicy;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP surface listens on.
    pub bind_addr: SocketAddr,
    /// The URL of the PostgreSQL database. Unset means in-memory storage.
    pub database_url: Option<String>,
    /// The URL of the Redis server. Unset means an in-process session cache.
    pub redis_url: Option<String>,
    /// Bearer token required on every `/api` request, when set.
    pub api_token: Option<Zeroizing<String>>,
    /// Passphrase the credential cipher key is derived from.
    pub encryption_key: Option<Zeroizing<String>>,
    /// The duration of a session in hours.
    pub session_duration_hours: i64,
    /// Whether successful commands push the session expiry forward.
    pub session_auto_renew: bool,
    /// Period of the expired-session sweep in hours.
    pub cleanup_interval_hours: u64,
    /// Connect/read/write timeout for RCON, in seconds.
    pub rcon_timeout_secs: u64,
    /// Attempts per RCON operation.
    pub rcon_max_retries: u32,
    /// Delay between RCON attempts, in seconds.
    pub rcon_retry_delay_secs: u64,
    /// Quiet window that ends a multi-packet reply, in milliseconds.
    pub rcon_fragment_window_ms: u64,
    /// Development mode.
    pub debug: bool,
    /// Skip the authorization probe. Ignored unless `debug` is on.
    pub dev_skip_rcon_check: bool,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let session_duration_hours: i64 = parse_or(&var, "SESSION_DURATION_HOURS", 6)?;
        if session_duration_hours <= 0 {
            anyhow::bail!("SESSION_DURATION_HOURS must be greater than 0");
        }

        let cleanup_interval_hours: u64 = parse_or(&var, "CLEANUP_INTERVAL_HOURS", 1)?;
        if cleanup_interval_hours == 0 {
            anyhow::bail!("CLEANUP_INTERVAL_HOURS must be greater than 0");
        }

        let rcon_timeout_secs: u64 = parse_or(&var, "RCON_TIMEOUT", 10)?;
        if rcon_timeout_secs == 0 {
            anyhow::bail!("RCON_TIMEOUT must be greater than 0");
        }

        let rcon_max_retries: u32 = parse_or(&var, "RCON_MAX_RETRIES", 3)?;
        if rcon_max_retries == 0 {
            anyhow::bail!("RCON_MAX_RETRIES must be at least 1");
        }

        Ok(Self {
            bind_addr: parse_or(&var, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            database_url: var("DATABASE_URL"),
            redis_url: var("REDIS_URL"),
            api_token: var("API_TOKEN").map(Zeroizing::new),
            encryption_key: var("ENCRYPTION_KEY").map(Zeroizing::new),
            session_duration_hours,
            session_auto_renew: bool_or(&var, "SESSION_AUTO_RENEW", false)?,
            cleanup_interval_hours,
            rcon_timeout_secs,
            rcon_max_retries,
            rcon_retry_delay_secs: parse_or(&var, "RCON_RETRY_DELAY", 1)?,
            rcon_fragment_window_ms: parse_or(&var, "RCON_FRAGMENT_WINDOW_MS", 100)?,
            debug: bool_or(&var, "DEBUG", false)?,
            dev_skip_rcon_check: bool_or(&var, "DEV_SKIP_RCON_CHECK", false)?,
        })
    }

    /// Whether authorization skips the RCON probe.
    pub fn skip_rcon_check(&self) -> bool {
        self.debug && self.dev_skip_rcon_check
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            duration: TimeDelta::hours(self.session_duration_hours),
            auto_renew: self.session_auto_renew,
            skip_rcon_check: self.skip_rcon_check(),
        }
    }

    pub fn rcon_settings(&self) -> RconSettings {
        RconSettings {
            io_timeout: Duration::from_secs(self.rcon_timeout_secs),
            fragment_window: Duration::from_millis(self.rcon_fragment_window_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.rcon_max_retries,
            Duration::from_secs(self.rcon_retry_delay_secs),
        )
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3600)
    }
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

fn bool_or<V>(var: &V, key: &str, default: bool) -> Result<bool>
where
    V: Fn(&str) -> Option<String>,
{
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        other => anyhow::bail!("Invalid {}: expected a boolean, got {:?}", key, other),
    }
}
