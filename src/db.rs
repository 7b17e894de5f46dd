use std::time::Duration;

use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts,
};
use tokio_postgres::NoTls;
use tokio_postgres::config::Host;

use crate::error::{AppError, Result};

/// Builds the pool behind [`PgGateway`](crate::repositories::postgres::PgGateway).
///
/// `database_url` is a libpq-style URL; only its first host and port are used.
/// Session lookups hold a connection for one short transaction, so waiting
/// more than a few seconds for one means the store is unhealthy.
pub fn create_pool(database_url: &str, max_size: usize) -> Result<Pool> {
    let url: tokio_postgres::Config = database_url.parse()?;

    let mut cfg = Config::new();
    cfg.host = url.get_hosts().first().map(|host| match host {
        Host::Tcp(name) => name.clone(),
        #[cfg(unix)]
        Host::Unix(socket_dir) => socket_dir.to_string_lossy().into_owned(),
    });
    cfg.port = url.get_ports().first().copied();
    cfg.dbname = url.get_dbname().map(str::to_string);
    cfg.user = url.get_user().map(str::to_string);
    cfg.password = url
        .get_password()
        .map(|raw| String::from_utf8_lossy(raw).into_owned());

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig {
        max_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_urls_are_rejected() {
        assert!(matches!(
            create_pool("postgres://user@host:notaport/db", 4),
            Err(AppError::Database(_))
        ));
    }
}
