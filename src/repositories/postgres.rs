use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use deadpool_postgres::{Object, Pool};
use std::sync::Arc;
use tokio_postgres::Row;

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::{
        server::{Destination, ServerRecord},
        session::SessionRecord,
    },
    repositories::gateway::{PersistenceGateway, UnitOfWork},
};

/// Creates the tables this service needs if they do not exist yet.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS rcon_servers (
                id                    BIGSERIAL PRIMARY KEY,
                owner_id              BIGINT      NOT NULL,
                host                  TEXT        NOT NULL,
                port                  INTEGER     NOT NULL CHECK (port BETWEEN 1 AND 65535),
                encrypted_credential  BYTEA       NOT NULL,
                created_at            TIMESTAMPTZ NOT NULL,
                updated_at            TIMESTAMPTZ NOT NULL,
                UNIQUE (owner_id, host, port)
            );

            CREATE TABLE IF NOT EXISTS rcon_sessions (
                owner_id          BIGINT      PRIMARY KEY,
                server_id         BIGINT      NOT NULL REFERENCES rcon_servers (id) ON DELETE CASCADE,
                expires_at        TIMESTAMPTZ NOT NULL,
                created_at        TIMESTAMPTZ NOT NULL,
                last_activity_at  TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS rcon_sessions_expires_at_idx ON rcon_sessions (expires_at);
            "#,
        )
        .await?;
    tracing::info!("✅ Database schema ready");
    Ok(())
}

/// A helper function to map a `tokio_postgres::Row` to a `ServerRecord`.
fn row_to_server(row: &Row) -> Result<ServerRecord> {
    let port: i32 = row.try_get("port").map_err(|_| AppError::MissingData("port".to_string()))?;
    let port = u16::try_from(port).map_err(|_| AppError::MissingData(format!("port out of range: {}", port)))?;
    let host: String = row.try_get("host").map_err(|_| AppError::MissingData("host".to_string()))?;

    Ok(ServerRecord {
        id: row.try_get("id").map_err(|_| AppError::MissingData("id".to_string()))?,
        owner_id: row.try_get("owner_id").map_err(|_| AppError::MissingData("owner_id".to_string()))?,
        destination: Destination::new(host, port),
        encrypted_credential: row.try_get("encrypted_credential").map_err(|_| AppError::MissingData("encrypted_credential".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        updated_at: row.try_get("updated_at").map_err(|_| AppError::MissingData("updated_at".to_string()))?,
    })
}

/// A helper function to map a `tokio_postgres::Row` to a `SessionRecord`.
fn row_to_session(row: &Row) -> Result<SessionRecord> {
    Ok(SessionRecord {
        owner_id: row.try_get("owner_id").map_err(|_| AppError::MissingData("owner_id".to_string()))?,
        server_id: row.try_get("server_id").map_err(|_| AppError::MissingData("server_id".to_string()))?,
        expires_at: row.try_get("expires_at").map_err(|_| AppError::MissingData("expires_at".to_string()))?,
        created_at: row.try_get("created_at").map_err(|_| AppError::MissingData("created_at".to_string()))?,
        last_activity_at: row.try_get("last_activity_at").map_err(|_| AppError::MissingData("last_activity_at".to_string()))?,
    })
}

/// A [`PersistenceGateway`] backed by a PostgreSQL pool.
///
/// Timestamps come from the injected clock rather than `NOW()`, so the store
/// and the cache agree on what "expired" means.
#[derive(Clone)]
pub struct PgGateway {
    pool: Pool,
    clock: Arc<dyn Clock>,
}

impl PgGateway {
    pub fn new(pool: Pool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgUnit {
            client: Some(client),
            clock: self.clock.clone(),
        }))
    }
}

/// One open transaction on a pooled connection.
///
/// If the unit is dropped while the transaction is still open, the
/// connection is detached from the pool and closed, which makes the server
/// abort the transaction.
struct PgUnit {
    client: Option<Object>,
    clock: Arc<dyn Clock>,
}

impl PgUnit {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Internal("unit of work already finished".to_string()))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| AppError::Internal("unit of work already finished".to_string()))?;
        match client.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The transaction state is unknown; never hand this connection back.
                drop(Object::take(client));
                Err(e.into())
            }
        }
    }
}

impl Drop for PgUnit {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            tracing::debug!("Unit of work dropped without commit, discarding its connection");
            drop(Object::take(client));
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn save_server(
        &mut self,
        owner_id: i64,
        destination: &Destination,
        encrypted_credential: &[u8],
    ) -> Result<ServerRecord> {
        let now = self.clock.now();
        let port = i32::from(destination.port);
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO rcon_servers (owner_id, host, port, encrypted_credential, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                ON CONFLICT (owner_id, host, port) DO UPDATE
                SET encrypted_credential = EXCLUDED.encrypted_credential,
                    updated_at = EXCLUDED.updated_at
                RETURNING *
                "#,
            )
            .await?;
        let row = client
            .query_one(&stmt, &[&owner_id, &destination.host, &port, &encrypted_credential, &now])
            .await?;
        row_to_server(&row)
    }

    async fn get_server(&mut self, server_id: i64) -> Result<Option<ServerRecord>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT *
                FROM rcon_servers
                WHERE id = $1
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&server_id]).await?;
        row.map(|r| row_to_server(&r)).transpose()
    }

    async fn create_session(
        &mut self,
        owner_id: i64,
        server_id: i64,
        duration: TimeDelta,
    ) -> Result<SessionRecord> {
        let now = self.clock.now();
        let expires_at = now + duration;
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO rcon_sessions (owner_id, server_id, expires_at, created_at, last_activity_at)
                VALUES ($1, $2, $3, $4, $4)
                ON CONFLICT (owner_id) DO UPDATE
                SET server_id = EXCLUDED.server_id,
                    expires_at = EXCLUDED.expires_at,
                    created_at = EXCLUDED.created_at,
                    last_activity_at = EXCLUDED.last_activity_at
                RETURNING *
                "#,
            )
            .await?;
        let row = client
            .query_one(&stmt, &[&owner_id, &server_id, &expires_at, &now])
            .await?;
        row_to_session(&row)
    }

    async fn get_active_session(&mut self, owner_id: i64) -> Result<Option<SessionRecord>> {
        let now = self.clock.now();
        let client = self.client()?;

        let purge = client
            .prepare_cached("DELETE FROM rcon_sessions WHERE owner_id = $1 AND expires_at <= $2")
            .await?;
        client.execute(&purge, &[&owner_id, &now]).await?;

        let touch = client
            .prepare_cached(
                r#"
                UPDATE rcon_sessions
                SET last_activity_at = $2
                WHERE owner_id = $1
                RETURNING *
                "#,
            )
            .await?;
        let row = client.query_opt(&touch, &[&owner_id, &now]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn extend_session(&mut self, owner_id: i64, expires_at: DateTime<Utc>) -> Result<bool> {
        let now = self.clock.now();
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                UPDATE rcon_sessions
                SET expires_at = $2, last_activity_at = $3
                WHERE owner_id = $1 AND expires_at > $3
                "#,
            )
            .await?;
        let updated = client.execute(&stmt, &[&owner_id, &expires_at, &now]).await?;
        Ok(updated > 0)
    }

    async fn delete_session(&mut self, owner_id: i64) -> Result<bool> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached("DELETE FROM rcon_sessions WHERE owner_id = $1")
            .await?;
        let deleted = client.execute(&stmt, &[&owner_id]).await?;
        Ok(deleted > 0)
    }

    async fn cleanup_expired_sessions(&mut self) -> Result<u64> {
        let now = self.clock.now();
        let client = self.client()?;
        let stmt = client
            .prepare_cached("DELETE FROM rcon_sessions WHERE expires_at <= $1")
            .await?;
        Ok(client.execute(&stmt, &[&now]).await?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}
