use crate::domain::connection::{Connection, ConnectionStatus};
use crate::error::{AppError, Result};
use crate::storage::DbPool;
use crate::storage::records::ConnectionRecord;
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Gateway sessions. Status transitions are managed elsewhere; the
/// synchronizer only needs to know which connections are currently live.
#[async_trait]
pub trait ConnectionStore: Send + Sync + fmt::Debug {
    async fn list(&self) -> Result<Vec<Connection>>;

    async fn get(&self, id: Uuid) -> Result<Connection>;

    /// Resolves the connection behind a gateway instance name, as carried by
    /// webhook envelopes.
    async fn get_by_instance(&self, instance: &str) -> Result<Connection>;

    /// Connections eligible for polling.
    async fn list_connected(&self) -> Result<Vec<Connection>>;

    async fn upsert(&self, connection: Connection) -> Result<()>;

    async fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgConnectionStore {
    pool: DbPool,
}

impl PgConnectionStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn list(&self) -> Result<Vec<Connection>> {
        let records = sqlx::query_as::<_, ConnectionRecord>(
            "SELECT id, label, instance, status FROM connections ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Connection::from).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Connection> {
        let record = sqlx::query_as::<_, ConnectionRecord>(
            "SELECT id, label, instance, status FROM connections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Connection::from).ok_or(AppError::NotFound)
    }

    async fn get_by_instance(&self, instance: &str) -> Result<Connection> {
        let record = sqlx::query_as::<_, ConnectionRecord>(
            "SELECT id, label, instance, status FROM connections WHERE instance = $1",
        )
        .bind(instance)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Connection::from).ok_or(AppError::NotFound)
    }

    async fn list_connected(&self) -> Result<Vec<Connection>> {
        let records = sqlx::query_as::<_, ConnectionRecord>(
            "SELECT id, label, instance, status FROM connections WHERE status = 'connected' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Connection::from).collect())
    }

    async fn upsert(&self, connection: Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (id, label, instance, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET label = $2, instance = $3, status = $4
            "#,
        )
        .bind(connection.id)
        .bind(&connection.label)
        .bind(&connection.instance)
        .bind(connection.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<()> {
        let result = sqlx::query("UPDATE connections SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
