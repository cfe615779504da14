use crate::domain::message::{Candidate, Conversation, Message, MessageStatus};
use crate::error::{AppError, Result};
use crate::storage::DbPool;
use crate::storage::records::{ConversationRecord, MessageRecord};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Result of an append. The store enforces a uniqueness constraint on the
/// content fingerprint; a violation means another producer committed the
/// same event first and is reported as a duplicate, not an error.
#[derive(Debug, Clone)]
pub enum Appended {
    Inserted(Message),
    DuplicateFingerprint,
}

/// Durable, append-mostly log of messages keyed by connection and
/// counterparty. Updates are limited to status transitions and placeholder
/// replacement; historical content is never rewritten.
#[async_trait]
pub trait MessageStore: Send + Sync + fmt::Debug {
    /// Persists a candidate, assigning the store id.
    async fn append(&self, candidate: Candidate) -> Result<Appended>;

    /// Supersedes an existing row (an optimistic placeholder) with the
    /// authoritative candidate: status, timestamp, gateway id and body are
    /// adopted, the correlation token is cleared, the row id is kept.
    async fn replace(&self, existing: Uuid, candidate: Candidate) -> Result<Message>;

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<()>;

    /// Status transition addressed by the upstream identifier, as delivery
    /// receipts carry no store id. Returns the updated message, or `None`
    /// when no message with that identifier exists yet.
    async fn update_status_by_gateway_id(
        &self,
        connection_id: Uuid,
        gateway_id: &str,
        status: MessageStatus,
    ) -> Result<Option<Message>>;

    async fn list_by_connection(&self, connection_id: Uuid) -> Result<Vec<Message>>;

    /// Messages of one conversation in chronological order.
    async fn list_by_conversation(&self, connection_id: Uuid, counterparty: &str) -> Result<Vec<Message>>;

    /// The derived conversation projection, most recently active first.
    async fn list_conversations(&self, connection_id: Uuid) -> Result<Vec<Conversation>>;

    /// Clears the unread counter of one conversation; returns how many
    /// messages were affected.
    async fn mark_read(&self, connection_id: Uuid, counterparty: &str) -> Result<u64>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, candidate: Candidate) -> Result<Appended> {
        let fingerprint = candidate.fingerprint();
        let message = candidate.into_message(Uuid::now_v7());

        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (id, connection_id, counterparty, direction, body, status, occurred_at, gateway_id, temp_id, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(message.id)
        .bind(message.connection_id)
        .bind(&message.counterparty)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(message.occurred_at)
        .bind(&message.gateway_id)
        .bind(&message.temp_id)
        .bind(&fingerprint)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Appended::Inserted(message)),
            Err(e) if AppError::is_unique_violation(&e) => Ok(Appended::DuplicateFingerprint),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, existing: Uuid, candidate: Candidate) -> Result<Message> {
        let fingerprint = candidate.fingerprint();
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET status = $2, occurred_at = $3, gateway_id = $4, body = $5, fingerprint = $6, temp_id = NULL
            WHERE id = $1
            RETURNING id, connection_id, counterparty, direction, body, status, occurred_at, gateway_id, temp_id
            "#,
        )
        .bind(existing)
        .bind(candidate.status.as_str())
        .bind(candidate.occurred_at)
        .bind(&candidate.gateway_id)
        .bind(&candidate.body)
        .bind(&fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        record.map(Message::from).ok_or(AppError::NotFound)
    }

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn update_status_by_gateway_id(
        &self,
        connection_id: Uuid,
        gateway_id: &str,
        status: MessageStatus,
    ) -> Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            UPDATE messages
            SET status = $3
            WHERE connection_id = $1 AND gateway_id = $2
            RETURNING id, connection_id, counterparty, direction, body, status, occurred_at, gateway_id, temp_id
            "#,
        )
        .bind(connection_id)
        .bind(gateway_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Message::from))
    }

    async fn list_by_connection(&self, connection_id: Uuid) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, connection_id, counterparty, direction, body, status, occurred_at, gateway_id, temp_id
            FROM messages
            WHERE connection_id = $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn list_by_conversation(&self, connection_id: Uuid, counterparty: &str) -> Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, connection_id, counterparty, direction, body, status, occurred_at, gateway_id, temp_id
            FROM messages
            WHERE connection_id = $1 AND counterparty = $2
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(connection_id)
        .bind(counterparty)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn list_conversations(&self, connection_id: Uuid) -> Result<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT counterparty, body AS last_message, occurred_at AS last_message_at, message_count, unread_count
            FROM (
                SELECT counterparty, body, occurred_at,
                       ROW_NUMBER() OVER (PARTITION BY counterparty ORDER BY occurred_at DESC) AS rn,
                       COUNT(*) OVER (PARTITION BY counterparty) AS message_count,
                       COUNT(*) FILTER (WHERE direction = 'received' AND read_at IS NULL)
                           OVER (PARTITION BY counterparty) AS unread_count
                FROM messages
                WHERE connection_id = $1
            ) t
            WHERE t.rn = 1
            ORDER BY last_message_at DESC
            "#,
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records.into_iter().map(Conversation::from).collect())
    }

    async fn mark_read(&self, connection_id: Uuid, counterparty: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read_at = NOW()
            WHERE connection_id = $1 AND counterparty = $2 AND direction = 'received' AND read_at IS NULL
            "#,
        )
        .bind(connection_id)
        .bind(counterparty)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
