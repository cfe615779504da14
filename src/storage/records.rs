use crate::domain::connection::{Connection, ConnectionStatus};
use crate::domain::message::{Conversation, Direction, Message, MessageStatus};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
pub(crate) struct MessageRecord {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub counterparty: String,
    pub direction: String,
    pub body: String,
    pub status: String,
    pub occurred_at: OffsetDateTime,
    pub gateway_id: Option<String>,
    pub temp_id: Option<String>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            connection_id: record.connection_id,
            counterparty: record.counterparty,
            direction: Direction::parse(&record.direction),
            body: record.body,
            status: MessageStatus::parse(&record.status),
            occurred_at: record.occurred_at,
            gateway_id: record.gateway_id,
            temp_id: record.temp_id,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConversationRecord {
    pub counterparty: String,
    pub last_message: String,
    pub last_message_at: OffsetDateTime,
    pub message_count: i64,
    pub unread_count: i64,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        Self {
            counterparty: record.counterparty,
            last_message: record.last_message,
            last_message_at: record.last_message_at,
            message_count: record.message_count.max(0).unsigned_abs(),
            unread_count: record.unread_count.max(0).unsigned_abs(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ConnectionRecord {
    pub id: Uuid,
    pub label: String,
    pub instance: String,
    pub status: String,
}

impl From<ConnectionRecord> for Connection {
    fn from(record: ConnectionRecord) -> Self {
        Self {
            id: record.id,
            label: record.label,
            instance: record.instance,
            status: ConnectionStatus::parse(&record.status),
        }
    }
}
