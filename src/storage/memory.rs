//! In-process store implementations.
//!
//! Used by the test harness and by single-node deployments that do not want
//! a database. They mirror the Postgres stores' semantics, including the
//! fingerprint uniqueness rule on append.

use crate::domain::connection::{Connection, ConnectionStatus};
use crate::domain::message::{Candidate, Conversation, Message, MessageStatus};
use crate::error::{AppError, Result};
use crate::storage::connection_store::ConnectionStore;
use crate::storage::message_store::{Appended, MessageStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    fingerprint: String,
    read: bool,
}

#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, candidate: Candidate) -> Result<Appended> {
        let fingerprint = candidate.fingerprint();
        let mut messages = self.messages.write().await;

        if messages
            .iter()
            .any(|s| s.message.connection_id == candidate.connection_id && s.fingerprint == fingerprint)
        {
            return Ok(Appended::DuplicateFingerprint);
        }

        let message = candidate.into_message(Uuid::now_v7());
        messages.push(StoredMessage { message: message.clone(), fingerprint, read: false });
        Ok(Appended::Inserted(message))
    }

    async fn replace(&self, existing: Uuid, candidate: Candidate) -> Result<Message> {
        let mut messages = self.messages.write().await;
        let stored = messages.iter_mut().find(|s| s.message.id == existing).ok_or(AppError::NotFound)?;

        stored.fingerprint = candidate.fingerprint();
        stored.message.status = candidate.status;
        stored.message.occurred_at = candidate.occurred_at;
        stored.message.gateway_id = candidate.gateway_id;
        stored.message.body = candidate.body;
        stored.message.temp_id = None;

        Ok(stored.message.clone())
    }

    async fn update_status(&self, id: Uuid, status: MessageStatus) -> Result<()> {
        let mut messages = self.messages.write().await;
        let stored = messages.iter_mut().find(|s| s.message.id == id).ok_or(AppError::NotFound)?;
        stored.message.status = status;
        Ok(())
    }

    async fn update_status_by_gateway_id(
        &self,
        connection_id: Uuid,
        gateway_id: &str,
        status: MessageStatus,
    ) -> Result<Option<Message>> {
        let mut messages = self.messages.write().await;
        let Some(stored) = messages
            .iter_mut()
            .find(|s| s.message.connection_id == connection_id && s.message.gateway_id.as_deref() == Some(gateway_id))
        else {
            return Ok(None);
        };
        stored.message.status = status;
        Ok(Some(stored.message.clone()))
    }

    async fn list_by_connection(&self, connection_id: Uuid) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut result: Vec<Message> = messages
            .iter()
            .filter(|s| s.message.connection_id == connection_id)
            .map(|s| s.message.clone())
            .collect();
        result.sort_by_key(|m| m.occurred_at);
        Ok(result)
    }

    async fn list_by_conversation(&self, connection_id: Uuid, counterparty: &str) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut result: Vec<Message> = messages
            .iter()
            .filter(|s| s.message.connection_id == connection_id && s.message.counterparty == counterparty)
            .map(|s| s.message.clone())
            .collect();
        result.sort_by_key(|m| m.occurred_at);
        Ok(result)
    }

    async fn list_conversations(&self, connection_id: Uuid) -> Result<Vec<Conversation>> {
        let messages = self.messages.read().await;
        let mut by_counterparty: HashMap<&str, Vec<&StoredMessage>> = HashMap::new();
        for stored in messages.iter().filter(|s| s.message.connection_id == connection_id) {
            by_counterparty.entry(&stored.message.counterparty).or_default().push(stored);
        }

        let mut conversations: Vec<Conversation> = by_counterparty
            .into_iter()
            .filter_map(|(counterparty, mut entries)| {
                entries.sort_by_key(|s| s.message.occurred_at);
                let last = entries.last()?;
                Some(Conversation {
                    counterparty: counterparty.to_string(),
                    last_message: last.message.body.clone(),
                    last_message_at: last.message.occurred_at,
                    message_count: entries.len() as u64,
                    unread_count: entries
                        .iter()
                        .filter(|s| s.message.direction == crate::domain::message::Direction::Received && !s.read)
                        .count() as u64,
                })
            })
            .collect();

        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn mark_read(&self, connection_id: Uuid, counterparty: &str) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let mut affected = 0;
        for stored in messages.iter_mut() {
            if stored.message.connection_id == connection_id
                && stored.message.counterparty == counterparty
                && stored.message.direction == crate::domain::message::Direction::Received
                && !stored.read
            {
                stored.read = true;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl MemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn list(&self) -> Result<Vec<Connection>> {
        let connections = self.connections.read().await;
        let mut result: Vec<Connection> = connections.values().cloned().collect();
        result.sort_by_key(|c| c.id);
        Ok(result)
    }

    async fn get(&self, id: Uuid) -> Result<Connection> {
        let connections = self.connections.read().await;
        connections.get(&id).cloned().ok_or(AppError::NotFound)
    }

    async fn get_by_instance(&self, instance: &str) -> Result<Connection> {
        let connections = self.connections.read().await;
        connections.values().find(|c| c.instance == instance).cloned().ok_or(AppError::NotFound)
    }

    async fn list_connected(&self) -> Result<Vec<Connection>> {
        let mut result: Vec<Connection> =
            self.connections.read().await.values().filter(|c| c.status == ConnectionStatus::Connected).cloned().collect();
        result.sort_by_key(|c| c.id);
        Ok(result)
    }

    async fn upsert(&self, connection: Connection) -> Result<()> {
        self.connections.write().await.insert(connection.id, connection);
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<()> {
        let mut connections = self.connections.write().await;
        let connection = connections.get_mut(&id).ok_or(AppError::NotFound)?;
        connection.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Direction;
    use time::OffsetDateTime;

    fn candidate(connection_id: Uuid, counterparty: &str, body: &str, secs: i64, direction: Direction) -> Candidate {
        Candidate {
            connection_id,
            counterparty: counterparty.to_string(),
            direction,
            body: body.to_string(),
            status: MessageStatus::Delivered,
            occurred_at: OffsetDateTime::from_unix_timestamp(1_700_000_000 + secs).unwrap(),
            gateway_id: None,
            temp_id: None,
        }
    }

    #[tokio::test]
    async fn append_assigns_ids_and_detects_fingerprint_duplicates() {
        let store = MemoryMessageStore::new();
        let conn = Uuid::new_v4();

        let first = store.append(candidate(conn, "111", "hello", 0, Direction::Received)).await.unwrap();
        assert!(matches!(first, Appended::Inserted(_)));

        let dup = store.append(candidate(conn, "111", "hello", 0, Direction::Received)).await.unwrap();
        assert!(matches!(dup, Appended::DuplicateFingerprint));

        // Same content on another connection is independent.
        let other = store.append(candidate(Uuid::new_v4(), "111", "hello", 0, Direction::Received)).await.unwrap();
        assert!(matches!(other, Appended::Inserted(_)));
    }

    #[tokio::test]
    async fn replace_clears_temp_id_and_keeps_row_identity() {
        let store = MemoryMessageStore::new();
        let conn = Uuid::new_v4();

        let mut placeholder = candidate(conn, "111", "hello", 0, Direction::Sent);
        placeholder.status = MessageStatus::Pending;
        placeholder.temp_id = Some("abc".to_string());
        let Appended::Inserted(inserted) = store.append(placeholder).await.unwrap() else {
            panic!("expected insert");
        };

        let mut authoritative = candidate(conn, "111", "hello", 1, Direction::Sent);
        authoritative.status = MessageStatus::Sent;
        authoritative.gateway_id = Some("999".to_string());
        let replaced = store.replace(inserted.id, authoritative).await.unwrap();

        assert_eq!(replaced.id, inserted.id);
        assert_eq!(replaced.status, MessageStatus::Sent);
        assert_eq!(replaced.gateway_id.as_deref(), Some("999"));
        assert!(replaced.temp_id.is_none());

        let history = store.list_by_conversation(conn, "111").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn conversations_project_counts_and_last_message() {
        let store = MemoryMessageStore::new();
        let conn = Uuid::new_v4();

        store.append(candidate(conn, "111", "first", 0, Direction::Received)).await.unwrap();
        store.append(candidate(conn, "111", "second", 10, Direction::Received)).await.unwrap();
        store.append(candidate(conn, "222", "other", 5, Direction::Sent)).await.unwrap();

        let conversations = store.list_conversations(conn).await.unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].counterparty, "111");
        assert_eq!(conversations[0].last_message, "second");
        assert_eq!(conversations[0].message_count, 2);
        assert_eq!(conversations[0].unread_count, 2);
        assert_eq!(conversations[1].unread_count, 0);

        assert_eq!(store.mark_read(conn, "111").await.unwrap(), 2);
        let conversations = store.list_conversations(conn).await.unwrap();
        assert_eq!(conversations[0].unread_count, 0);
    }

    #[tokio::test]
    async fn history_is_sorted_by_timestamp_not_arrival() {
        let store = MemoryMessageStore::new();
        let conn = Uuid::new_v4();

        store.append(candidate(conn, "111", "later", 10, Direction::Received)).await.unwrap();
        store.append(candidate(conn, "111", "earlier", 0, Direction::Received)).await.unwrap();

        let history = store.list_by_conversation(conn, "111").await.unwrap();
        assert_eq!(history[0].body, "earlier");
        assert_eq!(history[1].body, "later");
    }
}
