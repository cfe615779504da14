use crate::domain::connection::Connection;
use crate::domain::message::{Candidate, Direction, Message, MessageStatus};
use crate::error::{AppError, Result};
use crate::services::broadcast::{Broadcaster, StreamEvent};
use crate::services::gateway::GatewayClient;
use crate::storage::{Appended, MessageStore};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// Handles user-composed messages.
///
/// The record is persisted `Pending` and broadcast before the gateway call
/// so the UI renders the bubble instantly; the delivery outcome arrives as a
/// follow-up status event. A hung gateway call times out into `Failed`
/// rather than leaving the message `Pending` forever. There is no automatic
/// retry; resend is a user action.
#[derive(Debug, Clone)]
pub struct SendService {
    store: Arc<dyn MessageStore>,
    gateway: Arc<dyn GatewayClient>,
    broadcaster: Broadcaster,
    send_timeout: Duration,
}

impl SendService {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        gateway: Arc<dyn GatewayClient>,
        broadcaster: Broadcaster,
        send_timeout: Duration,
    ) -> Self {
        Self { store, gateway, broadcaster, send_timeout }
    }

    /// Persists and delivers one outbound message.
    ///
    /// # Errors
    /// Returns `AppError::Gateway` when delivery fails or times out; the
    /// optimistic record stays visible as `Failed`. Returns
    /// `AppError::Database` if the initial persistence fails, in which case
    /// nothing was sent.
    #[tracing::instrument(
        skip(self, connection, body),
        fields(connection_id = %connection.id, counterparty = %to)
    )]
    pub async fn send(
        &self,
        connection: &Connection,
        to: &str,
        body: &str,
        temp_id: Option<String>,
    ) -> Result<Message> {
        let candidate = Candidate {
            connection_id: connection.id,
            counterparty: to.to_string(),
            direction: Direction::Sent,
            body: body.to_string(),
            status: MessageStatus::Pending,
            occurred_at: OffsetDateTime::now_utc(),
            gateway_id: None,
            temp_id,
        };

        let pending = match self.store.append(candidate).await? {
            Appended::Inserted(message) => message,
            // An identical send committed within the same second; surface it
            // as a conflict instead of delivering twice.
            Appended::DuplicateFingerprint => {
                return Err(AppError::BadRequest("duplicate send".to_string()));
            }
        };

        self.broadcaster.publish(StreamEvent::MessageInserted { message: pending.clone() });
        self.broadcaster.publish(StreamEvent::ConversationTouched {
            connection_id: pending.connection_id,
            counterparty: pending.counterparty.clone(),
        });

        let delivery =
            tokio::time::timeout(self.send_timeout, self.gateway.send_message(&connection.instance, to, body)).await;

        match delivery {
            Ok(Ok(receipt)) => {
                let authoritative = Candidate {
                    connection_id: pending.connection_id,
                    counterparty: pending.counterparty.clone(),
                    direction: Direction::Sent,
                    body: pending.body.clone(),
                    status: MessageStatus::Sent,
                    occurred_at: receipt.timestamp.unwrap_or(pending.occurred_at),
                    gateway_id: receipt.gateway_id,
                    temp_id: None,
                };
                let message = self.store.replace(pending.id, authoritative).await?;
                self.publish_status(&message);
                tracing::debug!(id = %message.id, "Outbound message delivered to gateway");
                Ok(message)
            }
            Ok(Err(e)) => {
                self.mark_failed(&pending).await?;
                Err(e)
            }
            Err(_elapsed) => {
                self.mark_failed(&pending).await?;
                Err(AppError::Gateway(format!("send timed out after {:?}", self.send_timeout)))
            }
        }
    }

    async fn mark_failed(&self, pending: &Message) -> Result<()> {
        self.store.update_status(pending.id, MessageStatus::Failed).await?;
        let mut failed = pending.clone();
        failed.status = MessageStatus::Failed;
        self.publish_status(&failed);
        tracing::warn!(id = %pending.id, "Outbound message marked failed");
        Ok(())
    }

    fn publish_status(&self, message: &Message) {
        self.broadcaster.publish(StreamEvent::StatusChanged {
            id: message.id,
            connection_id: message.connection_id,
            counterparty: message.counterparty.clone(),
            status: message.status,
        });
    }
}
