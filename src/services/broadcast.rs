use crate::domain::message::{Message, MessageStatus};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Server-to-client event envelope. Serialized as `{"type": ..., "data": ...}`
/// on the WebSocket channel; every variant carries the connection and
/// counterparty so clients can filter to their open conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageInserted { message: Message },
    MessageReplaced { message: Message },
    StatusChanged { id: Uuid, connection_id: Uuid, counterparty: String, status: MessageStatus },
    ConversationTouched { connection_id: Uuid, counterparty: String },
}

impl StreamEvent {
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        match self {
            Self::MessageInserted { message } | Self::MessageReplaced { message } => message.connection_id,
            Self::StatusChanged { connection_id, .. } | Self::ConversationTouched { connection_id, .. } => {
                *connection_id
            }
        }
    }

    #[must_use]
    pub fn counterparty(&self) -> &str {
        match self {
            Self::MessageInserted { message } | Self::MessageReplaced { message } => &message.counterparty,
            Self::StatusChanged { counterparty, .. } | Self::ConversationTouched { counterparty, .. } => counterparty,
        }
    }
}

/// Best-effort fan-out of merge outcomes to connected UI sessions.
///
/// There is no replay: a client that subscribes after an event has missed it
/// permanently and relies on its fetch-on-load to catch up. The store stays
/// the durable source of truth; this channel is a latency optimization.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<StreamEvent>,
}

impl Broadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to every currently-subscribed client. Publishing
    /// with no subscribers is not an error.
    pub fn publish(&self, event: StreamEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        tracing::trace!(receivers, "published stream event");
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
