use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Body substituted when the gateway delivers an event without extractable
/// text (media, reactions, protocol messages).
pub const PLACEHOLDER_BODY: &str = "no content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "sent" { Self::Sent } else { Self::Received }
    }
}

/// Delivery state of a message. Only meaningful for `Direction::Sent`;
/// received messages are always stored as `Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl MessageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Delivered,
        }
    }
}

/// A persisted message. `id` is assigned by the store; `gateway_id` is the
/// upstream identifier when one was supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub counterparty: String,
    pub direction: Direction,
    pub body: String,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub gateway_id: Option<String>,
    /// Client correlation token for optimistic sends. Cleared once the
    /// authoritative record replaces the placeholder.
    pub temp_id: Option<String>,
}

impl Message {
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.body, &self.counterparty, self.direction, self.occurred_at)
    }
}

/// A normalized message event from any producer, not yet reconciled against
/// the store.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub connection_id: Uuid,
    pub counterparty: String,
    pub direction: Direction,
    pub body: String,
    pub status: MessageStatus,
    pub occurred_at: OffsetDateTime,
    pub gateway_id: Option<String>,
    pub temp_id: Option<String>,
}

impl Candidate {
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.body, &self.counterparty, self.direction, self.occurred_at)
    }

    #[must_use]
    pub fn into_message(self, id: Uuid) -> Message {
        Message {
            id,
            connection_id: self.connection_id,
            counterparty: self.counterparty,
            direction: self.direction,
            body: self.body,
            status: self.status,
            occurred_at: self.occurred_at,
            gateway_id: self.gateway_id,
            temp_id: self.temp_id,
        }
    }
}

/// Derived projection of one `(connection, counterparty)` log; recomputed on
/// read, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub counterparty: String,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_at: OffsetDateTime,
    pub message_count: u64,
    pub unread_count: u64,
}

/// Content fingerprint used as the fallback duplicate signal when no shared
/// identifier exists across producers. The timestamp is floored to the second
/// to tolerate clock skew between the webhook and poll channels.
#[must_use]
pub fn fingerprint(
    body: &str,
    counterparty: &str,
    direction: Direction,
    occurred_at: OffsetDateTime,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hasher.update([0u8]);
    hasher.update(counterparty.as_bytes());
    hasher.update([0u8]);
    hasher.update(direction.as_str().as_bytes());
    hasher.update(occurred_at.unix_timestamp().to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Extracts the bare phone number from a WhatsApp JID such as
/// `5511999999999@s.whatsapp.net`. Already-bare numbers pass through.
#[must_use]
pub fn counterparty_from_jid(jid: &str) -> String {
    jid.split('@').next().unwrap_or(jid).to_string()
}
