//! Inbound event endpoint invoked by the upstream gateway.
//!
//! The envelope schema belongs to the gateway, not to us, and it drifts:
//! extraction is defensive throughout, and the handler acknowledges with 200
//! even when the event is intentionally ignored. Rejecting risks the gateway
//! disabling the webhook subscription; only an internal store failure is
//! allowed to surface as 500.

use crate::api::AppState;
use crate::domain::connection::Connection;
use crate::domain::message::{Candidate, Direction, MessageStatus, PLACEHOLDER_BODY, counterparty_from_jid};
use crate::error::{AppError, Result};
use crate::services::broadcast::StreamEvent;
use crate::services::gateway::unix_seconds;
use crate::services::ingest::IngestOutcome;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

pub async fn receive_event(State(state): State<AppState>, Json(envelope): Json<Value>) -> Result<impl IntoResponse> {
    let event = envelope.get("event").and_then(Value::as_str).unwrap_or_default();

    let Some(instance) = envelope.get("instance").and_then(Value::as_str) else {
        tracing::warn!("Webhook event without an instance, acknowledging and dropping");
        return Ok(ignored());
    };

    let connection = match state.connections.get_by_instance(instance).await {
        Ok(connection) => connection,
        Err(AppError::NotFound) => {
            tracing::warn!(instance = %instance, "Webhook event for unknown instance");
            return Ok(ignored());
        }
        Err(e) => return Err(e),
    };

    let data = envelope.get("data").unwrap_or(&Value::Null);

    match event {
        "messages.upsert" | "send.message" => {
            let Some(candidate) = normalize_message(connection.id, data) else {
                tracing::warn!(instance = %instance, "Webhook message without a counterparty, dropping");
                return Ok(ignored());
            };

            let outcome = state.ingest.ingest(candidate).await?;
            let label = match outcome {
                IngestOutcome::Inserted(_) => "inserted",
                IngestOutcome::Replaced(_) => "replaced",
                IngestOutcome::Ignored(_) => "ignored",
            };
            Ok(Json(json!({ "outcome": label })))
        }
        "messages.update" => apply_status_update(&state, &connection, data).await,
        other => {
            tracing::debug!(event = %other, "Unhandled webhook event type");
            Ok(ignored())
        }
    }
}

fn ignored() -> Json<Value> {
    Json(json!({ "outcome": "ignored" }))
}

async fn apply_status_update(state: &AppState, connection: &Connection, data: &Value) -> Result<Json<Value>> {
    let gateway_id = data.pointer("/key/id").or_else(|| data.get("id")).and_then(Value::as_str);
    let status = data.get("status").and_then(Value::as_str).map(delivery_status);

    let (Some(gateway_id), Some(status)) = (gateway_id, status) else {
        return Ok(ignored());
    };

    match state.store.update_status_by_gateway_id(connection.id, gateway_id, status).await? {
        Some(message) => {
            state.ingest.broadcaster().publish(StreamEvent::StatusChanged {
                id: message.id,
                connection_id: message.connection_id,
                counterparty: message.counterparty.clone(),
                status: message.status,
            });
            Ok(Json(json!({ "outcome": "updated" })))
        }
        None => Ok(ignored()),
    }
}

/// Maps one webhook message payload to a merge candidate. Returns `None`
/// only when no counterparty can be extracted at all; everything else gets a
/// defensive default.
fn normalize_message(connection_id: Uuid, data: &Value) -> Option<Candidate> {
    let remote_jid = data
        .pointer("/key/remoteJid")
        .or_else(|| data.get("remoteJid"))
        .and_then(Value::as_str)?;

    let from_me = data.pointer("/key/fromMe").and_then(Value::as_bool).unwrap_or(false);
    let direction = if from_me { Direction::Sent } else { Direction::Received };

    let occurred_at = data
        .get("messageTimestamp")
        .and_then(unix_seconds)
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    Some(Candidate {
        connection_id,
        counterparty: counterparty_from_jid(remote_jid),
        direction,
        body: extract_body(data).unwrap_or_else(|| PLACEHOLDER_BODY.to_string()),
        status: if from_me { MessageStatus::Sent } else { MessageStatus::Delivered },
        occurred_at,
        gateway_id: data.pointer("/key/id").and_then(Value::as_str).map(ToString::to_string),
        temp_id: data.get("tempId").and_then(Value::as_str).map(ToString::to_string),
    })
}

/// Text lives in different places depending on the message kind.
fn extract_body(data: &Value) -> Option<String> {
    let message = data.get("message")?;
    message
        .get("conversation")
        .or_else(|| message.pointer("/extendedTextMessage/text"))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

fn delivery_status(raw: &str) -> MessageStatus {
    match raw {
        "SERVER_ACK" | "PENDING" => MessageStatus::Sent,
        "ERROR" => MessageStatus::Failed,
        _ => MessageStatus::Delivered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_a_complete_upsert() {
        let data = json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": false, "id": "GW1" },
            "message": { "conversation": "Hi there" },
            "messageTimestamp": 1_700_000_000,
        });

        let candidate = normalize_message(Uuid::new_v4(), &data).unwrap();
        assert_eq!(candidate.counterparty, "5511999999999");
        assert_eq!(candidate.direction, Direction::Received);
        assert_eq!(candidate.body, "Hi there");
        assert_eq!(candidate.status, MessageStatus::Delivered);
        assert_eq!(candidate.gateway_id.as_deref(), Some("GW1"));
        assert_eq!(candidate.occurred_at.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_body_and_timestamp_get_defaults() {
        let data = json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net" },
        });

        let before = OffsetDateTime::now_utc();
        let candidate = normalize_message(Uuid::new_v4(), &data).unwrap();
        assert_eq!(candidate.body, PLACEHOLDER_BODY);
        assert!(candidate.occurred_at >= before);
    }

    #[test]
    fn extended_text_and_echoed_temp_id_are_picked_up() {
        let data = json!({
            "key": { "remoteJid": "5511999999999@s.whatsapp.net", "fromMe": true, "id": "999" },
            "message": { "extendedTextMessage": { "text": "Hello" } },
            "tempId": "abc123",
        });

        let candidate = normalize_message(Uuid::new_v4(), &data).unwrap();
        assert_eq!(candidate.direction, Direction::Sent);
        assert_eq!(candidate.status, MessageStatus::Sent);
        assert_eq!(candidate.body, "Hello");
        assert_eq!(candidate.temp_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn no_counterparty_means_no_candidate() {
        let data = json!({ "message": { "conversation": "orphan" } });
        assert!(normalize_message(Uuid::new_v4(), &data).is_none());
    }

    #[test]
    fn delivery_status_mapping() {
        assert_eq!(delivery_status("SERVER_ACK"), MessageStatus::Sent);
        assert_eq!(delivery_status("DELIVERY_ACK"), MessageStatus::Delivered);
        assert_eq!(delivery_status("READ"), MessageStatus::Delivered);
        assert_eq!(delivery_status("ERROR"), MessageStatus::Failed);
    }
}
