//! Client for the upstream WhatsApp gateway.
//!
//! The gateway is treated as an untrusted collaborator: at-least-once
//! delivery, variable latency, and occasionally malformed or partial
//! payloads. Every field on the wire is optional and every access is
//! defensive.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    pub gateway_id: Option<String>,
    pub timestamp: Option<OffsetDateTime>,
}

/// One chat as the gateway reports it. `last_activity` is unix seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayChat {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "remoteJid")]
    pub remote_jid: Option<String>,
    #[serde(default, alias = "updatedAt")]
    pub last_activity: Option<i64>,
}

/// One message as the gateway reports it. Timestamps are unix seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "fromMe")]
    pub from_me: Option<bool>,
    #[serde(default, alias = "remoteJid")]
    pub remote_jid: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, alias = "messageTimestamp")]
    pub timestamp: Option<i64>,
}

#[async_trait]
pub trait GatewayClient: Send + Sync + fmt::Debug {
    /// Delivers one text message through the gateway.
    async fn send_message(&self, instance: &str, to: &str, body: &str) -> Result<DeliveryReceipt>;

    /// Lists the most recently active chats of an instance.
    async fn list_recent_chats(&self, instance: &str) -> Result<Vec<GatewayChat>>;

    /// Lists the most recent messages of one chat, newest last.
    async fn list_chat_messages(&self, instance: &str, chat_id: &str, limit: usize) -> Result<Vec<GatewayMessage>>;
}

/// HTTP client against an Evolution-API-shaped gateway.
pub struct HttpGatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for HttpGatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGatewayClient").field("base_url", &self.base_url).finish_non_exhaustive()
    }
}

impl HttpGatewayClient {
    /// Builds the client with a per-request timeout.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build().map_err(|e| {
            tracing::error!(error = %e, "Failed to build gateway HTTP client");
            AppError::Internal
        })?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), api_key: api_key.to_string() })
    }

    async fn post_json(&self, path: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Gateway(format!("{path} returned {status}")));
        }

        response.json().await.map_err(|e| AppError::Gateway(format!("{path} returned malformed JSON: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: &'a str,
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    #[tracing::instrument(skip(self, body), fields(instance = %instance))]
    async fn send_message(&self, instance: &str, to: &str, body: &str) -> Result<DeliveryReceipt> {
        let payload = serde_json::to_value(SendTextRequest { number: to, text: body })
            .map_err(|e| AppError::Gateway(format!("failed to encode send payload: {e}")))?;
        let value = self.post_json(&format!("/message/sendText/{instance}"), &payload).await?;

        let gateway_id = value
            .pointer("/key/id")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        let timestamp = value
            .get("messageTimestamp")
            .and_then(unix_seconds)
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());

        Ok(DeliveryReceipt { gateway_id, timestamp })
    }

    #[tracing::instrument(skip(self), fields(instance = %instance))]
    async fn list_recent_chats(&self, instance: &str) -> Result<Vec<GatewayChat>> {
        let value = self.post_json(&format!("/chat/findChats/{instance}"), &json!({})).await?;
        Ok(collect_entries(&value))
    }

    #[tracing::instrument(skip(self), fields(instance = %instance, chat_id = %chat_id))]
    async fn list_chat_messages(&self, instance: &str, chat_id: &str, limit: usize) -> Result<Vec<GatewayMessage>> {
        let payload = json!({
            "where": { "key": { "remoteJid": chat_id } },
            "limit": limit,
        });
        let value = self.post_json(&format!("/chat/findMessages/{instance}"), &payload).await?;
        Ok(collect_entries(&value))
    }
}

/// Accepts either a bare array or an object wrapping one under common keys;
/// entries that fail to deserialize are skipped rather than failing the call.
fn collect_entries<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Vec<T> {
    let items = value
        .as_array()
        .or_else(|| value.get("records").and_then(serde_json::Value::as_array))
        .or_else(|| value.get("messages").and_then(serde_json::Value::as_array))
        .cloned()
        .unwrap_or_default();

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed gateway entry");
                None
            }
        })
        .collect()
}

/// Gateway timestamps arrive as numbers or numeric strings, in seconds.
pub(crate) fn unix_seconds(value: &serde_json::Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_entries_accepts_bare_arrays_and_wrappers() {
        let bare = json!([{"id": "a"}, {"id": "b"}]);
        let chats: Vec<GatewayChat> = collect_entries(&bare);
        assert_eq!(chats.len(), 2);

        let wrapped = json!({"records": [{"id": "a"}]});
        let chats: Vec<GatewayChat> = collect_entries(&wrapped);
        assert_eq!(chats.len(), 1);

        let garbage = json!("not a list");
        let chats: Vec<GatewayChat> = collect_entries(&garbage);
        assert!(chats.is_empty());
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let mixed = json!([{"id": "a"}, 42, {"id": "b", "updatedAt": "bogus"}]);
        let chats: Vec<GatewayChat> = collect_entries(&mixed);
        // 42 is not an object; the "bogus" timestamp fails the i64 field.
        assert_eq!(chats.len(), 1);
    }

    #[test]
    fn unix_seconds_handles_numbers_and_strings() {
        assert_eq!(unix_seconds(&json!(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(unix_seconds(&json!("1700000000")), Some(1_700_000_000));
        assert_eq!(unix_seconds(&json!({})), None);
    }
}
