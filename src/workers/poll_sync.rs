//! Recurring synchronizer that pulls recent gateway traffic into the store.
//!
//! Each connected connection is swept independently: sweeps for different
//! connections run concurrently, but a connection never has two overlapping
//! sweeps, and a connection swept recently (webhook traffic keeps it fresh)
//! is skipped for a quiet interval. A sweep that exceeds its time budget is
//! abandoned for the cycle; the next tick retries it.

use crate::config::SyncConfig;
use crate::domain::connection::Connection;
use crate::domain::message::{
    Candidate, Direction, MessageStatus, PLACEHOLDER_BODY, counterparty_from_jid,
};
use crate::error::Result;
use crate::services::gateway::{GatewayChat, GatewayClient, GatewayMessage};
use crate::services::ingest::IngestService;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub chats_seen: usize,
    pub chats_failed: usize,
    pub merged: usize,
}

#[derive(Debug, Clone)]
pub struct PollSyncWorker {
    connections: Arc<dyn crate::storage::ConnectionStore>,
    gateway: Arc<dyn GatewayClient>,
    ingest: IngestService,
    config: SyncConfig,
    last_sweep: Arc<DashMap<Uuid, Instant>>,
    in_flight: Arc<DashMap<Uuid, ()>>,
}

impl PollSyncWorker {
    #[must_use]
    pub fn new(
        connections: Arc<dyn crate::storage::ConnectionStore>,
        gateway: Arc<dyn GatewayClient>,
        ingest: IngestService,
        config: SyncConfig,
    ) -> Self {
        Self {
            connections,
            gateway,
            ingest,
            config,
            last_sweep: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().instrument(tracing::info_span!("poll_sync_tick")).await;
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Poll synchronizer shutting down...");
    }

    /// Schedules one sweep per eligible connection. Sweeps are detached
    /// tasks; the in-flight guard prevents overlap per connection.
    pub async fn tick(&self) {
        let connections = match self.connections.list_connected().await {
            Ok(connections) => connections,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to list connections for sweep");
                return;
            }
        };

        let quiet = Duration::from_secs(self.config.quiet_secs);
        let budget = Duration::from_secs(self.config.sweep_budget_secs);

        for connection in connections {
            if self.in_flight.contains_key(&connection.id) {
                continue;
            }
            if let Some(finished) = self.last_sweep.get(&connection.id)
                && finished.elapsed() < quiet
            {
                continue;
            }

            self.in_flight.insert(connection.id, ());
            let worker = self.clone();
            let span = tracing::info_span!("sweep", connection_id = %connection.id, instance = %connection.instance);
            tokio::spawn(
                async move {
                    match tokio::time::timeout(budget, worker.sweep_connection(&connection)).await {
                        Ok(Ok(report)) => {
                            worker.last_sweep.insert(connection.id, Instant::now());
                            if report.merged > 0 || report.chats_failed > 0 {
                                tracing::info!(
                                    chats = report.chats_seen,
                                    failed = report.chats_failed,
                                    merged = report.merged,
                                    "Sweep completed"
                                );
                            }
                        }
                        Ok(Err(e)) => {
                            // Gateway unavailable for this connection; back
                            // off until the quiet interval passes.
                            worker.last_sweep.insert(connection.id, Instant::now());
                            tracing::warn!(error = ?e, "Sweep failed");
                        }
                        Err(_elapsed) => {
                            tracing::warn!("Sweep exceeded its budget and was abandoned for this cycle");
                        }
                    }
                    worker.in_flight.remove(&connection.id);
                }
                .instrument(span),
            );
        }
    }

    /// Sweeps one connection: the N most recently active chats, M most
    /// recent messages each, every message reconciled through the merge
    /// engine. A failing chat is logged and skipped; the rest of the sweep
    /// proceeds.
    ///
    /// # Errors
    /// Returns an error only when the chat listing itself fails; per-chat
    /// and per-message failures are absorbed into the report.
    pub async fn sweep_connection(&self, connection: &Connection) -> Result<SweepReport> {
        let chats = self.gateway.list_recent_chats(&connection.instance).await?;
        let chats = most_recent_chats(chats, self.config.chat_limit);

        let mut report = SweepReport { chats_seen: chats.len(), ..SweepReport::default() };

        for chat in chats {
            let Some(jid) = chat.remote_jid.as_deref().or(chat.id.as_deref()) else {
                tracing::debug!("Skipping chat without an identifier");
                continue;
            };

            let messages = match self.gateway.list_chat_messages(&connection.instance, jid, self.config.message_limit).await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(chat = %jid, error = ?e, "Chat fetch failed, continuing sweep");
                    report.chats_failed += 1;
                    continue;
                }
            };

            let counterparty = counterparty_from_jid(jid);
            for message in messages {
                let candidate = normalize(connection.id, &counterparty, message);
                match self.ingest.ingest(candidate).await {
                    Ok(outcome) if outcome.committed() => report.merged += 1,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(chat = %jid, error = ?e, "Failed to merge polled message");
                    }
                }
            }
        }

        Ok(report)
    }
}

/// Orders chats by last activity, most recent first, and bounds the sweep.
/// Chats without a usable timestamp sort last.
fn most_recent_chats(mut chats: Vec<GatewayChat>, limit: usize) -> Vec<GatewayChat> {
    chats.sort_by_key(|chat| std::cmp::Reverse(chat.last_activity.unwrap_or(i64::MIN)));
    chats.truncate(limit);
    chats
}

/// Maps one gateway message to a merge candidate, substituting defaults for
/// whatever the gateway left out.
fn normalize(connection_id: Uuid, chat_counterparty: &str, message: GatewayMessage) -> Candidate {
    let direction = if message.from_me.unwrap_or(false) { Direction::Sent } else { Direction::Received };
    let counterparty = message
        .remote_jid
        .as_deref()
        .map_or_else(|| chat_counterparty.to_string(), counterparty_from_jid);
    let occurred_at = message
        .timestamp
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    Candidate {
        connection_id,
        counterparty,
        direction,
        body: message.body.filter(|b| !b.is_empty()).unwrap_or_else(|| PLACEHOLDER_BODY.to_string()),
        status: if direction == Direction::Sent { MessageStatus::Sent } else { MessageStatus::Delivered },
        occurred_at,
        gateway_id: message.id,
        temp_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(jid: &str, last_activity: Option<i64>) -> GatewayChat {
        GatewayChat { id: None, remote_jid: Some(jid.to_string()), last_activity }
    }

    #[test]
    fn chats_are_bounded_and_ordered_by_activity() {
        let chats = vec![chat("a", Some(10)), chat("b", None), chat("c", Some(30)), chat("d", Some(20))];
        let picked = most_recent_chats(chats, 2);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].remote_jid.as_deref(), Some("c"));
        assert_eq!(picked[1].remote_jid.as_deref(), Some("d"));
    }

    #[test]
    fn normalize_fills_defaults_for_partial_messages() {
        let message = GatewayMessage { id: None, from_me: None, remote_jid: None, body: None, timestamp: None };
        let candidate = normalize(Uuid::new_v4(), "5511999999999", message);

        assert_eq!(candidate.direction, Direction::Received);
        assert_eq!(candidate.counterparty, "5511999999999");
        assert_eq!(candidate.body, PLACEHOLDER_BODY);
        assert_eq!(candidate.status, MessageStatus::Delivered);
    }

    #[test]
    fn normalize_maps_own_messages_to_sent() {
        let message = GatewayMessage {
            id: Some("GW1".to_string()),
            from_me: Some(true),
            remote_jid: Some("5511999999999@s.whatsapp.net".to_string()),
            body: Some("hello".to_string()),
            timestamp: Some(1_700_000_000),
        };
        let candidate = normalize(Uuid::new_v4(), "ignored", message);

        assert_eq!(candidate.direction, Direction::Sent);
        assert_eq!(candidate.status, MessageStatus::Sent);
        assert_eq!(candidate.counterparty, "5511999999999");
        assert_eq!(candidate.gateway_id.as_deref(), Some("GW1"));
        assert_eq!(candidate.occurred_at.unix_timestamp(), 1_700_000_000);
    }
}
