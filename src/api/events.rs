use crate::api::AppState;
use crate::services::broadcast::StreamEvent;
use axum::extract::{
    State,
    ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

/// Optional client hint narrowing the stream to one connection. Clients may
/// also just receive everything and filter locally.
#[derive(Debug, Deserialize)]
struct ClientHint {
    #[serde(rename = "type")]
    kind: String,
    connection_id: Option<Uuid>,
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let span = tracing::info_span!("events_session", session_id = %Uuid::new_v4());

    async move {
        tracing::info!("Events client connected");

        let mut rx = state.ingest.broadcaster().subscribe();
        let mut shutdown_rx = state.shutdown_rx.clone();
        let (mut ws_sink, mut ws_stream) = socket.split();
        let mut filter: Option<Uuid> = None;

        loop {
            if *shutdown_rx.borrow() {
                let _ = ws_sink
                    .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                msg = ws_stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ClientHint>(&text) {
                                Ok(hint) if hint.kind == "subscribe" => {
                                    tracing::debug!(connection_id = ?hint.connection_id, "Client updated its filter");
                                    filter = hint.connection_id;
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::debug!(error = %e, "Ignoring malformed client message");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if filter.is_some_and(|id| id != event.connection_id()) {
                                continue;
                            }
                            if !forward(&mut ws_sink, &event).await {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            // No replay by design; the client catches up via
                            // its own fetch.
                            tracing::warn!(missed, "Events client lagged, dropping missed events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        let _ = ws_sink.close().await;
        tracing::info!("Events client disconnected");
    }
    .instrument(span)
    .await;
}

async fn forward(
    ws_sink: &mut (impl SinkExt<WsMessage> + Unpin),
    event: &StreamEvent,
) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => ws_sink.send(WsMessage::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode stream event");
            true
        }
    }
}
