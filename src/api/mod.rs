use crate::config::Config;
use crate::services::ingest::IngestService;
use crate::services::send::SendService;
use crate::storage::{ConnectionStore, MessageStore};
use axum::body::Body;
use axum::http::Request;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub mod connections;
pub mod events;
pub mod health;
pub mod messages;
pub mod webhook;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub connections: Arc<dyn ConnectionStore>,
    pub store: Arc<dyn MessageStore>,
    pub ingest: IngestService,
    pub send_service: SendService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub store: Arc<dyn MessageStore>,
}

/// Configures and returns the primary application router.
pub fn app_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/webhook", post(webhook::receive_event))
        .route("/connections", get(connections::list_connections))
        .route("/connections/{id}", get(connections::get_connection))
        .route("/connections/{id}/conversations", get(messages::list_conversations))
        .route("/connections/{id}/conversations/{counterparty}/read", post(messages::mark_read))
        .route("/connections/{id}/messages", get(messages::list_messages).post(messages::send_message))
        .route("/events", get(events::websocket_handler));

    Router::new()
        .nest("/v1", api_routes)
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: std::time::Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::debug!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                ),
        )
        .layer(SetRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id"), MakeRequestUuid))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
