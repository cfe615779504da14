use crate::api::AppState;
use crate::error::{AppError, Result};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub body: String,
    /// Client correlation token; lets a later webhook echo reconcile with
    /// the optimistic record instead of duplicating it.
    pub temp_id: Option<String>,
}

/// Accepts a user-composed message, persists it optimistically and attempts
/// delivery.
///
/// # Errors
/// Returns `AppError::NotFound` for an unknown connection,
/// `AppError::BadRequest` for an empty body, and `AppError::Gateway` when
/// delivery fails (the message stays visible as `failed`).
pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    if request.body.trim().is_empty() {
        return Err(AppError::BadRequest("message body must not be empty".to_string()));
    }
    if request.to.trim().is_empty() {
        return Err(AppError::BadRequest("recipient must not be empty".to_string()));
    }

    let connection = state.connections.get(id).await?;
    let message = state.send_service.send(&connection, request.to.trim(), &request.body, request.temp_id).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub counterparty: Option<String>,
}

/// Conversation history in chronological order, or the connection's full
/// log when no counterparty is given.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse> {
    let messages = match params.counterparty {
        Some(counterparty) => state.store.list_by_conversation(id, &counterparty).await?,
        None => state.store.list_by_connection(id).await?,
    };
    Ok(Json(messages))
}

pub async fn list_conversations(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    let conversations = state.store.list_conversations(id).await?;
    Ok(Json(conversations))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((id, counterparty)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse> {
    let affected = state.store.mark_read(id, &counterparty).await?;
    Ok(Json(json!({ "marked": affected })))
}
