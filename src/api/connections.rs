use crate::api::AppState;
use crate::error::Result;
use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use uuid::Uuid;

pub async fn list_connections(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let connections = state.connections.list().await?;
    Ok(Json(connections))
}

/// # Errors
/// Returns `AppError::NotFound` if the connection does not exist.
pub async fn get_connection(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse> {
    let connection = state.connections.get(id).await?;
    Ok(Json(connection))
}
