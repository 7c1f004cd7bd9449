//! REST endpoints for sending chat messages and reading history.
//! Sends go through the same gateway as WebSocket intents.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::Claims;
use crate::db::models::Message;
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// POST /api/projects/{id}/messages
pub async fn send_project_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let saved = state
        .gateway
        .send_project_message(claims.sub, project_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/projects/{id}/messages
pub async fn project_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let history = state.gateway.project_history(claims.sub, project_id).await?;
    Ok(Json(history))
}

/// POST /api/messages/direct/{receiver_id}
pub async fn send_direct_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(receiver_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ChatError> {
    let saved = state
        .gateway
        .send_direct_message(claims.sub, receiver_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// GET /api/messages/direct/{other_id}
pub async fn direct_history(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<i64>,
) -> Result<Json<Vec<Message>>, ChatError> {
    let history = state.gateway.direct_history(claims.sub, other_id).await?;
    Ok(Json(history))
}
