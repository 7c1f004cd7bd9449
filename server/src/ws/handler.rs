use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::jwt;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// `projectId` selects the project room; it is fixed for the connection.
#[derive(Debug, Deserialize)]
pub struct WsConnectQuery {
    pub token: Option<String>,
    #[serde(rename = "projectId", alias = "project_id")]
    pub project_id: Option<String>,
}

impl WsConnectQuery {
    /// Room requested at upgrade time. Anything that is not a positive id
    /// means "no room".
    pub fn room_id(&self) -> Option<i64> {
        self.project_id
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
    }
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = not a member of the requested project
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// The connection token: `?token=` first, then `Authorization: Bearer`.
fn connection_token<'a>(params: &'a WsConnectQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty())
        })
}

/// GET /ws?token=JWT&projectId=ID
/// A missing token is rejected before the upgrade. A bad token or a room the
/// user may not join is upgraded then closed with the matching close code,
/// so the client is never registered with the hub.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = connection_token(&params, &headers) else {
        return ChatError::Unauthenticated.into_response();
    };

    let claims = match jwt::validate_access_token(&state.jwt_secret, token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            return ws.on_upgrade(move |socket| reject(socket, close_code, reason));
        }
    };

    let user_id = claims.sub;
    let room_id = params.room_id();

    if let Some(project_id) = room_id {
        if let Err(e) = state.gateway.authorize_room(user_id, project_id).await {
            tracing::warn!(user_id, project_id, error = %e, "Room join refused");
            return ws.on_upgrade(move |socket| {
                reject(socket, CLOSE_FORBIDDEN, "Not a member of this project")
            });
        }
    }

    tracing::info!(
        user_id,
        email = %claims.email,
        room_id = ?room_id,
        "WebSocket connection authenticated"
    );
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id, room_id))
}

/// Upgrade, then immediately close with the given code.
async fn reject(mut socket: WebSocket, code: u16, reason: &'static str) {
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(close_frame))).await;
}
