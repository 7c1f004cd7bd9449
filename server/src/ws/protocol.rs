use axum::extract::ws::Message;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::chat::events;
use crate::error::ChatError;
use crate::state::AppState;

pub const PROJECT_CHAT: &str = "project_chat";
pub const DIRECT_MESSAGE: &str = "direct_message";

/// Inbound frame as it arrives on the wire.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(rename = "type")]
    kind: String,
    project_id: Option<i64>,
    receiver_id: Option<i64>,
    #[serde(default)]
    content: String,
}

/// A decoded chat intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ProjectChat { project_id: i64, content: String },
    DirectMessage { receiver_id: i64, content: String },
    /// Unrecognised `type`; logged and ignored.
    Unknown(String),
}

pub fn parse_intent(data: &[u8]) -> Result<Intent, ChatError> {
    let frame: IncomingFrame = serde_json::from_slice(data)
        .map_err(|_| ChatError::InvalidRequest("invalid JSON format".to_string()))?;

    match frame.kind.as_str() {
        PROJECT_CHAT => {
            let project_id = frame.project_id.ok_or_else(|| {
                ChatError::InvalidRequest("project_id is required".to_string())
            })?;
            Ok(Intent::ProjectChat {
                project_id,
                content: frame.content,
            })
        }
        DIRECT_MESSAGE => {
            let receiver_id = frame.receiver_id.ok_or_else(|| {
                ChatError::InvalidRequest("receiver_id is required".to_string())
            })?;
            Ok(Intent::DirectMessage {
                receiver_id,
                content: frame.content,
            })
        }
        _ => Ok(Intent::Unknown(frame.kind)),
    }
}

/// Handle one inbound data frame from an authenticated connection.
/// Failures are reported back on `tx` only; nothing reaches other clients.
pub async fn handle_frame(
    data: &[u8],
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    user_id: i64,
) {
    let intent = match parse_intent(data) {
        Ok(intent) => intent,
        Err(e) => {
            tracing::debug!(user_id, error = %e, "Rejected inbound frame");
            send_error(tx, &e);
            return;
        }
    };

    let result = match intent {
        Intent::ProjectChat {
            project_id,
            content,
        } => state
            .gateway
            .send_project_message(user_id, project_id, &content)
            .await
            .map(|_| ()),
        Intent::DirectMessage {
            receiver_id,
            content,
        } => state
            .gateway
            .send_direct_message(user_id, receiver_id, &content)
            .await
            .map(|_| ()),
        Intent::Unknown(kind) => {
            tracing::debug!(user_id, kind = %kind, "Unknown message type");
            return;
        }
    };

    if let Err(e) = result {
        send_error(tx, &e);
    }
}

/// Send an error frame to this connection only.
pub fn send_error(tx: &mpsc::UnboundedSender<Message>, error: &ChatError) {
    if let Ok(frame) = events::error_frame(&error.to_string()) {
        let text = String::from_utf8_lossy(&frame).into_owned();
        let _ = tx.send(Message::Text(text.into()));
    }
}
