//! Outbound payloads. The hub treats these as opaque bytes.

use bytes::Bytes;
use serde::Serialize;

use crate::db::models::Message;

pub const NEW_PROJECT_MESSAGE: &str = "new_project_message";
pub const NEW_DIRECT_MESSAGE: &str = "new_direct_message";
pub const ERROR: &str = "error";
pub const SERVER_SHUTDOWN: &str = "server_shutdown";

#[derive(Serialize)]
struct Event<'a, T> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: T,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    error: &'a str,
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(value).map(Bytes::from)
}

/// `{"type":"new_project_message","data":<message>}`
pub fn new_project_message(message: &Message) -> Result<Bytes, serde_json::Error> {
    encode(&Event {
        kind: NEW_PROJECT_MESSAGE,
        data: message,
    })
}

/// `{"type":"new_direct_message","data":<message>}`
pub fn new_direct_message(message: &Message) -> Result<Bytes, serde_json::Error> {
    encode(&Event {
        kind: NEW_DIRECT_MESSAGE,
        data: message,
    })
}

/// `{"type":"error","error":<message>}`, sent only to the offending connection.
pub fn error_frame(message: &str) -> Result<Bytes, serde_json::Error> {
    encode(&ErrorFrame {
        kind: ERROR,
        error: message,
    })
}

pub fn server_shutdown() -> Bytes {
    Bytes::from_static(br#"{"type":"server_shutdown"}"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_project_event_shape() {
        let message = Message {
            id: 7,
            sender_id: 1,
            content: "hello".to_string(),
            project_id: Some(3),
            receiver_id: None,
            created_at: Utc::now(),
        };
        let bytes = new_project_message(&message).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["type"], NEW_PROJECT_MESSAGE);
        assert_eq!(value["data"]["id"], 7);
        assert_eq!(value["data"]["project_id"], 3);
        assert!(value["data"].get("receiver_id").is_none());
    }

    #[test]
    fn test_error_frame_shape() {
        let bytes = error_frame("no shared project").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"], "no shared project");
    }
}
