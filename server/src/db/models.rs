/// Row types shared by the store traits and the SQLite implementation.
/// These correspond to the schema defined in migrations.rs.
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Project record. Only the fields the chat path needs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Role given to the project creator
pub const ROLE_OWNER: &str = "owner";
/// Default role for added members
pub const ROLE_MEMBER: &str = "member";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectMember {
    pub user_id: i64,
    pub role: String,
}

/// A message about to be persisted. Exactly one of `project_id` and
/// `receiver_id` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub sender_id: i64,
    pub project_id: Option<i64>,
    pub receiver_id: Option<i64>,
    pub content: String,
}

impl NewMessage {
    pub fn project(sender_id: i64, project_id: i64, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            project_id: Some(project_id),
            receiver_id: None,
            content: content.into(),
        }
    }

    pub fn direct(sender_id: i64, receiver_id: i64, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            project_id: None,
            receiver_id: Some(receiver_id),
            content: content.into(),
        }
    }
}

/// A stored message, as sent to clients in the `data` field of chat events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Action recorded when a project message is posted
pub const ACTION_POSTED: &str = "POSTED";

/// Entry in the project message activity log
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub message_id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub action: String,
}
