//! Collaborator interfaces for project membership, message persistence and
//! the message activity log.
//!
//! Implementations are synchronous; async callers run them on the blocking
//! pool. [`crate::db::SqliteStore`] is the bundled implementation.

use std::collections::HashSet;

use crate::db::models::{ActivityEntry, Message, NewMessage, Project, ProjectMember};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait ProjectStore: Send + Sync {
    fn get_project(&self, project_id: i64) -> Result<Option<Project>, StoreError>;

    /// Members of a project. Always includes the owner.
    fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMember>, StoreError>;

    /// Ids of every project `user_id` belongs to.
    fn projects_for_user(&self, user_id: i64) -> Result<HashSet<i64>, StoreError>;

    /// Whether the two users have at least one project in common.
    fn shares_project(&self, user_a: i64, user_b: i64) -> Result<bool, StoreError> {
        let ours = self.projects_for_user(user_a)?;
        if ours.is_empty() {
            return Ok(false);
        }
        let theirs = self.projects_for_user(user_b)?;
        Ok(!ours.is_disjoint(&theirs))
    }
}

pub trait MessageStore: Send + Sync {
    fn persist(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Remove a stored message. Used when a follow-up write for it fails.
    fn discard(&self, message_id: i64) -> Result<(), StoreError>;

    /// Project chat history, oldest first.
    fn project_history(&self, project_id: i64) -> Result<Vec<Message>, StoreError>;

    /// Direct messages exchanged between two users in either direction, oldest first.
    fn direct_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StoreError>;
}

pub trait ActivityLog: Send + Sync {
    fn record(&self, entry: &ActivityEntry) -> Result<(), StoreError>;
}
