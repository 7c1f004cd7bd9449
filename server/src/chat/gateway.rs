//! Authorization gateway in front of the hub.
//!
//! Every chat intent is checked against project membership, persisted, and
//! only then handed to the hub. Any failure before dispatch leaves the hub
//! untouched.

use std::sync::Arc;

use crate::chat::events;
use crate::db::models::{ActivityEntry, Message, NewMessage, Project, ACTION_POSTED};
use crate::error::ChatError;
use crate::hub::Hub;
use crate::store::{ActivityLog, MessageStore, ProjectStore, StoreError};

/// Longest accepted message, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4000;

#[derive(Clone)]
pub struct ChatGateway {
    projects: Arc<dyn ProjectStore>,
    messages: Arc<dyn MessageStore>,
    activity: Arc<dyn ActivityLog>,
    hub: Hub,
    max_message_len: usize,
}

impl ChatGateway {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        messages: Arc<dyn MessageStore>,
        activity: Arc<dyn ActivityLog>,
        hub: Hub,
    ) -> Self {
        Self {
            projects,
            messages,
            activity,
            hub,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Post to a project room. The sender must be a member of the project.
    ///
    /// The message and its activity record are both written before the room
    /// broadcast. If the activity write fails the message is discarded again
    /// and nothing is broadcast.
    pub async fn send_project_message(
        &self,
        sender_id: i64,
        project_id: i64,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.validate_content(content)?;
        let content = content.to_string();
        let projects = self.projects.clone();
        let messages = self.messages.clone();
        let activity = self.activity.clone();

        let saved = run_blocking(move || {
            ensure_member(projects.as_ref(), project_id, sender_id)?;

            let saved = messages
                .persist(NewMessage::project(sender_id, project_id, content))
                .map_err(ChatError::PersistenceFailure)?;

            let entry = ActivityEntry {
                message_id: saved.id,
                project_id,
                user_id: sender_id,
                action: ACTION_POSTED.to_string(),
            };
            if let Err(e) = activity.record(&entry) {
                // A message without its activity entry must not stay visible.
                tracing::error!(
                    message_id = saved.id,
                    project_id,
                    error = %e,
                    "Activity log write failed, discarding message"
                );
                if let Err(discard_err) = messages.discard(saved.id) {
                    tracing::error!(
                        message_id = saved.id,
                        error = %discard_err,
                        "Failed to discard unrecorded message"
                    );
                }
                return Err(ChatError::PersistenceFailure(e));
            }

            Ok(saved)
        })
        .await
        .inspect_err(|e| log_rejection("project_chat", sender_id, e))?;

        match events::new_project_message(&saved) {
            Ok(payload) => {
                let delivered = self.hub.broadcast_to_room(project_id, payload);
                tracing::debug!(
                    message_id = saved.id,
                    project_id,
                    delivered,
                    "Project message dispatched"
                );
            }
            Err(e) => {
                tracing::error!(message_id = saved.id, error = %e, "Failed to encode project message");
            }
        }

        Ok(saved)
    }

    /// Send a direct message. Sender and receiver must share a project.
    ///
    /// Delivered to the receiver and echoed to the sender's own connection.
    pub async fn send_direct_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<Message, ChatError> {
        self.validate_content(content)?;
        let content = content.to_string();
        let projects = self.projects.clone();
        let messages = self.messages.clone();

        let saved = run_blocking(move || {
            let shared = projects
                .shares_project(sender_id, receiver_id)
                .map_err(ChatError::StoreUnavailable)?;
            if !shared {
                return Err(ChatError::Unauthorized("no shared project".to_string()));
            }

            messages
                .persist(NewMessage::direct(sender_id, receiver_id, content))
                .map_err(ChatError::PersistenceFailure)
        })
        .await
        .inspect_err(|e| log_rejection("direct_message", sender_id, e))?;

        match events::new_direct_message(&saved) {
            Ok(payload) => {
                self.hub.send_to_user(receiver_id, payload.clone());
                if sender_id != receiver_id {
                    self.hub.send_to_user(sender_id, payload);
                }
            }
            Err(e) => {
                tracing::error!(message_id = saved.id, error = %e, "Failed to encode direct message");
            }
        }

        Ok(saved)
    }

    /// Check that `user_id` may join the room of `project_id`.
    pub async fn authorize_room(&self, user_id: i64, project_id: i64) -> Result<(), ChatError> {
        let projects = self.projects.clone();
        run_blocking(move || ensure_member(projects.as_ref(), project_id, user_id).map(|_| ()))
            .await
    }

    /// Project chat history, oldest first. Members only.
    pub async fn project_history(
        &self,
        requester_id: i64,
        project_id: i64,
    ) -> Result<Vec<Message>, ChatError> {
        let projects = self.projects.clone();
        let messages = self.messages.clone();
        run_blocking(move || {
            ensure_member(projects.as_ref(), project_id, requester_id)?;
            messages
                .project_history(project_id)
                .map_err(ChatError::StoreUnavailable)
        })
        .await
    }

    /// The requester's conversation with `other_id`, oldest first.
    pub async fn direct_history(
        &self,
        requester_id: i64,
        other_id: i64,
    ) -> Result<Vec<Message>, ChatError> {
        let messages = self.messages.clone();
        run_blocking(move || {
            messages
                .direct_history(requester_id, other_id)
                .map_err(ChatError::StoreUnavailable)
        })
        .await
    }

    fn validate_content(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidRequest(
                "message content is empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_len {
            return Err(ChatError::InvalidRequest(format!(
                "message exceeds {} characters",
                self.max_message_len
            )));
        }
        Ok(())
    }
}

/// Resolve the project and confirm `user_id` is on its member list.
fn ensure_member(
    projects: &dyn ProjectStore,
    project_id: i64,
    user_id: i64,
) -> Result<Project, ChatError> {
    let project = projects
        .get_project(project_id)
        .map_err(ChatError::StoreUnavailable)?
        .ok_or(ChatError::NotFound)?;

    let members = projects
        .list_members(project_id)
        .map_err(ChatError::StoreUnavailable)?;
    if !members.iter().any(|m| m.user_id == user_id) {
        return Err(ChatError::Unauthorized(
            "not a member of this project".to_string(),
        ));
    }

    Ok(project)
}

async fn run_blocking<T, F>(f: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::StoreUnavailable(StoreError::Unavailable(e.to_string())))?
}

fn log_rejection(kind: &str, sender_id: i64, error: &ChatError) {
    match error {
        ChatError::PersistenceFailure(_) | ChatError::StoreUnavailable(_) => {
            tracing::error!(kind, sender_id, error = %error, "Chat message failed");
        }
        _ => {
            tracing::warn!(kind, sender_id, error = %error, "Chat message rejected");
        }
    }
}
