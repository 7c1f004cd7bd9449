//! Integration tests for the chat gateway: authorization, persistence
//! ordering, and delivery through a live hub.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::mpsc;

use huddle_server::chat::ChatGateway;
use huddle_server::db::models::{
    ActivityEntry, Message, NewMessage, Project, ProjectMember, ROLE_MEMBER, ROLE_OWNER,
};
use huddle_server::db::{init_db, SqliteStore};
use huddle_server::error::ChatError;
use huddle_server::hub::{Client, Hub};
use huddle_server::store::{ActivityLog, MessageStore, ProjectStore, StoreError};

#[derive(Default)]
struct FakeProjects {
    /// project id -> (owner, members)
    projects: HashMap<i64, (i64, Vec<i64>)>,
}

impl FakeProjects {
    fn with_project(mut self, id: i64, owner: i64, members: &[i64]) -> Self {
        self.projects.insert(id, (owner, members.to_vec()));
        self
    }
}

impl ProjectStore for FakeProjects {
    fn get_project(&self, project_id: i64) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(&project_id).map(|(owner, _)| Project {
            id: project_id,
            name: format!("project-{project_id}"),
            owner_id: *owner,
            created_at: Utc::now(),
        }))
    }

    fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMember>, StoreError> {
        let Some((owner, members)) = self.projects.get(&project_id) else {
            return Ok(Vec::new());
        };
        let mut out = vec![ProjectMember {
            user_id: *owner,
            role: ROLE_OWNER.to_string(),
        }];
        out.extend(members.iter().map(|id| ProjectMember {
            user_id: *id,
            role: ROLE_MEMBER.to_string(),
        }));
        Ok(out)
    }

    fn projects_for_user(&self, user_id: i64) -> Result<HashSet<i64>, StoreError> {
        Ok(self
            .projects
            .iter()
            .filter(|(_, (owner, members))| *owner == user_id || members.contains(&user_id))
            .map(|(id, _)| *id)
            .collect())
    }
}

#[derive(Default)]
struct FakeMessages {
    saved: Mutex<Vec<Message>>,
    fail: AtomicBool,
}

impl MessageStore for FakeMessages {
    fn persist(&self, message: NewMessage) -> Result<Message, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        let mut saved = self.saved.lock().unwrap();
        let stored = Message {
            id: saved.len() as i64 + 1,
            sender_id: message.sender_id,
            content: message.content,
            project_id: message.project_id,
            receiver_id: message.receiver_id,
            created_at: Utc::now(),
        };
        saved.push(stored.clone());
        Ok(stored)
    }

    fn discard(&self, message_id: i64) -> Result<(), StoreError> {
        self.saved.lock().unwrap().retain(|m| m.id != message_id);
        Ok(())
    }

    fn project_history(&self, project_id: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.project_id == Some(project_id))
            .cloned()
            .collect())
    }

    fn direct_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|m| match m.receiver_id {
                Some(r) => {
                    (m.sender_id == user_a && r == user_b) || (m.sender_id == user_b && r == user_a)
                }
                None => false,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct FakeActivity {
    entries: Mutex<Vec<ActivityEntry>>,
    fail: AtomicBool,
}

impl ActivityLog for FakeActivity {
    fn record(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("activity log offline".to_string()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

struct Harness {
    gateway: ChatGateway,
    hub: Hub,
    messages: Arc<FakeMessages>,
    activity: Arc<FakeActivity>,
}

/// Project 1: owner 1, members 2 and 3. Project 2: owner 4, member 5.
fn harness() -> Harness {
    let projects = Arc::new(
        FakeProjects::default()
            .with_project(1, 1, &[2, 3])
            .with_project(2, 4, &[5]),
    );
    let messages = Arc::new(FakeMessages::default());
    let activity = Arc::new(FakeActivity::default());
    let (hub, _handle) = Hub::spawn();
    let gateway = ChatGateway::new(projects, messages.clone(), activity.clone(), hub.clone());
    Harness {
        gateway,
        hub,
        messages,
        activity,
    }
}

async fn connect(hub: &Hub, user_id: i64, room_id: Option<i64>) -> mpsc::Receiver<Bytes> {
    let (client, rx) = Client::new(user_id, room_id, 16);
    hub.register(client).await.unwrap();
    rx
}

fn decode(payload: Bytes) -> serde_json::Value {
    serde_json::from_slice(&payload).unwrap()
}

fn assert_nothing_queued(rx: &mut mpsc::Receiver<Bytes>) {
    assert!(rx.try_recv().is_err(), "expected no delivery");
}

#[tokio::test]
async fn test_project_message_reaches_room_members() {
    let h = harness();
    let mut owner = connect(&h.hub, 1, Some(1)).await;
    let mut member = connect(&h.hub, 2, Some(1)).await;
    let mut elsewhere = connect(&h.hub, 4, Some(2)).await;

    let saved = h.gateway.send_project_message(2, 1, "standup in 5").await.unwrap();
    assert_eq!(saved.project_id, Some(1));

    for rx in [&mut owner, &mut member] {
        let event = decode(rx.try_recv().unwrap());
        assert_eq!(event["type"], "new_project_message");
        assert_eq!(event["data"]["content"], "standup in 5");
        assert_eq!(event["data"]["sender_id"], 2);
    }
    assert_nothing_queued(&mut elsewhere);

    let entries = h.activity.entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message_id, saved.id);
    assert_eq!(entries[0].action, "POSTED");
}

#[tokio::test]
async fn test_non_member_cannot_post_to_project() {
    let h = harness();
    let mut member = connect(&h.hub, 2, Some(1)).await;

    let err = h.gateway.send_project_message(5, 1, "hello?").await.unwrap_err();
    assert!(matches!(err, ChatError::Unauthorized(_)), "got {err:?}");

    assert_nothing_queued(&mut member);
    assert!(h.messages.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let h = harness();
    let err = h.gateway.send_project_message(1, 99, "hi").await.unwrap_err();
    assert!(matches!(err, ChatError::NotFound), "got {err:?}");
}

#[tokio::test]
async fn test_persistence_failure_skips_broadcast() {
    let h = harness();
    let mut member = connect(&h.hub, 2, Some(1)).await;
    h.messages.fail.store(true, Ordering::SeqCst);

    let err = h.gateway.send_project_message(1, 1, "lost").await.unwrap_err();
    assert!(matches!(err, ChatError::PersistenceFailure(_)), "got {err:?}");
    assert_nothing_queued(&mut member);
    assert!(h.activity.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_activity_failure_skips_broadcast() {
    let h = harness();
    let mut member = connect(&h.hub, 2, Some(1)).await;
    h.activity.fail.store(true, Ordering::SeqCst);

    let err = h.gateway.send_project_message(1, 1, "half done").await.unwrap_err();
    assert!(matches!(err, ChatError::PersistenceFailure(_)), "got {err:?}");
    assert_nothing_queued(&mut member);

    // The message must not outlive its missing activity entry.
    assert!(h.messages.saved.lock().unwrap().is_empty());
    h.activity.fail.store(false, Ordering::SeqCst);
    assert!(h.gateway.project_history(1, 1).await.unwrap().is_empty());
    assert!(h.activity.entries.lock().unwrap().is_empty());

    // A retry stores exactly one copy.
    h.gateway.send_project_message(1, 1, "half done").await.unwrap();
    assert_eq!(h.gateway.project_history(1, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_direct_message_delivered_to_both_sides() {
    let h = harness();
    let mut sender = connect(&h.hub, 2, None).await;
    let mut receiver = connect(&h.hub, 3, Some(1)).await;
    let mut bystander = connect(&h.hub, 1, Some(1)).await;

    let saved = h.gateway.send_direct_message(2, 3, "lunch?").await.unwrap();
    assert_eq!(saved.receiver_id, Some(3));

    for rx in [&mut receiver, &mut sender] {
        let event = decode(rx.try_recv().unwrap());
        assert_eq!(event["type"], "new_direct_message");
        assert_eq!(event["data"]["receiver_id"], 3);
        assert_eq!(event["data"]["content"], "lunch?");
    }
    assert_nothing_queued(&mut bystander);
}

#[tokio::test]
async fn test_direct_message_requires_shared_project() {
    let h = harness();
    let mut receiver = connect(&h.hub, 5, None).await;

    let err = h.gateway.send_direct_message(2, 5, "hey").await.unwrap_err();
    match err {
        ChatError::Unauthorized(reason) => assert_eq!(reason, "no shared project"),
        other => panic!("expected Unauthorized, got {other:?}"),
    }
    assert_nothing_queued(&mut receiver);
    assert!(h.messages.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_message_to_offline_user_is_still_stored() {
    let h = harness();
    let saved = h.gateway.send_direct_message(1, 3, "read later").await.unwrap();
    let history = h.gateway.direct_history(3, 1).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, saved.id);
}

#[tokio::test]
async fn test_empty_and_oversized_content_rejected() {
    let h = harness();
    let gateway = h.gateway.clone().with_max_message_len(5);

    let err = gateway.send_project_message(1, 1, "   ").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidRequest(_)), "got {err:?}");

    let err = gateway.send_direct_message(1, 2, "too long").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidRequest(_)), "got {err:?}");

    assert!(h.messages.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_project_history_members_only() {
    let h = harness();
    h.gateway.send_project_message(1, 1, "first").await.unwrap();
    h.gateway.send_project_message(3, 1, "second").await.unwrap();

    let history = h.gateway.project_history(2, 1).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["first", "second"]);

    let err = h.gateway.project_history(5, 1).await.unwrap_err();
    assert!(matches!(err, ChatError::Unauthorized(_)), "got {err:?}");
}

#[tokio::test]
async fn test_authorize_room() {
    let h = harness();
    assert!(h.gateway.authorize_room(1, 1).await.is_ok());
    assert!(h.gateway.authorize_room(3, 1).await.is_ok());
    assert!(h.gateway.authorize_room(4, 1).await.is_err());
    assert!(matches!(
        h.gateway.authorize_room(1, 42).await,
        Err(ChatError::NotFound)
    ));
}

#[tokio::test]
async fn test_send_after_hub_stop_still_persists() {
    let h = harness();
    let mut member = connect(&h.hub, 2, Some(1)).await;
    h.hub.stop().await;

    let saved = h.gateway.send_project_message(1, 1, "late").await.unwrap();
    assert_eq!(saved.content, "late");

    // The stopped hub closed every queue; nothing new arrives.
    let next = tokio::time::timeout(Duration::from_millis(100), member.recv()).await;
    assert!(matches!(next, Ok(None)), "got {next:?}");
}

/// SQLite store with one project: owner 1, member 2.
fn sqlite_store() -> (SqliteStore, i64, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let db = init_db(tmp.path().to_str().unwrap()).unwrap();
    let store = SqliteStore::new(db);
    let project = store.create_project("Backend", 1).unwrap();
    store.add_member(project.id, 2, ROLE_MEMBER).unwrap();
    (store, project.id, tmp)
}

#[tokio::test]
async fn test_sqlite_project_message_records_activity() {
    let (store, project_id, _tmp) = sqlite_store();
    let shared = Arc::new(store.clone());
    let (hub, _handle) = Hub::spawn();
    let gateway = ChatGateway::new(shared.clone(), shared.clone(), shared, hub);

    let saved = gateway.send_project_message(2, project_id, "deploy done").await.unwrap();

    let activity = store.project_activity(project_id).unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].message_id, saved.id);
    assert_eq!(activity[0].user_id, 2);
    assert_eq!(activity[0].action, "POSTED");
}

#[tokio::test]
async fn test_sqlite_activity_failure_leaves_no_message() {
    let (store, project_id, _tmp) = sqlite_store();
    let activity = Arc::new(FakeActivity::default());
    activity.fail.store(true, Ordering::SeqCst);
    let shared = Arc::new(store.clone());
    let (hub, _handle) = Hub::spawn();
    let gateway = ChatGateway::new(shared.clone(), shared, activity, hub);

    let err = gateway.send_project_message(1, project_id, "orphan").await.unwrap_err();
    assert!(matches!(err, ChatError::PersistenceFailure(_)), "got {err:?}");

    assert!(store.project_history(project_id).unwrap().is_empty());
    assert!(store.project_activity(project_id).unwrap().is_empty());
}
