//! SQLite-backed implementation of the project, message and activity stores.

use std::collections::HashSet;
use std::sync::MutexGuard;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{
    ActivityEntry, Message, NewMessage, Project, ProjectMember, ROLE_OWNER,
};
use super::DbPool;
use crate::store::{ActivityLog, MessageStore, ProjectStore, StoreError};

const MESSAGE_COLUMNS: &str = "id, sender_id, project_id, receiver_id, content, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Create a project and enroll its owner as the first member.
    pub fn create_project(&self, name: &str, owner_id: i64) -> Result<Project, StoreError> {
        let mut conn = self.conn()?;
        let now = Utc::now();

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO projects (name, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, owner_id, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![id, owner_id, ROLE_OWNER],
        )?;
        tx.commit()?;

        Ok(Project {
            id,
            name: name.to_string(),
            owner_id,
            created_at: now,
        })
    }

    /// Add a user to a project. Adding an existing member is a no-op.
    pub fn add_member(&self, project_id: i64, user_id: i64, role: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO project_members (project_id, user_id, role) VALUES (?1, ?2, ?3)",
            params![project_id, user_id, role],
        )?;
        Ok(())
    }

    /// Activity entries recorded for a project, oldest first.
    pub fn project_activity(&self, project_id: i64) -> Result<Vec<ActivityEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, project_id, user_id, action FROM message_activity
             WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ActivityEntry {
                message_id: row.get(0)?,
                project_id: row.get(1)?,
                user_id: row.get(2)?,
                action: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        project_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

impl ProjectStore for SqliteStore {
    fn get_project(&self, project_id: i64) -> Result<Option<Project>, StoreError> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                "SELECT id, name, owner_id, created_at FROM projects WHERE id = ?1",
                params![project_id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    fn list_members(&self, project_id: i64) -> Result<Vec<ProjectMember>, StoreError> {
        let conn = self.conn()?;
        // Owner is selected from projects as well, so the list holds it even
        // if the membership row is missing.
        let mut stmt = conn.prepare(
            "SELECT user_id, role FROM project_members WHERE project_id = ?1
             UNION
             SELECT owner_id, 'owner' FROM projects
             WHERE id = ?1 AND owner_id NOT IN
                 (SELECT user_id FROM project_members WHERE project_id = ?1)",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ProjectMember {
                user_id: row.get(0)?,
                role: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn projects_for_user(&self, user_id: i64) -> Result<HashSet<i64>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT project_id FROM project_members WHERE user_id = ?1
             UNION
             SELECT id FROM projects WHERE owner_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn shares_project(&self, user_a: i64, user_b: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let shared: bool = conn.query_row(
            "WITH memberships AS (
                 SELECT project_id, user_id FROM project_members
                 UNION
                 SELECT id, owner_id FROM projects
             )
             SELECT EXISTS (
                 SELECT 1 FROM memberships a
                 JOIN memberships b ON a.project_id = b.project_id
                 WHERE a.user_id = ?1 AND b.user_id = ?2
             )",
            params![user_a, user_b],
            |row| row.get(0),
        )?;
        Ok(shared)
    }
}

impl MessageStore for SqliteStore {
    fn persist(&self, message: NewMessage) -> Result<Message, StoreError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO messages (sender_id, project_id, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.sender_id,
                message.project_id,
                message.receiver_id,
                message.content,
                now
            ],
        )?;

        Ok(Message {
            id: conn.last_insert_rowid(),
            sender_id: message.sender_id,
            content: message.content,
            project_id: message.project_id,
            receiver_id: message.receiver_id,
            created_at: now,
        })
    }

    fn discard(&self, message_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?;
        Ok(())
    }

    fn project_history(&self, project_id: i64) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![project_id], message_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn direct_history(&self, user_a: i64, user_b: i64) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE receiver_id IS NOT NULL
               AND ((sender_id = ?1 AND receiver_id = ?2)
                 OR (sender_id = ?2 AND receiver_id = ?1))
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![user_a, user_b], message_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

impl ActivityLog for SqliteStore {
    fn record(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO message_activity (message_id, project_id, user_id, action, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.message_id,
                entry.project_id,
                entry.user_id,
                entry.action,
                Utc::now()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::db::models::{ACTION_POSTED, ROLE_MEMBER};

    fn test_store() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let db = init_db(tmp.path().to_str().unwrap()).unwrap();
        (SqliteStore::new(db), tmp)
    }

    #[test]
    fn test_owner_is_always_a_member() {
        let (store, _tmp) = test_store();
        let project = store.create_project("Backend", 1).unwrap();
        store.add_member(project.id, 2, ROLE_MEMBER).unwrap();

        let mut ids: Vec<i64> = store
            .list_members(project.id)
            .unwrap()
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.get_project(project.id).unwrap().unwrap().owner_id, 1);
        assert!(store.get_project(999).unwrap().is_none());
    }

    #[test]
    fn test_shares_project() {
        let (store, _tmp) = test_store();
        let shared = store.create_project("Shared", 10).unwrap();
        store.add_member(shared.id, 20, ROLE_MEMBER).unwrap();
        store.create_project("Solo", 30).unwrap();

        assert!(store.shares_project(10, 20).unwrap());
        assert!(store.shares_project(20, 10).unwrap());
        assert!(!store.shares_project(10, 30).unwrap());
        assert!(!store.shares_project(20, 99).unwrap());
    }

    #[test]
    fn test_direct_history_is_bidirectional() {
        let (store, _tmp) = test_store();
        store.persist(NewMessage::direct(1, 2, "hi")).unwrap();
        store.persist(NewMessage::direct(2, 1, "hello")).unwrap();
        store.persist(NewMessage::direct(1, 3, "other")).unwrap();

        let history = store.direct_history(2, 1).unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hello"]);
    }

    #[test]
    fn test_project_history_and_activity() {
        let (store, _tmp) = test_store();
        let project = store.create_project("P", 1).unwrap();
        let saved = store.persist(NewMessage::project(1, project.id, "first")).unwrap();
        store
            .record(&ActivityEntry {
                message_id: saved.id,
                project_id: project.id,
                user_id: 1,
                action: ACTION_POSTED.to_string(),
            })
            .unwrap();

        let history = store.project_history(project.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, saved.id);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[0].receiver_id, None);
        assert_eq!(store.project_activity(project.id).unwrap().len(), 1);
    }

    #[test]
    fn test_discard_removes_message() {
        let (store, _tmp) = test_store();
        let project = store.create_project("P", 1).unwrap();
        let kept = store.persist(NewMessage::project(1, project.id, "kept")).unwrap();
        let dropped = store.persist(NewMessage::project(1, project.id, "dropped")).unwrap();

        store.discard(dropped.id).unwrap();
        // Unknown ids are a no-op
        store.discard(dropped.id).unwrap();

        let ids: Vec<i64> = store
            .project_history(project.id)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![kept.id]);
    }
}
