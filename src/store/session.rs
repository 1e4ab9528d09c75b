//! CRUD operations over sessions, messages, and memory entries.

use chrono::{DateTime, Utc};
use libsql::{params, Builder, Connection};
use uuid::Uuid;

use crate::domain::{MemoryEntry, Message, Role, Session};

use super::{schema::SCHEMA, SessionLocks, StoreError};

pub struct Store {
    conn: Connection,
    locks: SessionLocks,
}

impl Store {
    /// Open (creating if necessary) the embedded database at `path` and
    /// apply the schema. `path` may be `:memory:` for tests.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            conn.execute(statement, ()).await?;
        }
        Ok(Self { conn, locks: SessionLocks::default() })
    }

    // ---- Sessions ----------------------------------------------------

    pub async fn create_session(
        &self,
        model: &str,
        title: Option<&str>,
        system_prompt_override: Option<&str>,
        temperature: f32,
    ) -> Result<Session, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO sessions (id, title, model, system_prompt_override, temperature, created_at, updated_at, active, archived) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 1, 0)",
                params![
                    id.to_string(),
                    title,
                    model,
                    system_prompt_override,
                    temperature as f64,
                    now.to_rfc3339(),
                ],
            )
            .await?;
        Ok(Session {
            id,
            title: title.map(str::to_string),
            model: model.to_string(),
            system_prompt_override: system_prompt_override.map(str::to_string),
            temperature,
            created_at: now,
            updated_at: now,
            active: true,
            archived: false,
            message_count: 0,
        })
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, model, system_prompt_override, temperature, created_at, updated_at, active, archived, \
                 (SELECT COUNT(*) FROM messages WHERE session_id = sessions.id) \
                 FROM sessions WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_session(row),
            None => Err(StoreError::SessionNotFound(id)),
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, model, system_prompt_override, temperature, created_at, updated_at, active, archived, \
                 (SELECT COUNT(*) FROM messages WHERE session_id = sessions.id) \
                 FROM sessions ORDER BY updated_at DESC",
                (),
            )
            .await?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(row_to_session(row)?);
        }
        Ok(sessions)
    }

    pub async fn update_session(
        &self,
        id: Uuid,
        title: Option<&str>,
        archived: Option<bool>,
    ) -> Result<Session, StoreError> {
        let _guard = self.locks.get(id).lock_owned().await;
        let now = Utc::now();
        if let Some(title) = title {
            self.conn
                .execute(
                    "UPDATE sessions SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, now.to_rfc3339(), id.to_string()],
                )
                .await?;
        }
        if let Some(archived) = archived {
            self.conn
                .execute(
                    "UPDATE sessions SET archived = ?1, updated_at = ?2 WHERE id = ?3",
                    params![archived as i64, now.to_rfc3339(), id.to_string()],
                )
                .await?;
        }
        self.get_session(id).await
    }

    /// Deletes the session and cascades its messages and memory entries
    /// (enforced by `ON DELETE CASCADE` in the schema).
    pub async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        let _guard = self.locks.get(id).lock_owned().await;
        let changed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])
            .await?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound(id));
        }
        Ok(())
    }

    // ---- Messages ------------------------------------------------------

    pub async fn append_message(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        event_type: Option<&str>,
        skill_name: Option<&str>,
        extra: Option<serde_json::Value>,
    ) -> Result<Message, StoreError> {
        let guard = self.locks.get(session_id).lock_owned().await;
        let message = self
            .append_message_locked(session_id, role, content, event_type, skill_name, extra)
            .await;
        drop(guard);
        message
    }

    async fn append_message_locked(
        &self,
        session_id: Uuid,
        role: Role,
        content: &str,
        event_type: Option<&str>,
        skill_name: Option<&str>,
        extra: Option<serde_json::Value>,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let seq = self.next_seq(session_id).await?;
        let role_str = role_to_str(role);
        let extra_str = extra.as_ref().map(|v| v.to_string());
        self.conn
            .execute(
                "INSERT INTO messages (id, session_id, role, content, created_at, seq, event_type, skill_name, extra) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    session_id.to_string(),
                    role_str,
                    content,
                    now.to_rfc3339(),
                    seq,
                    event_type,
                    skill_name,
                    extra_str,
                ],
            )
            .await?;
        self.conn
            .execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), session_id.to_string()],
            )
            .await?;
        Ok(Message {
            id,
            session_id,
            role,
            content: content.to_string(),
            created_at: now,
            seq,
            event_type: event_type.map(str::to_string),
            skill_name: skill_name.map(str::to_string),
            extra,
        })
    }

    async fn next_seq(&self, session_id: Uuid) -> Result<i64, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM messages WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await?;
        let row = rows.next().await?.expect("aggregate query always returns one row");
        Ok(row.get::<i64>(0)?)
    }

    /// Chronological (created_at, seq) message list for a session.
    pub async fn list_messages(
        &self,
        session_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut rows = if let Some(limit) = limit {
            self.conn
                .query(
                    "SELECT id, session_id, role, content, created_at, seq, event_type, skill_name, extra \
                     FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, seq ASC LIMIT ?2",
                    params![session_id.to_string(), limit],
                )
                .await?
        } else {
            self.conn
                .query(
                    "SELECT id, session_id, role, content, created_at, seq, event_type, skill_name, extra \
                     FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, seq ASC",
                    params![session_id.to_string()],
                )
                .await?
        };
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(row_to_message(row)?);
        }
        Ok(messages)
    }

    /// Delete a message by id. With `include_following = true`, every later
    /// message in the same session (by `(created_at, seq)`) is removed too,
    /// atomically with respect to other writers of the same session.
    pub async fn delete_message(&self, mid: Uuid, include_following: bool) -> Result<(), StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, created_at, seq FROM messages WHERE id = ?1",
                params![mid.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Err(StoreError::MessageNotFound(mid));
        };
        let session_id_str: String = row.get(0)?;
        let created_at: String = row.get(1)?;
        let seq: i64 = row.get(2)?;
        let session_id = Uuid::parse_str(&session_id_str).map_err(|e| StoreError::Decode(e.to_string()))?;

        let _guard = self.locks.get(session_id).lock_owned().await;
        if include_following {
            self.conn
                .execute(
                    "DELETE FROM messages WHERE session_id = ?1 AND (created_at > ?2 OR (created_at = ?2 AND seq >= ?3))",
                    params![session_id.to_string(), created_at, seq],
                )
                .await?;
        } else {
            self.conn
                .execute("DELETE FROM messages WHERE id = ?1", params![mid.to_string()])
                .await?;
        }
        Ok(())
    }

    pub async fn clear_messages(&self, session_id: Uuid) -> Result<(), StoreError> {
        let _guard = self.locks.get(session_id).lock_owned().await;
        self.conn
            .execute("DELETE FROM messages WHERE session_id = ?1", params![session_id.to_string()])
            .await?;
        Ok(())
    }

    // ---- Memory entries --------------------------------------------------

    pub async fn upsert_memory(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO memory_entries (session_id, category, key, value, expires_at) VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(session_id, category, key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![
                    entry.session_id.to_string(),
                    entry.category.clone(),
                    entry.key.clone(),
                    entry.value.clone(),
                    entry.expires_at.map(|d| d.to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn list_memories(&self, session_id: Uuid) -> Result<Vec<MemoryEntry>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, category, key, value, expires_at FROM memory_entries \
                 WHERE session_id = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![session_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(row_to_memory(row)?);
        }
        Ok(entries)
    }

    pub async fn delete_memory(&self, session_id: Uuid, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM memory_entries WHERE session_id = ?1 AND key = ?2",
                params![session_id.to_string(), key],
            )
            .await?;
        Ok(())
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn str_to_role(s: &str) -> Result<Role, StoreError> {
    match s {
        "system" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(StoreError::Decode(format!("unknown role `{other}`"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(e.to_string()))
}

fn row_to_session(row: libsql::Row) -> Result<Session, StoreError> {
    let id: String = row.get(0)?;
    let title: Option<String> = row.get(1)?;
    let model: String = row.get(2)?;
    let system_prompt_override: Option<String> = row.get(3)?;
    let temperature: f64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let active: i64 = row.get(7)?;
    let archived: i64 = row.get(8)?;
    let message_count: i64 = row.get(9)?;
    Ok(Session {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Decode(e.to_string()))?,
        title,
        model,
        system_prompt_override,
        temperature: temperature as f32,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        active: active != 0,
        archived: archived != 0,
        message_count,
    })
}

fn row_to_message(row: libsql::Row) -> Result<Message, StoreError> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let content: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let seq: i64 = row.get(5)?;
    let event_type: Option<String> = row.get(6)?;
    let skill_name: Option<String> = row.get(7)?;
    let extra: Option<String> = row.get(8)?;
    Ok(Message {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Decode(e.to_string()))?,
        session_id: Uuid::parse_str(&session_id).map_err(|e| StoreError::Decode(e.to_string()))?,
        role: str_to_role(&role)?,
        content,
        created_at: parse_timestamp(&created_at)?,
        seq,
        event_type,
        skill_name,
        extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn row_to_memory(row: libsql::Row) -> Result<MemoryEntry, StoreError> {
    let session_id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let key: String = row.get(2)?;
    let value: String = row.get(3)?;
    let expires_at: Option<String> = row.get(4)?;
    Ok(MemoryEntry {
        session_id: Uuid::parse_str(&session_id).map_err(|e| StoreError::Decode(e.to_string()))?,
        category,
        key,
        value,
        expires_at: expires_at.map(|s| parse_timestamp(&s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn store() -> Store {
        Store::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_get_delete_get_round_trip() {
        let store = store().await;
        let session = store.create_session("gpt-5.2", Some("title"), None, 0.7).await.unwrap();
        let fetched = store.get_session(session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
        store.delete_session(session.id).await.unwrap();
        assert!(matches!(
            store.get_session(session.id).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn messages_are_chronologically_ordered() {
        let store = store().await;
        let session = store.create_session("gpt-5.2", None, None, 0.7).await.unwrap();
        store.append_message(session.id, Role::User, "one", None, None, None).await.unwrap();
        store.append_message(session.id, Role::Assistant, "two", None, None, None).await.unwrap();
        store.append_message(session.id, Role::User, "three", None, None, None).await.unwrap();

        let messages = store.list_messages(session.id, None).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn delete_with_include_following_removes_tail() {
        let store = store().await;
        let session = store.create_session("gpt-5.2", None, None, 0.7).await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let m = store
                .append_message(session.id, Role::User, &format!("m{i}"), None, None, None)
                .await
                .unwrap();
            ids.push(m.id);
        }
        // delete starting at index 2 (third message) including following
        store.delete_message(ids[2], true).await.unwrap();
        let remaining = store.list_messages(session.id, None).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].content, "m0");
        assert_eq!(remaining[1].content, "m1");
    }

    #[tokio::test]
    async fn memory_entries_upsert_and_list() {
        let store = store().await;
        let session = store.create_session("gpt-5.2", None, None, 0.7).await.unwrap();
        store
            .upsert_memory(&MemoryEntry {
                session_id: session.id,
                category: "preference".into(),
                key: "units".into(),
                value: "metric".into(),
                expires_at: None,
            })
            .await
            .unwrap();
        store
            .upsert_memory(&MemoryEntry {
                session_id: session.id,
                category: "preference".into(),
                key: "units".into(),
                value: "imperial".into(),
                expires_at: None,
            })
            .await
            .unwrap();
        let entries = store.list_memories(session.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "imperial");
    }
}
