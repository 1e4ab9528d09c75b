//! Shared data model (spec §3): sessions, messages, and memory entries, used
//! by the Session & Message Store (C8), Memory Store (C7), and Agent Engine
//! (C9) alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message, totally ordered within its session by `(created_at, seq)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Monotonic per-session insertion order, the tiebreak when two messages
    /// share a timestamp.
    pub seq: i64,
    pub event_type: Option<String>,
    pub skill_name: Option<String>,
    pub extra: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: Option<String>,
    pub model: String,
    pub system_prompt_override: Option<String>,
    pub temperature: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    pub archived: bool,
    pub message_count: i64,
}

/// Key-value fact, preference, or contextual note scoped to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub session_id: Uuid,
    pub category: String,
    pub key: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        matches!(self.role, Role::User)
    }
}
