//! Wire types for the `/agent/*` JSON API (spec §6). Kept distinct from the
//! domain types in [`crate::domain`] so storage layout can evolve without
//! touching the public contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{MemoryEntry, Message, Role, Session};
use crate::events::{AgentEvent, Usage};

#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    pub message: String,
    pub session_id: Option<Uuid>,
    pub model: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub skip_save_user_message: bool,
    pub max_iterations: Option<usize>,
    /// Accepted for forward compatibility with multimodal callers; stored
    /// verbatim on the user message's `extra` column, not otherwise
    /// interpreted by the Agent Engine.
    #[serde(default)]
    pub images: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub events: Vec<AgentEvent>,
    pub skills_used: Vec<String>,
    pub usage: Usage,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub title: Option<String>,
    pub model: Option<String>,
    pub system_prompt_override: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionBody {
    pub title: Option<String>,
    pub archived: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageQuery {
    #[serde(default)]
    pub include_following: bool,
}

#[derive(Debug, Deserialize)]
pub struct PutMemoryBody {
    pub key: String,
    pub category: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
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

impl From<Session> for SessionView {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            title: s.title,
            model: s.model,
            system_prompt_override: s.system_prompt_override,
            temperature: s.temperature,
            created_at: s.created_at,
            updated_at: s.updated_at,
            active: s.active,
            archived: s.archived,
            message_count: s.message_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
    pub event_type: Option<String>,
    pub skill_name: Option<String>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            session_id: m.session_id,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
            seq: m.seq,
            event_type: m.event_type,
            skill_name: m.skill_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemoryView {
    pub category: String,
    pub key: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<MemoryEntry> for MemoryView {
    fn from(e: MemoryEntry) -> Self {
        Self { category: e.category, key: e.key, value: e.value, expires_at: e.expires_at }
    }
}

#[derive(Debug, Serialize)]
pub struct SkillView {
    pub name: String,
    pub description: String,
    pub executable: bool,
    pub client_class: Option<String>,
    pub default_method: Option<String>,
    pub related_tools: Vec<String>,
}

impl From<&crate::skills::Manifest> for SkillView {
    fn from(m: &crate::skills::Manifest) -> Self {
        Self {
            name: m.name.clone(),
            description: m.description.clone(),
            executable: m.executable,
            client_class: m.client_class.clone(),
            default_method: m.default_method.clone(),
            related_tools: m.related_tools.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub skill_count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub registry_skill_count: usize,
    pub uptime_s: u64,
}
