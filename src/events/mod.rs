//! The typed event stream the Agent Engine emits, consumed by the transport
//! layer and rendered as SSE (see [`crate::http`]).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One event in a request's stream. Exactly one of [`AgentEvent::Done`] or
/// [`AgentEvent::Error`] terminates a stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { timestamp: DateTime<Utc>, content: String },
    SkillCall { timestamp: DateTime<Utc>, skill_name: String, code: String },
    SkillResult { timestamp: DateTime<Utc>, skill_name: String, success: bool, result: String },
    CodeExecute { timestamp: DateTime<Utc>, skill_name: String, code: String },
    CodeResult { timestamp: DateTime<Utc>, skill_name: String, success: bool, result: String },
    Answer { timestamp: DateTime<Utc>, content: String },
    Warning { timestamp: DateTime<Utc>, content: String },
    Error { timestamp: DateTime<Utc>, error: String },
    Done { timestamp: DateTime<Utc>, summary: DoneSummary },
}

/// Attached to the terminal `done` event: the final answer plus accounting
/// the caller needs without re-deriving it from the event log.
#[derive(Debug, Clone, Serialize)]
pub struct DoneSummary {
    pub content: String,
    pub skills_used: Vec<String>,
    pub usage: Usage,
}

/// Token accounting for one request (A5 — Cost Accounting).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: f64,
}

impl AgentEvent {
    pub fn thinking(content: impl Into<String>) -> Self {
        Self::Thinking { timestamp: Utc::now(), content: content.into() }
    }

    pub fn answer(content: impl Into<String>) -> Self {
        Self::Answer { timestamp: Utc::now(), content: content.into() }
    }

    pub fn skill_call(skill_name: impl Into<String>, code: impl Into<String>) -> Self {
        Self::SkillCall { timestamp: Utc::now(), skill_name: skill_name.into(), code: code.into() }
    }

    pub fn skill_result(skill_name: impl Into<String>, success: bool, result: impl Into<String>) -> Self {
        Self::SkillResult {
            timestamp: Utc::now(),
            skill_name: skill_name.into(),
            success,
            result: result.into(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::Warning { timestamp: Utc::now(), content: content.into() }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error { timestamp: Utc::now(), error: error.into() }
    }

    pub fn done(summary: DoneSummary) -> Self {
        Self::Done { timestamp: Utc::now(), summary }
    }

    /// Serialize to the single-line JSON payload an SSE `data:` frame carries.
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).expect("AgentEvent serialization is infallible")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_tagged_event_type() {
        let event = AgentEvent::answer("hi");
        let json = event.to_sse_data();
        assert!(json.contains("\"event_type\":\"answer\""));
        assert!(json.contains("\"content\":\"hi\""));
    }

    #[test]
    fn done_and_error_are_terminal() {
        assert!(AgentEvent::error("boom").is_terminal());
        assert!(AgentEvent::done(DoneSummary {
            content: String::new(),
            skills_used: Vec::new(),
            usage: Usage::default(),
        })
        .is_terminal());
        assert!(!AgentEvent::thinking("...").is_terminal());
    }
}
