//! Narrow streaming chat trait over a single configured LLM provider.
//!
//! The Agent Engine depends on [`LlmClient`], never on the rig-core agent
//! builder shape directly, so swapping providers never touches the engine.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rig::agent::MultiTurnStreamItem;
use rig::client::CompletionClient;
use rig::message::Message as RigMessage;
use rig::providers::openai;
use rig::streaming::{StreamedAssistantContent, StreamingChat};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::domain::{Message, Role};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider error: {0}")]
    Provider(String),
}

/// One streamed delta of assistant text.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stream a chat completion given a system preamble and prior turns.
    /// `history` must not include the new user utterance; pass it as `prompt`.
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
        prompt: &str,
        model: Option<&str>,
    ) -> Result<TextStream, LlmError>;
}

/// [`LlmClient`] backed by rig-core's OpenAI-compatible client, pointed at
/// whatever base URL the deployment configures (OpenAI itself, a local
/// gateway, or any OpenAI-wire-compatible provider).
pub struct RigLlmClient {
    client: openai::Client,
    model: String,
}

impl RigLlmClient {
    pub fn new(base_url: &str, api_key: &SecretString, model: &str) -> Result<Self, LlmError> {
        let client = openai::Client::builder()
            .api_key(api_key.expose_secret())
            .base_url(base_url)
            .build()
            .map_err(|e| LlmError::Provider(e.to_string()))?;
        Ok(Self { client, model: model.to_string() })
    }
}

#[async_trait]
impl LlmClient for RigLlmClient {
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: &[Message],
        prompt: &str,
        model: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        let chat_history: Vec<RigMessage> = history.iter().filter_map(to_rig_message).collect();

        let agent = self
            .client
            .agent(model.unwrap_or(&self.model))
            .preamble(system_prompt)
            .build();

        let stream = agent
            .stream_chat(prompt.to_string(), chat_history)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let mapped = stream.filter_map(|item| async move {
            match item {
                Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(text))) => {
                    Some(Ok(text.text))
                }
                Ok(_) => None,
                Err(e) => Some(Err(LlmError::Provider(e.to_string()))),
            }
        });

        Ok(Box::pin(mapped))
    }
}

fn to_rig_message(message: &Message) -> Option<RigMessage> {
    match message.role {
        Role::User => Some(RigMessage::user(&message.content)),
        Role::Assistant => Some(RigMessage::assistant(&message.content)),
        Role::Tool => Some(RigMessage::user(&message.content)),
        Role::System => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(role: Role, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            seq: 0,
            event_type: None,
            skill_name: None,
            extra: None,
        }
    }

    #[test]
    fn system_messages_are_excluded_from_chat_history() {
        let history = vec![message(Role::System, "preamble"), message(Role::User, "hi")];
        let converted: Vec<RigMessage> = history.iter().filter_map(to_rig_message).collect();
        assert_eq!(converted.len(), 1);
    }
}
