//! Memory Store (C7): two-stage retrieval over a session's prior messages —
//! reranked candidate selection, then LLM knowledge extraction — overlaid
//! unconditionally with persisted memory entries.

pub mod default;

use async_trait::async_trait;

use crate::domain::{MemoryEntry, Message};

/// External reranker collaborator: scores each candidate message against the
/// current utterance.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidates: &[String]) -> Vec<f32>;
}

/// LLM collaborator used for stage-2 knowledge extraction. Kept distinct
/// from [`crate::llm::LlmClient`] since it only ever needs one-shot
/// completion, never streaming.
#[async_trait]
pub trait KnowledgeExtractor: Send + Sync {
    async fn extract(&self, utterance: &str, candidates: &[String]) -> String;
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Top-K candidates kept after reranking, default 20.
    pub top_k: usize,
    /// Minimum reranker score for a candidate to survive, default 0.0.
    pub score_floor: f32,
    /// Minimum user-turn count before retrieval runs at all, default 4.
    pub user_turn_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { top_k: 20, score_floor: 0.0, user_turn_threshold: 4 }
    }
}

/// Object-safe facade over [`MemoryStore`] so the Agent Engine can hold one
/// behind an `Arc<dyn MemoryRetrieval>` without naming its reranker/extractor
/// type parameters.
#[async_trait]
pub trait MemoryRetrieval: Send + Sync {
    async fn retrieve(&self, utterance: &str, history: &[Message], persisted: &[MemoryEntry]) -> String;
}

#[async_trait]
impl<R: Reranker, K: KnowledgeExtractor> MemoryRetrieval for MemoryStore<R, K> {
    async fn retrieve(&self, utterance: &str, history: &[Message], persisted: &[MemoryEntry]) -> String {
        MemoryStore::retrieve(self, utterance, history, persisted).await
    }
}

pub struct MemoryStore<R, K> {
    reranker: R,
    extractor: K,
    config: MemoryConfig,
}

impl<R: Reranker, K: KnowledgeExtractor> MemoryStore<R, K> {
    pub fn new(reranker: R, extractor: K, config: MemoryConfig) -> Self {
        Self { reranker, extractor, config }
    }

    /// Build the memory excerpt for the Prompt Composer. `history` is the
    /// session's prior messages (not including the new utterance);
    /// `persisted` are memory entries saved via the API, always overlaid.
    pub async fn retrieve(
        &self,
        utterance: &str,
        history: &[Message],
        persisted: &[MemoryEntry],
    ) -> String {
        let mut sections = Vec::new();

        if count_user_turns(history) >= self.config.user_turn_threshold {
            let candidates: Vec<String> = history
                .iter()
                .filter(|m| m.is_user() || matches!(m.role, crate::domain::Role::Assistant))
                .map(|m| m.content.clone())
                .collect();

            if !candidates.is_empty() {
                let scores = self.reranker.score(utterance, &candidates).await;
                let mut scored: Vec<(f32, &String)> = scores.iter().copied().zip(candidates.iter()).collect();
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                let top: Vec<String> = scored
                    .into_iter()
                    .filter(|(score, _)| *score >= self.config.score_floor)
                    .take(self.config.top_k)
                    .map(|(_, text)| text.clone())
                    .collect();

                if !top.is_empty() {
                    let excerpt = self.extractor.extract(utterance, &top).await;
                    if !excerpt.is_empty() {
                        sections.push(excerpt);
                    }
                }
            }
        }

        if !persisted.is_empty() {
            let overlay = persisted
                .iter()
                .map(|entry| format!("[{}] {} = {}", entry.category, entry.key, entry.value))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(overlay);
        }

        sections.join("\n")
    }
}

/// Turn counting for the retrieval gate counts user messages only; tool and
/// assistant messages never advance the threshold.
fn count_user_turns(history: &[Message]) -> usize {
    history.iter().filter(|m| m.is_user()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use chrono::Utc;
    use uuid::Uuid;

    struct FixedReranker(Vec<f32>);
    #[async_trait]
    impl Reranker for FixedReranker {
        async fn score(&self, _query: &str, _candidates: &[String]) -> Vec<f32> {
            self.0.clone()
        }
    }

    struct EchoExtractor;
    #[async_trait]
    impl KnowledgeExtractor for EchoExtractor {
        async fn extract(&self, _utterance: &str, candidates: &[String]) -> String {
            format!("extracted: {}", candidates.join("; "))
        }
    }

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

    #[tokio::test]
    async fn retrieval_skipped_below_turn_threshold() {
        let store = MemoryStore::new(
            FixedReranker(vec![1.0]),
            EchoExtractor,
            MemoryConfig::default(),
        );
        let history = vec![message(Role::User, "hi"), message(Role::Assistant, "hello")];
        let excerpt = store.retrieve("next question", &history, &[]).await;
        assert!(excerpt.is_empty());
    }

    #[tokio::test]
    async fn retrieval_runs_at_threshold() {
        let store = MemoryStore::new(
            FixedReranker(vec![1.0, 1.0, 1.0, 1.0]),
            EchoExtractor,
            MemoryConfig::default(),
        );
        let history = vec![
            message(Role::User, "a"),
            message(Role::Assistant, "b"),
            message(Role::User, "c"),
            message(Role::Assistant, "d"),
            message(Role::User, "e"),
            message(Role::Assistant, "f"),
            message(Role::User, "g"),
            message(Role::Assistant, "h"),
        ];
        let excerpt = store.retrieve("next question", &history, &[]).await;
        assert!(excerpt.starts_with("extracted:"));
    }

    #[tokio::test]
    async fn persisted_entries_overlay_unconditionally() {
        let store = MemoryStore::new(FixedReranker(vec![]), EchoExtractor, MemoryConfig::default());
        let persisted = vec![crate::domain::MemoryEntry {
            session_id: Uuid::new_v4(),
            category: "preference".to_string(),
            key: "units".to_string(),
            value: "metric".to_string(),
            expires_at: None,
        }];
        let excerpt = store.retrieve("hi", &[], &persisted).await;
        assert!(excerpt.contains("units = metric"));
    }

    #[test]
    fn turn_counting_ignores_tool_and_assistant_messages() {
        let history = vec![
            message(Role::User, "a"),
            message(Role::Tool, "b"),
            message(Role::Assistant, "c"),
        ];
        assert_eq!(count_user_turns(&history), 1);
    }
}
