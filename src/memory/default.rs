//! Production [`Reranker`]/[`KnowledgeExtractor`] pair used to wire a real
//! [`MemoryStore`](super::MemoryStore) in `main.rs`.

use std::collections::HashSet;

use async_trait::async_trait;
use rig::completion::Prompt;
use rig::providers::openai;
use secrecy::{ExposeSecret, SecretString};

use super::{KnowledgeExtractor, Reranker};

/// Scores candidates by lexical overlap with the query. No network call and
/// no extra dependency, so it always has an answer even with no LLM
/// configured — good enough to rank "did we talk about this before" without
/// a dedicated embeddings pipeline.
pub struct LexicalReranker;

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, candidates: &[String]) -> Vec<f32> {
        let query_tokens: HashSet<String> = tokenize(query);
        if query_tokens.is_empty() {
            return vec![0.0; candidates.len()];
        }
        candidates
            .iter()
            .map(|candidate| {
                let candidate_tokens = tokenize(candidate);
                let overlap = query_tokens.intersection(&candidate_tokens).count();
                overlap as f32 / query_tokens.len() as f32
            })
            .collect()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

const EXTRACTION_PREAMBLE: &str = "You summarize prior conversation excerpts into a short block of \
facts relevant to the current question. Be terse. If nothing is relevant, reply with an empty string.";

/// One-shot (non-streaming) extraction over the rig-core OpenAI-compatible
/// client, distinct from [`crate::llm::RigLlmClient`] since it never streams
/// and always uses a fixed low-cost model for summarization.
pub struct RigKnowledgeExtractor {
    client: openai::Client,
    model: String,
}

impl RigKnowledgeExtractor {
    pub fn new(base_url: &str, api_key: &SecretString, model: &str) -> Result<Self, String> {
        let client = openai::Client::builder()
            .api_key(api_key.expose_secret())
            .base_url(base_url)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client, model: model.to_string() })
    }
}

#[async_trait]
impl KnowledgeExtractor for RigKnowledgeExtractor {
    async fn extract(&self, utterance: &str, candidates: &[String]) -> String {
        let agent = self.client.agent(&self.model).preamble(EXTRACTION_PREAMBLE).build();
        let joined = candidates.join("\n---\n");
        let prompt = format!("Current question: {utterance}\n\nPrior excerpts:\n{joined}");
        agent.prompt(prompt).await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "knowledge extraction failed, dropping excerpt");
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lexical_reranker_ranks_overlapping_candidate_higher() {
        let reranker = LexicalReranker;
        let scores = reranker
            .score(
                "what is the weather in boston",
                &["boston weather forecast".to_string(), "unrelated text about cooking".to_string()],
            )
            .await;
        assert!(scores[0] > scores[1]);
    }

    #[tokio::test]
    async fn lexical_reranker_handles_empty_query() {
        let reranker = LexicalReranker;
        let scores = reranker.score("", &["anything".to_string()]).await;
        assert_eq!(scores, vec![0.0]);
    }
}
