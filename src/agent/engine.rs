//! The reason-act loop. One [`AgentEngine::run`] call drives a single
//! request through `Starting -> Composing -> (Streaming -> Dispatching ->
//! Observing)* -> Answering -> Done`, forcing a final pass once the
//! iteration bound is reached and unwinding to `Aborted` on cancellation.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::domain::{Message, Role};
use crate::events::{AgentEvent, DoneSummary, Usage};
use crate::executor::{ExecutorLimits, SkillExecutor, SANDBOX_SKILL_NAME};
use crate::invocation::{InvocationParser, ParseEvent};
use crate::llm::costs;
use crate::llm::{LlmClient, LlmError};
use crate::memory::MemoryRetrieval;
use crate::prompt;
use crate::skills::SkillRegistry;
use crate::store::{Store, StoreError};

const CODE_PREVIEW_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("cancelled")]
    Cancelled,
}

/// Input to one agent turn (spec §6 `POST /agent/completions`).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub session_id: Uuid,
    pub message: String,
    pub model: Option<String>,
    pub skip_save_user_message: bool,
    pub max_iterations: Option<usize>,
}

/// Everything the HTTP layer needs for a non-streaming response, or to
/// replay a streaming one after the fact.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub events: Vec<AgentEvent>,
    pub content: String,
    pub skills_used: Vec<String>,
    pub usage: Usage,
}

pub struct AgentEngine {
    registry: Arc<SkillRegistry>,
    executor: SkillExecutor,
    llm: Arc<dyn LlmClient>,
    memory: Arc<dyn MemoryRetrieval>,
    store: Arc<Store>,
    max_iterations: usize,
    executor_limits: ExecutorLimits,
}

impl AgentEngine {
    pub fn new(
        registry: Arc<SkillRegistry>,
        executor: SkillExecutor,
        llm: Arc<dyn LlmClient>,
        memory: Arc<dyn MemoryRetrieval>,
        store: Arc<Store>,
        max_iterations: usize,
    ) -> Self {
        Self {
            registry,
            executor,
            llm,
            memory,
            store,
            max_iterations,
            executor_limits: ExecutorLimits::default(),
        }
    }

    /// Run one request to completion, emitting events to `events_tx` as they
    /// occur (best-effort — a full or closed receiver never aborts the run)
    /// and returning the accumulated outcome. `cancel` going high unwinds
    /// the loop to [`EngineError::Cancelled`] at the next suspension point.
    pub async fn run(
        &self,
        request: CompletionRequest,
        events_tx: Option<mpsc::Sender<AgentEvent>>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome, EngineError> {
        let mut outcome_events = Vec::new();
        let mut emit = |event: AgentEvent| {
            outcome_events.push(event.clone());
            if let Some(tx) = &events_tx {
                let _ = tx.try_send(event);
            }
        };

        // Every non-`Cancelled` error returned from here on emits its own
        // terminal `error` event first, so callers never need to (and must
        // not) synthesize a second one. `Cancelled` emits nothing: per the
        // cancellation contract the stream simply ends with no further
        // events.
        macro_rules! guard {
            ($fut:expr) => {
                match guarded(&mut cancel, $fut).await {
                    Ok(value) => value,
                    Err(err) => {
                        if !matches!(err, EngineError::Cancelled) {
                            emit(AgentEvent::error(err.to_string()));
                        }
                        return Err(err);
                    }
                }
            };
        }

        // Starting.
        let session = guard!(self.store.get_session(request.session_id));
        let history = guard!(self.store.list_messages(request.session_id, None));
        let persisted_memories = guard!(self.store.list_memories(request.session_id));

        let user_message = if request.skip_save_user_message {
            transient_message(request.session_id, Role::User, &request.message)
        } else {
            guard!(self.store.append_message(
                request.session_id,
                Role::User,
                &request.message,
                None,
                None,
                None,
            ))
        };

        let mut transcript = history.clone();
        transcript.push(user_message);

        // Composing.
        let memory_excerpt = interruptible(
            &mut cancel,
            self.memory.retrieve(&request.message, &history, &persisted_memories),
        )
        .await?;
        let snapshot = self.registry.snapshot();
        let system_prompt = session
            .system_prompt_override
            .clone()
            .unwrap_or_else(|| prompt::compose(Utc::now(), &snapshot, &memory_excerpt));

        let model = request.model.clone().or_else(|| Some(session.model.clone()));
        let max_iterations = request.max_iterations.unwrap_or(self.max_iterations);

        let mut iteration = 0usize;
        let mut skills_used: Vec<String> = Vec::new();
        let mut final_pass = false;
        let mut prompt_tokens: u32 = 0;
        let mut completion_tokens: u32 = 0;
        // Text is "thinking" until the request has executed its first
        // invocation, after which every further delta is "answer" — the
        // engine is past exploring and is composing its reply.
        let mut answering = false;

        'turns: loop {
            if *cancel.borrow() {
                return Err(EngineError::Cancelled);
            }

            let prompt_text = transcript.last().map(|m| m.content.clone()).unwrap_or_default();
            let history_slice = &transcript[..transcript.len().saturating_sub(1)];

            prompt_tokens += costs::estimate_tokens(&system_prompt);
            prompt_tokens += costs::estimate_tokens(&prompt_text);
            for turn in history_slice {
                prompt_tokens += costs::estimate_tokens(&turn.content);
            }

            let mut stream = tokio::select! {
                biased;
                _ = cancel.changed() => return Err(EngineError::Cancelled),
                result = self.llm.stream_chat(&system_prompt, history_slice, &prompt_text, model.as_deref()) => {
                    match result {
                        Ok(stream) => stream,
                        Err(err) => {
                            emit(AgentEvent::error(err.to_string()));
                            return Err(EngineError::Llm(err));
                        }
                    }
                },
            };

            let mut parser = InvocationParser::new();
            let mut assistant_text = String::new();
            let mut invoked_this_pass = false;
            let mut final_pass_invocation_ignored = false;

            'frames: loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.changed() => {
                        if !assistant_text.is_empty() {
                            let _ = self.store.append_message(
                                request.session_id,
                                Role::Assistant,
                                &assistant_text,
                                None,
                                None,
                                None,
                            ).await;
                        }
                        return Err(EngineError::Cancelled);
                    }
                    chunk = stream.next() => chunk,
                };
                let Some(chunk) = next else { break 'frames };

                let delta = match chunk {
                    Ok(delta) => delta,
                    Err(err) => {
                        if !assistant_text.is_empty() {
                            let _ = guarded(
                                &mut cancel,
                                self.store.append_message(
                                    request.session_id,
                                    Role::Assistant,
                                    &assistant_text,
                                    None,
                                    None,
                                    None,
                                ),
                            )
                            .await;
                        }
                        emit(AgentEvent::error(err.to_string()));
                        return Err(EngineError::Llm(err));
                    }
                };

                for parse_event in parser.feed(&delta) {
                    match parse_event {
                        ParseEvent::Text(text) => {
                            assistant_text.push_str(&text);
                            emit(if answering { AgentEvent::answer(text) } else { AgentEvent::thinking(text) });
                        }
                        ParseEvent::Warning(message) => emit(AgentEvent::warning(message)),
                        ParseEvent::Invocation(invocation) => {
                            if final_pass {
                                emit(AgentEvent::warning(format!(
                                    "ignoring invocation of '{}' in the final forced pass",
                                    invocation.skill_name
                                )));
                                final_pass_invocation_ignored = true;
                                continue;
                            }
                            invoked_this_pass = true;
                            answering = true;

                            let code_preview = preview(&invocation.code);
                            let is_sandbox_call = invocation.skill_name == SANDBOX_SKILL_NAME;
                            if is_sandbox_call {
                                emit(AgentEvent::CodeExecute {
                                    timestamp: Utc::now(),
                                    skill_name: invocation.skill_name.clone(),
                                    code: code_preview.clone(),
                                });
                            } else {
                                emit(AgentEvent::skill_call(invocation.skill_name.clone(), code_preview));
                            }

                            let observation = tokio::select! {
                                biased;
                                _ = cancel.changed() => return Err(EngineError::Cancelled),
                                obs = self.executor.execute(&snapshot, &invocation, self.executor_limits) => obs,
                            };

                            if is_sandbox_call {
                                emit(AgentEvent::CodeResult {
                                    timestamp: Utc::now(),
                                    skill_name: invocation.skill_name.clone(),
                                    success: observation.success,
                                    result: observation.text.clone(),
                                });
                            } else {
                                emit(AgentEvent::skill_result(
                                    invocation.skill_name.clone(),
                                    observation.success,
                                    observation.text.clone(),
                                ));
                            }

                            if !skills_used.contains(&invocation.skill_name) {
                                skills_used.push(invocation.skill_name.clone());
                            }

                            let tool_message = guard!(self.store.append_message(
                                request.session_id,
                                Role::Tool,
                                &observation.text,
                                Some("skill_result"),
                                Some(&invocation.skill_name),
                                Some(observation.raw.clone()),
                            ));
                            transcript.push(tool_message);

                            iteration += 1;
                            if iteration >= max_iterations && !final_pass {
                                final_pass = true;
                                transcript.push(transient_message(
                                    request.session_id,
                                    Role::User,
                                    "You have reached the maximum number of skill invocations for \
                                     this turn. Answer now using only what you have already \
                                     gathered; do not invoke any further skills.",
                                ));
                            }
                        }
                    }
                }
            }

            for parse_event in parser.finish() {
                match parse_event {
                    ParseEvent::Text(text) => {
                        assistant_text.push_str(&text);
                        emit(if answering { AgentEvent::answer(text) } else { AgentEvent::thinking(text) });
                    }
                    ParseEvent::Warning(message) => emit(AgentEvent::warning(message)),
                    ParseEvent::Invocation(_) => unreachable!("finish() never closes a new block"),
                }
            }

            completion_tokens += costs::estimate_tokens(&assistant_text);

            if invoked_this_pass {
                continue 'turns;
            }

            if final_pass_invocation_ignored && assistant_text.trim().is_empty() {
                // The model spent this pass on an invocation we refused to run
                // and left no answer text behind; ask again instead of
                // persisting an empty reply.
                transcript.push(transient_message(
                    request.session_id,
                    Role::User,
                    "Skill invocations are disabled for this turn. Respond with your final \
                     answer as plain text.",
                ));
                continue 'turns;
            }

            // Stream ended with no invocation this pass: the accumulated
            // text is the final answer.
            guard!(self.store.append_message(
                request.session_id,
                Role::Assistant,
                &assistant_text,
                None,
                None,
                None,
            ));
            let cost_model = model.as_deref().unwrap_or(&session.model);
            let usage = Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                estimated_cost_usd: costs::estimate_cost_usd(cost_model, prompt_tokens, completion_tokens),
            };
            let summary = DoneSummary {
                content: assistant_text.clone(),
                skills_used: skills_used.clone(),
                usage: usage.clone(),
            };
            emit(AgentEvent::done(summary));
            return Ok(RunOutcome { events: outcome_events, content: assistant_text, skills_used, usage });
        }
    }
}

/// Build a message that participates in the transcript sent to the LLM but
/// is never persisted — used for the caller's un-saved user turn and the
/// engine's own forced-final-pass directive.
fn transient_message(session_id: Uuid, role: Role, content: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        session_id,
        role,
        content: content.to_string(),
        created_at: Utc::now(),
        seq: -1,
        event_type: None,
        skill_name: None,
        extra: None,
    }
}

fn preview(code: &str) -> String {
    if code.chars().count() <= CODE_PREVIEW_LEN {
        code.to_string()
    } else {
        let truncated: String = code.chars().take(CODE_PREVIEW_LEN).collect();
        format!("{truncated}…")
    }
}

/// Race a cancellable `Result`-returning future against the cancel signal,
/// folding both error types into [`EngineError`].
async fn guarded<T, E>(
    cancel: &mut watch::Receiver<bool>,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, EngineError>
where
    EngineError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.changed() => Err(EngineError::Cancelled),
        result = fut => result.map_err(EngineError::from),
    }
}

/// Race a plain (non-`Result`) future against the cancel signal.
async fn interruptible<T>(
    cancel: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Result<T, EngineError> {
    tokio::select! {
        biased;
        _ = cancel.changed() => Err(EngineError::Cancelled),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TextStream;
    use crate::memory::{KnowledgeExtractor, MemoryConfig, MemoryStore, Reranker};
    use crate::sandbox::SandboxGateway;
    use async_trait::async_trait;
    use futures::stream;

    struct ScriptedLlm {
        responses: std::sync::Mutex<Vec<Vec<&'static str>>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn stream_chat(
            &self,
            _system_prompt: &str,
            _history: &[Message],
            _prompt: &str,
            _model: Option<&str>,
        ) -> Result<TextStream, LlmError> {
            let mut responses = self.responses.lock().unwrap();
            let chunks = if responses.is_empty() { vec![] } else { responses.remove(0) };
            let items: Vec<Result<String, LlmError>> =
                chunks.into_iter().map(|c| Ok(c.to_string())).collect();
            Ok(Box::pin(stream::iter(items)))
        }
    }

    /// Yields one chunk then hangs forever, so a test can reliably land a
    /// cancellation in the middle of a stream instead of racing a real one.
    struct StallingLlm;

    #[async_trait]
    impl LlmClient for StallingLlm {
        async fn stream_chat(
            &self,
            _system_prompt: &str,
            _history: &[Message],
            _prompt: &str,
            _model: Option<&str>,
        ) -> Result<TextStream, LlmError> {
            let first = stream::once(async { Ok("partial answer ".to_string()) });
            let rest = stream::pending::<Result<String, LlmError>>();
            Ok(Box::pin(first.chain(rest)))
        }
    }

    struct NullReranker;
    #[async_trait]
    impl Reranker for NullReranker {
        async fn score(&self, _query: &str, candidates: &[String]) -> Vec<f32> {
            vec![0.0; candidates.len()]
        }
    }

    struct NullExtractor;
    #[async_trait]
    impl KnowledgeExtractor for NullExtractor {
        async fn extract(&self, _utterance: &str, _candidates: &[String]) -> String {
            String::new()
        }
    }

    async fn engine_with(responses: Vec<Vec<&'static str>>) -> (AgentEngine, Arc<Store>, Uuid) {
        let store = Arc::new(Store::open(":memory:").await.unwrap());
        let session = store.create_session("test-model", None, None, 0.7).await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::build(tmp.path()).unwrap());
        let executor = SkillExecutor::new(SandboxGateway::new("http://127.0.0.1:1"));
        let llm = Arc::new(ScriptedLlm { responses: std::sync::Mutex::new(responses) });
        let memory = Arc::new(MemoryStore::new(NullReranker, NullExtractor, MemoryConfig::default()));
        let engine = AgentEngine::new(registry, executor, llm, memory, store.clone(), 10);
        (engine, store, session.id)
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn plain_response_terminates_with_done() {
        let (engine, _store, session_id) = engine_with(vec![vec!["Hello there."]]).await;
        let request = CompletionRequest {
            session_id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: false,
            max_iterations: None,
        };
        let outcome = engine.run(request, None, no_cancel()).await.unwrap();
        assert_eq!(outcome.content, "Hello there.");
        assert!(matches!(outcome.events.last(), Some(AgentEvent::Done { .. })));
    }

    #[tokio::test]
    async fn cancellation_before_start_aborts() {
        let (engine, _store, session_id) = engine_with(vec![vec!["unused"]]).await;
        let (_tx, cancel_rx) = watch::channel(true);
        let request = CompletionRequest {
            session_id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: true,
            max_iterations: None,
        };
        let result = engine.run(request, None, cancel_rx).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_persists_partial_text() {
        let store = Arc::new(Store::open(":memory:").await.unwrap());
        let session = store.create_session("test-model", None, None, 0.7).await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::build(tmp.path()).unwrap());
        let executor = SkillExecutor::new(SandboxGateway::new("http://127.0.0.1:1"));
        let llm = Arc::new(StallingLlm);
        let memory = Arc::new(MemoryStore::new(NullReranker, NullExtractor, MemoryConfig::default()));
        let engine = AgentEngine::new(registry, executor, llm, memory, store.clone(), 10);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let request = CompletionRequest {
            session_id: session.id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: false,
            max_iterations: None,
        };

        let run = tokio::spawn(async move { engine.run(request, None, cancel_rx).await });
        // Give the stalling stream's first chunk time to be parsed before cancelling.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel_tx.send(true).unwrap();
        let result = run.await.unwrap();
        assert!(matches!(result, Err(EngineError::Cancelled)));

        let messages = store.list_messages(session.id, None).await.unwrap();
        let assistant_message = messages.iter().find(|m| matches!(m.role, Role::Assistant));
        assert_eq!(assistant_message.map(|m| m.content.as_str()), Some("partial answer "));
    }

    #[tokio::test]
    async fn whitespace_only_response_yields_empty_done() {
        let (engine, _store, session_id) = engine_with(vec![vec!["   \n  "]]).await;
        let request = CompletionRequest {
            session_id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: false,
            max_iterations: None,
        };
        let outcome = engine.run(request, None, no_cancel()).await.unwrap();
        assert_eq!(outcome.content.trim(), "");
    }

    #[tokio::test]
    async fn unknown_skill_invocation_continues_the_loop() {
        let (engine, _store, session_id) = engine_with(vec![
            vec!["<execute_skill><skill_name>mystery</skill_name><code></code></execute_skill>"],
            vec!["done after observing the failure"],
        ])
        .await;
        let request = CompletionRequest {
            session_id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: false,
            max_iterations: None,
        };
        let outcome = engine.run(request, None, no_cancel()).await.unwrap();
        assert_eq!(outcome.content, "done after observing the failure");
        assert!(outcome.skills_used.contains(&"mystery".to_string()));
    }

    #[tokio::test]
    async fn iteration_bound_forces_final_pass() {
        let invocation =
            "<execute_skill><skill_name>mystery</skill_name><code></code></execute_skill>";
        let responses = vec![vec![invocation]; 3];
        let (engine, _store, session_id) = engine_with(
            [responses, vec![vec!["final answer"]]].concat(),
        )
        .await;
        let request = CompletionRequest {
            session_id,
            message: "hi".to_string(),
            model: None,
            skip_save_user_message: false,
            max_iterations: Some(2),
        };
        let outcome = engine.run(request, None, no_cancel()).await.unwrap();
        assert_eq!(outcome.content, "final answer");
    }

    #[test]
    fn preview_truncates_long_code() {
        let code = "x".repeat(500);
        let shown = preview(&code);
        assert!(shown.chars().count() < code.chars().count());
        assert!(shown.ends_with('…'));
    }
}
