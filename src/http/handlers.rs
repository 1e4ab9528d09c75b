//! Handler functions for the `/agent/*` routes.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::agent::CompletionRequest;
use crate::events::AgentEvent;

use super::dto::*;
use super::error::ApiError;
use super::AppState;

pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        registry_skill_count: state.registry.snapshot().len(),
        uptime_s: state.started_at.elapsed().as_secs(),
    })
}

/// `POST /agent/completions`. Streams SSE by default; `stream: false` drives
/// the engine to completion internally and returns one JSON object.
pub async fn completions(
    State(state): State<AppState>,
    Json(body): Json<CompletionBody>,
) -> Result<Response, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let session_id = match body.session_id {
        Some(id) => id,
        None => state.store.create_session("gpt-4.1-mini", None, None, 0.7).await?.id,
    };

    let request = CompletionRequest {
        session_id,
        message: body.message,
        model: body.model,
        skip_save_user_message: body.skip_save_user_message,
        max_iterations: body.max_iterations,
    };

    let stream_response = body.stream.unwrap_or(true);

    if stream_response {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel::<AgentEvent>(64);
        let engine = state.engine.clone();
        tokio::spawn(async move {
            // Held for the task's lifetime so the receiver never observes a
            // spuriously closed channel before the run actually finishes.
            let _cancel_tx = cancel_tx;
            // The engine emits its own terminal `error` event for every
            // failure except `Cancelled`, which per the cancellation
            // contract ends the stream with no further events — in neither
            // case does the handler emit anything further.
            let _ = engine.run(request, Some(tx.clone()), cancel_rx).await;
        });
        let stream = sse_stream_from_receiver(rx);
        Ok(Sse::new(stream).into_response())
    } else {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let outcome = state.engine.run(request, None, cancel_rx).await?;
        let response = CompletionResponse {
            id: Uuid::new_v4(),
            session_id,
            content: outcome.content,
            events: outcome.events,
            skills_used: outcome.skills_used,
            usage: outcome.usage,
            created: chrono::Utc::now(),
        };
        Ok(Json(response).into_response())
    }
}

/// Wraps the engine's event channel as an SSE byte stream, appending the
/// sentinel `[DONE]` frame once the channel closes (the engine task always
/// drops its sender after its terminal `done`/`error` event).
fn sse_stream_from_receiver(rx: mpsc::Receiver<AgentEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    let events = ReceiverStream::new(rx).map(|event| Ok(Event::default().data(event.to_sse_data())));
    let done = futures::stream::once(futures::future::ready(Ok(Event::default().data("[DONE]"))));
    events.chain(done)
}

pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state.store.list_sessions().await?;
    Ok(Json(sessions.into_iter().map(SessionView::from).collect()))
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .store
        .create_session(
            body.model.as_deref().unwrap_or("gpt-4.1-mini"),
            body.title.as_deref(),
            body.system_prompt_override.as_deref(),
            body.temperature,
        )
        .await?;
    Ok(Json(session.into()))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    Ok(Json(state.store.get_session(id).await?.into()))
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSessionBody>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.store.update_session(id, body.title.as_deref(), body.archived).await?;
    Ok(Json(session.into()))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_session(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = state.store.list_messages(id, query.limit).await?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((_id, mid)): Path<(Uuid, Uuid)>,
    Query(query): Query<DeleteMessageQuery>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_message(mid, query.include_following).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn list_memories(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MemoryView>>, ApiError> {
    let entries = state.store.list_memories(id).await?;
    Ok(Json(entries.into_iter().map(MemoryView::from).collect()))
}

pub async fn get_memory(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<Json<MemoryView>, ApiError> {
    let entries = state.store.list_memories(id).await?;
    entries
        .into_iter()
        .find(|e| e.key == key)
        .map(|e| Json(e.into()))
        .ok_or_else(|| ApiError::NotFound(format!("memory key `{key}` not found")))
}

pub async fn put_memory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PutMemoryBody>,
) -> Result<axum::http::StatusCode, ApiError> {
    state
        .store
        .upsert_memory(&crate::domain::MemoryEntry {
            session_id: id,
            category: body.category,
            key: body.key,
            value: body.value,
            expires_at: body.expires_at,
        })
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.store.delete_memory(id, &key).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn list_skills(State(state): State<AppState>) -> Json<Vec<SkillView>> {
    let snapshot = state.registry.snapshot();
    Json(snapshot.list().map(SkillView::from).collect())
}

pub async fn get_skill(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SkillView>, ApiError> {
    let snapshot = state.registry.get(&name)?;
    Ok(Json(SkillView::from(snapshot.get(&name).expect("get() verified presence"))))
}

pub async fn refresh_skills(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    let snapshot = state.registry.refresh()?;
    Ok(Json(RefreshResponse { skill_count: snapshot.len(), built_at: snapshot.built_at }))
}
