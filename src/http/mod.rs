//! HTTP Transport (A3): axum router exposing the `/agent/*` JSON API (spec
//! §6) plus a `/healthz` liveness probe.

pub mod dto;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::AgentEngine;
use crate::skills::SkillRegistry;
use crate::store::Store;

/// Shared handles every handler needs. Cloning is cheap — every field is an
/// `Arc` (or `AgentEngine` itself holds only `Arc`s internally).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AgentEngine>,
    pub store: Arc<Store>,
    pub registry: Arc<SkillRegistry>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/agent/completions", post(handlers::completions))
        .route(
            "/agent/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/agent/sessions/{id}",
            get(handlers::get_session).put(handlers::update_session).delete(handlers::delete_session),
        )
        .route("/agent/sessions/{id}/messages", get(handlers::list_messages))
        .route(
            "/agent/sessions/{id}/messages/{mid}",
            axum::routing::delete(handlers::delete_message),
        )
        .route(
            "/agent/sessions/{id}/memories",
            get(handlers::list_memories).post(handlers::put_memory),
        )
        .route(
            "/agent/sessions/{id}/memories/{key}",
            get(handlers::get_memory).delete(handlers::delete_memory),
        )
        .route("/agent/skills", get(handlers::list_skills))
        .route("/agent/skills/{name}", get(handlers::get_skill))
        .route("/agent/skills/refresh", post(handlers::refresh_skills))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
