//! HTTP surface the chat front end talks to.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::evaluator::build_evaluator_from_config;
use crate::flow::{FlowOutput, FlowSnapshot, InterviewDeps, SessionError};
use crate::questions::load_questions_default;
use crate::session::{spawn_idle_sweeper, SessionRecord, SessionRegistry};
use crate::storage::JsonFileSink;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Wire the question bank, evaluator and result directory from config.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let bank = load_questions_default(cfg.interview.questions_path.as_deref())
            .context("loading interview questions")?;
        let evaluator = build_evaluator_from_config(&cfg.evaluator);
        let sink = JsonFileSink::new(&cfg.storage.results_dir);
        tracing::info!(
            questions = bank.len(),
            evaluator = evaluator.provider_name(),
            results_dir = %cfg.storage.results_dir.display(),
            max_clarifications = cfg.interview.max_clarifications,
            "interview service configured"
        );
        let deps = InterviewDeps::new(
            Arc::new(bank),
            evaluator,
            Arc::new(sink),
            &cfg.interview,
        );
        let state = Self::new(SessionRegistry::new(deps));

        let idle = cfg.interview.idle_timeout_mins;
        if idle > 0 {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => {
                    spawn_idle_sweeper(
                        Arc::clone(&state.registry),
                        Duration::from_secs(idle.saturating_mul(60)),
                    );
                }
                Err(_) => tracing::warn!("no async runtime, idle sessions will not be swept"),
            }
        }
        Ok(state)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/interviews", post(create_interview))
        .route(
            "/interviews/{id}",
            get(interview_snapshot).delete(abandon_interview),
        )
        .route("/interviews/{id}/answers", post(submit_answer))
        .route("/results", get(list_results))
        .route("/results/{id}", get(get_result))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            SessionError::UnknownSession(_) => (StatusCode::NOT_FOUND, "unknown_session"),
            SessionError::AlreadyComplete => (StatusCode::CONFLICT, "already_complete"),
            SessionError::NotStarted => (StatusCode::CONFLICT, "not_started"),
            SessionError::EmptyAnswer => (StatusCode::UNPROCESSABLE_ENTITY, "empty_answer"),
            SessionError::Evaluator(_) => (StatusCode::BAD_GATEWAY, "evaluator"),
            SessionError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, kind, "request failed");
        }
        (status, Json(json!({ "error": self.to_string(), "kind": kind }))).into_response()
    }
}

#[derive(Serialize)]
struct CreatedResp {
    session_id: String,
    output: FlowOutput,
}

#[derive(Deserialize)]
struct AnswerReq {
    text: String,
}

async fn create_interview(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CreatedResp>), SessionError> {
    let (session_id, output) = state.registry.create().await?;
    Ok((StatusCode::CREATED, Json(CreatedResp { session_id, output })))
}

async fn submit_answer(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<AnswerReq>,
) -> Result<Json<FlowOutput>, SessionError> {
    let out = state.registry.submit(&id, &body.text).await?;
    Ok(Json(out))
}

async fn interview_snapshot(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<FlowSnapshot>, SessionError> {
    Ok(Json(state.registry.snapshot(&id).await?))
}

async fn abandon_interview(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, SessionError> {
    if state.registry.abandon(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(SessionError::UnknownSession(id))
    }
}

async fn list_results(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionRecord>>, SessionError> {
    Ok(Json(state.registry.sink().list().await?))
}

async fn get_result(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<SessionRecord>, SessionError> {
    match state.registry.sink().load(&id).await? {
        Some(r) => Ok(Json(r)),
        None => Err(SessionError::UnknownSession(id)),
    }
}
