//! REST endpoints for the conversation and the result push webhook.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::error::FlowError;
use crate::jobs::{AnalysisResult, JobManager};
use crate::survey::ConversationController;

/// Shared state for the conversation routes.
#[derive(Clone)]
pub struct AppState {
    pub controller: ConversationController,
    pub jobs: Arc<JobManager>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct MultiSelectRequest {
    #[serde(default)]
    pub selected: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BudgetRequest {
    pub min: String,
    pub max: String,
}

fn flow_error(e: FlowError) -> Response {
    let status = match e {
        FlowError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::NotAwaitingAnswer { .. } | FlowError::NothingToRetry { .. } => StatusCode::CONFLICT,
        FlowError::InvalidTransition { .. } | FlowError::Graph(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"ok": false, "error": e.to_string()}))).into_response()
}

async fn respond(state: &AppState, result: Result<(), FlowError>) -> Response {
    match result {
        Ok(()) => Json(state.controller.snapshot().await).into_response(),
        Err(e) => flow_error(e),
    }
}

/// GET /api/conversation
async fn get_conversation(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.controller.snapshot().await)
}

/// POST /api/conversation/answer
async fn post_answer(State(state): State<AppState>, Json(req): Json<AnswerRequest>) -> Response {
    let result = state.controller.submit_answer(&req.value).await;
    respond(&state, result).await
}

/// POST /api/conversation/multi-select
async fn post_multi_select(
    State(state): State<AppState>,
    Json(req): Json<MultiSelectRequest>,
) -> Response {
    let result = state.controller.submit_multi_select(req.selected).await;
    respond(&state, result).await
}

/// POST /api/conversation/budget
async fn post_budget(State(state): State<AppState>, Json(req): Json<BudgetRequest>) -> Response {
    let result = state.controller.submit_budget_range(&req.min, &req.max).await;
    respond(&state, result).await
}

/// POST /api/conversation/new
async fn post_new(State(state): State<AppState>) -> Response {
    state.controller.new_conversation().await;
    respond(&state, Ok(())).await
}

/// POST /api/conversation/retry
async fn post_retry(State(state): State<AppState>) -> Response {
    let result = state.controller.retry_submission().await;
    respond(&state, result).await
}

/// POST /api/jobs/{job_id}/result
///
/// Out-of-band delivery of a finished result. Accepts the bare result or the
/// `{"ok": true, "analysis": {...}}` envelope. Duplicates are acknowledged
/// with `accepted: false`; `settled_by` names the channel that won.
async fn post_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let result = match AnalysisResult::from_json(body) {
        Ok(result) => result,
        Err(e) => {
            warn!(job_id = %job_id, "Rejected pushed result: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"ok": false, "error": e.to_string()})),
            )
                .into_response();
        }
    };
    if state.jobs.job(&job_id).await.is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": format!("unknown job {job_id}")})),
        )
            .into_response();
    }
    let accepted = state.jobs.deliver_push(&job_id, result).await;
    let settled_by = state.jobs.settled_by(&job_id).await;
    info!(job_id = %job_id, accepted, ?settled_by, "Pushed result received");
    Json(json!({"ok": true, "accepted": accepted, "settled_by": settled_by})).into_response()
}

/// Build the REST routes.
pub fn conversation_routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/conversation", get(get_conversation))
        .route("/api/conversation/answer", post(post_answer))
        .route("/api/conversation/multi-select", post(post_multi_select))
        .route("/api/conversation/budget", post(post_budget))
        .route("/api/conversation/new", post(post_new))
        .route("/api/conversation/retry", post(post_retry))
        .route("/api/jobs/{job_id}/result", post(post_job_result))
        .layer(cors)
        .with_state(state)
}
