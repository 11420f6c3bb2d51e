use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tasklane_common::models::{WorkflowTrace, WorkflowType};

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::store::{NewTrace, TracePatch};
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks/{id}/traces", get(list_traces).post(start_trace))
        .route("/api/traces/{trace_id}", get(get_trace).patch(update_trace))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartBody {
    /// Generated when the caller has no id of its own.
    #[serde(default)]
    trace_id: Option<String>,
    workflow_type: WorkflowType,
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    metadata: Option<String>,
}

async fn trace_for(state: &SharedState, user: &AuthUser, trace_id: String) -> Result<WorkflowTrace, ApiError> {
    let trace = state
        .db
        .call(move |db| db.trace_by_id(&trace_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Trace not found".into()))?;
    state.task_for(user, trace.task_id).await?;
    Ok(trace)
}

async fn list_traces(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    Ok(Json(state.db.call(move |db| db.traces_by_task(task_id)).await?))
}

async fn start_trace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<StartBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new = NewTrace {
        task_id,
        trace_id: body
            .trace_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        workflow_type: body.workflow_type,
        message_id: body.message_id,
        model: body.model,
        provider: body.provider,
        metadata: body.metadata,
    };
    let trace = state.db.call(move |db| db.start_trace(&new)).await?;
    tracing::debug!(task_id, trace_id = %trace.trace_id, workflow = %trace.workflow_type, "trace started");
    state.broadcast(&RealtimeEvent::TraceChanged { task_id });
    Ok(Json(trace))
}

async fn get_trace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(trace_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(trace_for(&state, &user, trace_id).await?))
}

async fn update_trace(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(trace_id): Path<String>,
    Json(patch): Json<TracePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let trace = trace_for(&state, &user, trace_id.clone()).await?;
    let updated = state
        .db
        .call(move |db| db.update_trace(&trace_id, &patch))
        .await?
        .ok_or_else(|| ApiError::NotFound("Trace not found".into()))?;
    state.broadcast(&RealtimeEvent::TraceChanged { task_id: trace.task_id });
    Ok(Json(updated))
}
