//! Records the workspace sidecar reports: file changes, tool invocations,
//! terminal output and workspace health.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::Value;
use tasklane_common::models::{FileOperation, StreamType};

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::realtime::DiffStats;
use crate::store::{DEFAULT_RECENT_LIMIT, NewTerminalOutput, ToolLogUpdate, WorkspaceStatusPatch};
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks/{id}/file-changes",
            get(list_file_changes).post(create_file_change),
        )
        .route("/api/tasks/{id}/file-changes/stats", get(file_change_stats))
        .route("/api/tasks/{id}/diff-stats", get(diff_stats))
        .route("/api/tasks/{id}/tool-logs", get(list_tool_logs).post(create_tool_log))
        .route("/api/tasks/{id}/tool-logs/stats", get(tool_log_stats))
        .route("/api/tool-logs/{id}", patch(update_tool_log))
        .route("/api/tasks/{id}/terminal", get(list_terminal).post(append_terminal))
        .route("/api/tasks/{id}/terminal/{command_id}", get(combined_output))
        .route(
            "/api/tasks/{id}/workspace-status",
            get(workspace_status).put(put_workspace_status),
        )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SinceQuery {
    since: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileChangeBody {
    file_path: String,
    operation: FileOperation,
    #[serde(default)]
    additions: i64,
    #[serde(default)]
    deletions: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolLogQuery {
    #[serde(default)]
    running: bool,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolLogBody {
    tool_name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TerminalBody {
    command_id: String,
    content: String,
    stream_type: StreamType,
    #[serde(default)]
    timestamp: Option<i64>,
}

// ── File changes ──────────────────────────────────────────────────────

async fn list_file_changes(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(query): Query<SinceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let changes = state
        .db
        .call(move |db| match query.since {
            Some(since) => db.file_changes_since(task_id, since),
            None => db.file_changes_by_task(task_id),
        })
        .await?;
    Ok(Json(changes))
}

async fn create_file_change(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<FileChangeBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let change = state
        .db
        .call(move |db| {
            db.create_file_change(task_id, &body.file_path, body.operation, body.additions, body.deletions)
        })
        .await?;
    state.broadcast(&RealtimeEvent::FileChanged {
        task_id,
        change: change.clone(),
    });
    Ok(Json(change))
}

async fn file_change_stats(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    Ok(Json(state.db.call(move |db| db.file_change_stats(task_id)).await?))
}

async fn diff_stats(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let changes = state.db.call(move |db| db.file_changes_by_task(task_id)).await?;
    Ok(Json(DiffStats::from_changes(&changes)))
}

// ── Tool logs ─────────────────────────────────────────────────────────

async fn list_tool_logs(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(query): Query<ToolLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let logs = state
        .db
        .call(move |db| {
            if query.running {
                db.running_tool_logs(task_id)
            } else if let Some(limit) = query.limit {
                db.recent_tool_logs(task_id, limit.min(DEFAULT_RECENT_LIMIT))
            } else {
                db.tool_logs_by_task(task_id)
            }
        })
        .await?;
    Ok(Json(logs))
}

async fn create_tool_log(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<ToolLogBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let log = state
        .db
        .call(move |db| db.create_tool_log(task_id, &body.tool_name, &body.args))
        .await?;
    state.broadcast(&RealtimeEvent::ToolLogChanged {
        task_id,
        log: log.clone(),
    });
    Ok(Json(log))
}

async fn update_tool_log(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<ToolLogUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = state.db.call(move |db| db.require_tool_log(id)).await?;
    state.task_for(&user, existing.task_id).await?;
    let log = state.db.call(move |db| db.update_tool_log(id, &update)).await?;
    if let Some(duration) = log.duration_ms {
        tracing::debug!(tool = %log.tool_name, status = %log.status, duration_ms = duration, "tool finished");
    }
    state.broadcast(&RealtimeEvent::ToolLogChanged {
        task_id: log.task_id,
        log: log.clone(),
    });
    Ok(Json(log))
}

async fn tool_log_stats(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    Ok(Json(state.db.call(move |db| db.tool_log_stats(task_id)).await?))
}

// ── Terminal output ───────────────────────────────────────────────────

async fn list_terminal(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(query): Query<SinceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let output = state
        .db
        .call(move |db| match query.since {
            Some(since) => db.terminal_output_since(task_id, since),
            None => db.terminal_output_by_task(task_id),
        })
        .await?;
    Ok(Json(output))
}

async fn append_terminal(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<TerminalBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new = NewTerminalOutput {
        task_id,
        command_id: body.command_id,
        content: body.content,
        stream_type: body.stream_type,
        timestamp: body.timestamp,
    };
    let output = state.db.call(move |db| db.append_terminal_output(&new)).await?;
    state.broadcast(&RealtimeEvent::TerminalOutput {
        task_id,
        output: output.clone(),
    });
    Ok(Json(output))
}

async fn combined_output(
    State(state): State<SharedState>,
    user: AuthUser,
    Path((task_id, command_id)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let chunks_belong = {
        let command_id = command_id.clone();
        state
            .db
            .call(move |db| {
                let chunks = db.terminal_output_by_command(&command_id)?;
                Ok(chunks.iter().all(|c| c.task_id == task_id))
            })
            .await?
    };
    if !chunks_belong {
        return Err(ApiError::Forbidden("Forbidden".into()));
    }
    Ok(Json(state.db.call(move |db| db.combined_output(&command_id)).await?))
}

// ── Workspace status ──────────────────────────────────────────────────

async fn workspace_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    Ok(Json(state.db.call(move |db| db.workspace_status(task_id)).await?))
}

async fn put_workspace_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(patch): Json<WorkspaceStatusPatch>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let status = state
        .db
        .call(move |db| db.upsert_workspace_status(task_id, &patch))
        .await?;
    if !status.is_healthy {
        tracing::warn!(task_id, "workspace reported unhealthy");
    }
    state.broadcast(&RealtimeEvent::WorkspaceStatusChanged {
        task_id,
        status: status.clone(),
    });
    Ok(Json(status))
}
