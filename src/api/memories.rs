use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;
use serde_json::json;
use tasklane_common::models::{Memory, MemoryCategory};

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::errors::StoreError;
use crate::store::{MemoryPatch, NewMemory};
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks/{id}/memories", get(list_for_task).post(create_memory))
        .route("/api/memories", get(list_for_repo))
        .route("/api/memories/{id}", patch(update_memory).delete(delete_memory))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryBody {
    content: String,
    category: MemoryCategory,
}

/// `repo` is required; `q` searches content, `category` filters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepoQuery {
    repo: String,
    #[serde(default)]
    category: Option<MemoryCategory>,
    #[serde(default)]
    q: Option<String>,
}

async fn memory_for(state: &SharedState, user: &AuthUser, id: i64) -> Result<Memory, ApiError> {
    let memory = state
        .db
        .call(move |db| db.get_memory(id)?.ok_or_else(|| StoreError::not_found("Memory not found")))
        .await?;
    if !state.config.auth.bypass && memory.user_id != user.id() {
        return Err(ApiError::Forbidden("Forbidden".into()));
    }
    Ok(memory)
}

async fn list_for_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let memories = state.db.call(move |db| db.memories_by_task(task_id)).await?;
    Ok(Json(memories))
}

async fn create_memory(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<MemoryBody>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.task_for(&user, task_id).await?;
    if body.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Memory content is required".into()));
    }
    let new = NewMemory {
        task_id,
        user_id: user.id(),
        repo_full_name: task.repo_full_name,
        content: body.content,
        category: body.category,
    };
    let memory = state.db.call(move |db| db.create_memory(&new)).await?;
    state.broadcast(&RealtimeEvent::MemoriesChanged { task_id });
    Ok(Json(memory))
}

async fn list_for_repo(
    State(state): State<SharedState>,
    user: AuthUser,
    Query(query): Query<RepoQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let memories = state
        .db
        .call(move |db| match (&query.q, query.category) {
            (Some(q), _) => db.search_memories(user_id, &query.repo, q),
            (None, Some(category)) => db.memories_by_category(user_id, &query.repo, category),
            (None, None) => db.memories_by_user_repo(user_id, &query.repo),
        })
        .await?;
    Ok(Json(memories))
}

async fn update_memory(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<MemoryPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let memory = memory_for(&state, &user, id).await?;
    let updated = state.db.call(move |db| db.update_memory(id, &patch)).await?;
    state.broadcast(&RealtimeEvent::MemoriesChanged { task_id: memory.task_id });
    Ok(Json(updated))
}

async fn delete_memory(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let memory = memory_for(&state, &user, id).await?;
    state.db.call(move |db| db.remove_memory(id)).await?;
    state.broadcast(&RealtimeEvent::MemoriesChanged { task_id: memory.task_id });
    Ok(Json(json!({ "success": true })))
}
