use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use tasklane_common::models::{Todo, TodoStatus};

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::errors::StoreError;
use crate::store::NewTodo;
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks/{id}/todos",
            get(list_todos).post(create_todo).delete(clear_todos),
        )
        .route("/api/tasks/{id}/todos/bulk", post(bulk_create))
        .route("/api/todos/{id}", patch(update_todo).delete(delete_todo))
        .route("/api/todos/{id}/reorder", post(reorder_todo))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusFilter {
    status: Option<TodoStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoBody {
    content: String,
    #[serde(default)]
    status: Option<TodoStatus>,
    #[serde(default)]
    sequence: Option<i64>,
}

impl TodoBody {
    fn into_new(self, task_id: i64) -> NewTodo {
        NewTodo {
            task_id,
            content: self.content,
            status: self.status,
            sequence: self.sequence,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkBody {
    todos: Vec<TodoBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoUpdate {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    status: Option<TodoStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReorderBody {
    sequence: i64,
}

async fn todo_for(state: &SharedState, user: &AuthUser, id: i64) -> Result<Todo, ApiError> {
    let todo = state
        .db
        .call(move |db| db.get_todo(id)?.ok_or_else(|| StoreError::not_found("Todo not found")))
        .await?;
    state.task_for(user, todo.task_id).await?;
    Ok(todo)
}

async fn list_todos(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(filter): Query<StatusFilter>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let todos = state
        .db
        .call(move |db| match filter.status {
            Some(status) => db.todos_by_task_and_status(task_id, status),
            None => db.todos_by_task(task_id),
        })
        .await?;
    Ok(Json(todos))
}

async fn create_todo(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<TodoBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new = body.into_new(task_id);
    let todo = state.db.call(move |db| db.create_todo(&new)).await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id });
    Ok(Json(todo))
}

async fn bulk_create(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<BulkBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new: Vec<NewTodo> = body.todos.into_iter().map(|t| t.into_new(task_id)).collect();
    let todos = state.db.call(move |db| db.bulk_create_todos(&new)).await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id });
    Ok(Json(todos))
}

async fn clear_todos(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let removed = state.db.call(move |db| db.remove_all_todos(task_id)).await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id });
    Ok(Json(json!({ "removed": removed })))
}

async fn update_todo(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<TodoUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let todo = todo_for(&state, &user, id).await?;
    let updated = state
        .db
        .call(move |db| db.update_todo(id, body.content.as_deref(), body.status))
        .await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id: todo.task_id });
    Ok(Json(updated))
}

async fn delete_todo(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let todo = todo_for(&state, &user, id).await?;
    state.db.call(move |db| db.remove_todo(id)).await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id: todo.task_id });
    Ok(Json(json!({ "success": true })))
}

async fn reorder_todo(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ReorderBody>,
) -> Result<impl IntoResponse, ApiError> {
    let todo = todo_for(&state, &user, id).await?;
    let moved = state
        .db
        .call(move |db| db.reorder_todo(id, body.sequence))
        .await?;
    state.broadcast(&RealtimeEvent::TodosChanged { task_id: todo.task_id });
    Ok(Json(moved))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::TestApp;
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_bulk_create_then_reorder() {
        let app = TestApp::new();
        let task = app.task();
        let (status, created) = app
            .json(
                "POST",
                &format!("/api/tasks/{}/todos/bulk", task.id),
                json!({ "todos": [{ "content": "a" }, { "content": "b" }, { "content": "c" }] }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let first = created[0]["id"].as_i64().unwrap();

        let (status, moved) = app
            .json("POST", &format!("/api/todos/{first}/reorder"), json!({ "sequence": 2 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["sequence"], 2);

        let (_, list) = app.get(&format!("/api/tasks/{}/todos", task.id)).await;
        let order: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["content"].as_str().unwrap())
            .collect();
        assert_eq!(order, ["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_status_filter_and_update() {
        let app = TestApp::new();
        let task = app.task();
        let uri = format!("/api/tasks/{}/todos", task.id);
        let (_, todo) = app.json("POST", &uri, json!({ "content": "write tests" })).await;

        let (status, updated) = app
            .json("PATCH", &format!("/api/todos/{}", todo["id"]), json!({ "status": "COMPLETED" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "COMPLETED");

        let (_, done) = app.get(&format!("{uri}?status=COMPLETED")).await;
        assert_eq!(done.as_array().unwrap().len(), 1);
        let (_, pending) = app.get(&format!("{uri}?status=PENDING")).await;
        assert!(pending.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_todo_is_404() {
        let app = TestApp::new();
        let (status, body) = app
            .json("PATCH", "/api/todos/999", json!({ "content": "x" }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Todo not found");
    }
}
