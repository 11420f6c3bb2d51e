use std::sync::LazyLock;

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use regex::Regex;
use serde_json::json;
use tasklane_common::models::TaskStatus;

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::backend::InitiateTask;
use crate::realtime::HybridTask;
use crate::store::{NewTask, SCRATCHPAD_BASE_BRANCH, TaskPatch};
use crate::ws::RealtimeEvent;

pub const MAX_MESSAGE_CHARS: usize = 100_000;
const MAX_TITLE_CHARS: usize = 50;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/live", get(live_view))
        .route("/api/tasks/{id}/files/tree", get(file_tree))
        .route("/api/tasks/{id}/pull-request", post(create_pull_request))
}

// ── Task creation form ────────────────────────────────────────────────

/// Raw multipart fields of a create-task request. Absent fields stay `None`.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskForm {
    pub message: Option<String>,
    pub model: Option<String>,
    pub repo_full_name: Option<String>,
    pub repo_url: Option<String>,
    pub base_branch: Option<String>,
    pub is_scratchpad: bool,
}

/// A form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidTask {
    pub message: String,
    pub model: String,
    pub repo_full_name: String,
    pub repo_url: String,
    pub base_branch: String,
    pub is_scratchpad: bool,
}

// `/abs`, `./rel`, `../rel`, `~/home` or a Windows drive path
static LOCAL_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/|\./|\.\./|~|[A-Za-z]:[/\\])").unwrap());

pub fn is_local_path(value: &str) -> bool {
    LOCAL_PATH_REGEX.is_match(value)
}

fn is_github_url(value: &str) -> bool {
    url::Url::parse(value)
        .is_ok_and(|u| u.scheme() == "https" && u.host_str() == Some("github.com"))
}

/// `local/<last directory>` for a repository on disk.
pub fn local_repo_full_name(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let name = normalized
        .trim_end_matches('/')
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("local-repo");
    format!("local/{name}")
}

/// First non-empty line of the prompt, capped at 50 characters.
pub fn derive_title(message: &str) -> String {
    let line = message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let title: String = line.chars().take(MAX_TITLE_CHARS).collect();
    if title.is_empty() {
        "Untitled task".to_string()
    } else {
        title
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl CreateTaskForm {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let value = field.text().await.map_err(|e| ApiError::Internal(e.to_string()))?;
            match name.as_str() {
                "message" => form.message = Some(value),
                "model" => form.model = Some(value),
                "repoFullName" => form.repo_full_name = Some(value),
                "repoUrl" => form.repo_url = Some(value),
                "baseBranch" => form.base_branch = Some(value),
                "isScratchpad" => form.is_scratchpad = value == "true",
                _ => {}
            }
        }
        Ok(form)
    }

    /// Check every rule and report all failures at once.
    pub fn validate(&self) -> Result<ValidTask, String> {
        let mut issues: Vec<&str> = Vec::new();

        match self.message.as_deref() {
            None | Some("") => issues.push("Message is required"),
            Some(m) if m.chars().count() > MAX_MESSAGE_CHARS => issues.push("Message too long"),
            Some(_) => {}
        }
        if non_empty(&self.model).is_none() {
            issues.push("Model is required");
        }
        if let Some(url) = non_empty(&self.repo_url) {
            if !is_github_url(url) && !is_local_path(url) {
                issues.push("Must be a GitHub URL or local filesystem path");
            }
        }
        if !self.is_scratchpad {
            if non_empty(&self.repo_full_name).is_none() {
                issues.push("Repository name is required");
            }
            if non_empty(&self.repo_url).is_none() {
                issues.push("Repository URL or path is required");
            }
            if non_empty(&self.base_branch).is_none() {
                issues.push("Base branch is required");
            }
        }
        if !issues.is_empty() {
            return Err(format!("Validation failed: {}", issues.join(", ")));
        }

        let message = self.message.clone().unwrap_or_default();
        let model = self.model.clone().unwrap_or_default();
        if self.is_scratchpad {
            // the store derives the repo name and URL from the new id
            return Ok(ValidTask {
                message,
                model,
                repo_full_name: String::new(),
                repo_url: String::new(),
                base_branch: SCRATCHPAD_BASE_BRANCH.to_string(),
                is_scratchpad: true,
            });
        }

        let repo_url = non_empty(&self.repo_url).unwrap_or_default().to_string();
        let repo_full_name = if is_local_path(&repo_url) {
            local_repo_full_name(&repo_url)
        } else {
            non_empty(&self.repo_full_name).unwrap_or_default().to_string()
        };
        Ok(ValidTask {
            message,
            model,
            repo_full_name,
            repo_url,
            base_branch: non_empty(&self.base_branch).unwrap_or("main").to_string(),
            is_scratchpad: false,
        })
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn list_tasks(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let tasks = state
        .db
        .call(move |db| db.list_tasks_by_user(user_id))
        .await
        .map_err(|e| {
            tracing::error!(user_id, error = %e, "failed to list tasks");
            ApiError::Internal("Internal server error".into())
        })?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn create_task(
    State(state): State<SharedState>,
    user: AuthUser,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = CreateTaskForm::from_multipart(multipart).await?;
    let valid = form.validate().map_err(ApiError::Internal)?;
    let user_id = user.id();

    if let Some(max) = state.config.limits.max_active_tasks {
        let active = state
            .db
            .call(move |db| db.count_active_tasks(user_id))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if active >= max {
            return Err(ApiError::Internal(format!(
                "You have reached the maximum of {max} active tasks. \
                 Please complete or archive existing tasks to create new ones."
            )));
        }
    }

    let new = NewTask {
        user_id,
        title: derive_title(&valid.message),
        repo_full_name: valid.repo_full_name.clone(),
        repo_url: valid.repo_url.clone(),
        is_scratchpad: valid.is_scratchpad,
        main_model: Some(valid.model.clone()),
        base_branch: valid.base_branch.clone(),
        shadow_branch: None,
        github_issue_id: None,
    };
    let message = valid.message.clone();
    let model = valid.model.clone();
    let (task, first) = state
        .db
        .call(move |db| db.create_task_with_message(&new, &message, Some(&model)))
        .await
        .map_err(|e| {
            tracing::error!(user_id, error = %e, "failed to create task");
            ApiError::Internal("Failed to create task".into())
        })?;
    let task_id = task.id;
    tracing::info!(task_id, user_id, scratchpad = task.is_scratchpad, "task created");
    state.broadcast(&RealtimeEvent::TaskCreated { task });
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id,
        message_id: Some(first.id),
    });

    let initiate = InitiateTask {
        message: valid.message,
        model: valid.model,
        user_id,
    };
    if let Err(e) = state.backend.initiate_task(task_id, &initiate).await {
        tracing::warn!(task_id, error = %e, "task initiation failed");
        let patch = TaskPatch {
            status: Some(TaskStatus::Failed),
            initialization_error: Some(format!("Initialization failed: {e}")),
            ..TaskPatch::default()
        };
        match state.db.call(move |db| db.update_task(task_id, &patch)).await {
            Ok(task) => state.broadcast(&RealtimeEvent::TaskUpdated { task }),
            Err(e) => tracing::error!(task_id, error = %e, "failed to mark task as failed"),
        }
    }

    Ok(Json(json!({ "taskId": task_id })))
}

async fn get_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.task_for(&user, id).await?))
}

async fn update_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, id).await?;
    let task = state.db.call(move |db| db.update_task(id, &patch)).await?;
    state.broadcast(&RealtimeEvent::TaskUpdated { task: task.clone() });
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, id).await?;
    let deleted = state.db.call(move |db| db.delete_task(id)).await?;
    if deleted {
        state.broadcast(&RealtimeEvent::TaskDeleted { task_id: id });
    }
    Ok(Json(json!({ "success": deleted })))
}

/// One-shot reconciled view. An id that does not parse gives the empty view.
async fn live_view(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(raw_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if let Ok(id) = raw_id.parse::<i64>() {
        state.task_for(&user, id).await?;
    }
    let mut live = HybridTask::new(Some(&raw_id), state.config.realtime.transport, state.db.clone());
    live.refresh().await?;
    Ok(Json(live.view()))
}

async fn file_tree(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, id).await?;
    let tree = state.backend.file_tree(id).await.map_err(|e| {
        tracing::error!(task_id = id, error = %e, "backend file tree request failed");
        ApiError::Internal("Failed to fetch file tree from backend".into())
    })?;
    Ok(Json(tree))
}

async fn create_pull_request(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, id).await?;
    let result = state
        .backend
        .create_pull_request(id, user.id())
        .await
        .map_err(|e| {
            tracing::error!(task_id = id, error = %e, "backend pull request failed");
            ApiError::Internal(e.to_string())
        })?;
    Ok(Json(result))
}
