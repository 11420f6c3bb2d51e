use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{
    ChatMessage, InitStatus, MessageRole, MessageStatus, Task, TaskStatus,
};

use super::messages::NewMessage;
use super::{Store, now_ms, parse_column};
use crate::errors::{StoreError, StoreResult};

pub const SCRATCHPAD_OWNER: &str = "scratchpad";
pub const SCRATCHPAD_URL_SCHEME: &str = "scratchpad://";
pub const SCRATCHPAD_BASE_BRANCH: &str = "scratchpad-main";

#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: i64,
    pub title: String,
    pub repo_full_name: String,
    pub repo_url: String,
    pub is_scratchpad: bool,
    pub main_model: Option<String>,
    pub base_branch: String,
    /// Defaults to `shadow/task-{id}`.
    pub shadow_branch: Option<String>,
    pub github_issue_id: Option<String>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub init_status: Option<InitStatus>,
    pub main_model: Option<String>,
    pub workspace_path: Option<String>,
    pub scheduled_cleanup_at: Option<i64>,
    pub initialization_error: Option<String>,
    pub error_message: Option<String>,
    pub workspace_cleaned_up: Option<bool>,
    pub has_been_initialized: Option<bool>,
    pub base_commit_sha: Option<String>,
    pub shadow_branch: Option<String>,
    pub pull_request_number: Option<i64>,
}

const TASK_COLUMNS: &str = "id, user_id, title, status, repo_full_name, repo_url, is_scratchpad, \
    main_model, workspace_path, init_status, scheduled_cleanup_at, initialization_error, \
    error_message, workspace_cleaned_up, has_been_initialized, base_branch, base_commit_sha, \
    shadow_branch, pull_request_number, github_issue_id, created_at, updated_at";

/// Intermediate row struct for tasks before the status columns are parsed.
struct TaskRow {
    id: i64,
    user_id: i64,
    title: String,
    status: String,
    repo_full_name: String,
    repo_url: String,
    is_scratchpad: bool,
    main_model: Option<String>,
    workspace_path: Option<String>,
    init_status: String,
    scheduled_cleanup_at: Option<i64>,
    initialization_error: Option<String>,
    error_message: Option<String>,
    workspace_cleaned_up: bool,
    has_been_initialized: bool,
    base_branch: String,
    base_commit_sha: Option<String>,
    shadow_branch: Option<String>,
    pull_request_number: Option<i64>,
    github_issue_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            status: row.get(3)?,
            repo_full_name: row.get(4)?,
            repo_url: row.get(5)?,
            is_scratchpad: row.get(6)?,
            main_model: row.get(7)?,
            workspace_path: row.get(8)?,
            init_status: row.get(9)?,
            scheduled_cleanup_at: row.get(10)?,
            initialization_error: row.get(11)?,
            error_message: row.get(12)?,
            workspace_cleaned_up: row.get(13)?,
            has_been_initialized: row.get(14)?,
            base_branch: row.get(15)?,
            base_commit_sha: row.get(16)?,
            shadow_branch: row.get(17)?,
            pull_request_number: row.get(18)?,
            github_issue_id: row.get(19)?,
            created_at: row.get(20)?,
            updated_at: row.get(21)?,
        })
    }

    fn into_task(self) -> StoreResult<Task> {
        Ok(Task {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            status: parse_column(&self.status)?,
            repo_full_name: self.repo_full_name,
            repo_url: self.repo_url,
            is_scratchpad: self.is_scratchpad,
            main_model: self.main_model,
            workspace_path: self.workspace_path,
            init_status: parse_column(&self.init_status)?,
            scheduled_cleanup_at: self.scheduled_cleanup_at,
            initialization_error: self.initialization_error,
            error_message: self.error_message,
            workspace_cleaned_up: self.workspace_cleaned_up,
            has_been_initialized: self.has_been_initialized,
            base_branch: self.base_branch,
            base_commit_sha: self.base_commit_sha,
            shadow_branch: self.shadow_branch,
            pull_request_number: self.pull_request_number,
            github_issue_id: self.github_issue_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Store {
    /// Insert a task in INITIALIZING / INACTIVE state.
    ///
    /// Scratchpad tasks get their repo name and URL from the new id.
    pub fn create_task(&self, new: &NewTask) -> StoreResult<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let id = self.insert_task(new)?;
        tx.commit()?;
        self.require_task(id)
    }

    fn insert_task(&self, new: &NewTask) -> StoreResult<i64> {
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO tasks (user_id, title, status, repo_full_name, repo_url, is_scratchpad,
                main_model, init_status, base_branch, github_issue_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                new.user_id,
                new.title,
                TaskStatus::Initializing.as_str(),
                new.repo_full_name,
                new.repo_url,
                new.is_scratchpad,
                new.main_model,
                InitStatus::Inactive.as_str(),
                new.base_branch,
                new.github_issue_id,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        let shadow_branch = new
            .shadow_branch
            .clone()
            .unwrap_or_else(|| format!("shadow/task-{id}"));
        self.conn.execute(
            "UPDATE tasks SET shadow_branch = ?1 WHERE id = ?2",
            params![shadow_branch, id],
        )?;
        if new.is_scratchpad {
            self.conn.execute(
                "UPDATE tasks SET repo_full_name = ?1, repo_url = ?2 WHERE id = ?3",
                params![
                    format!("{SCRATCHPAD_OWNER}/{id}"),
                    format!("{SCRATCHPAD_URL_SCHEME}{id}"),
                    id
                ],
            )?;
        }
        Ok(id)
    }

    /// Create a task and its first USER message in one transaction.
    pub fn create_task_with_message(
        &self,
        new: &NewTask,
        content: &str,
        llm_model: Option<&str>,
    ) -> StoreResult<(Task, ChatMessage)> {
        let tx = self.conn.unchecked_transaction()?;
        let task_id = self.insert_task(new)?;
        let appended = self.append(&NewMessage {
            task_id,
            role: MessageRole::User,
            content: content.to_string(),
            llm_model: llm_model.map(str::to_string),
            metadata: None,
            client_message_id: None,
            status: Some(MessageStatus::Complete),
        })?;
        tx.commit()?;
        let message = self.require_message(appended.message_id)?;
        Ok((self.require_task(task_id)?, message))
    }

    pub fn get_task(&self, id: i64) -> StoreResult<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    pub fn require_task(&self, id: i64) -> StoreResult<Task> {
        self.get_task(id)?
            .ok_or_else(|| StoreError::not_found("Task not found"))
    }

    /// The user's tasks, newest first.
    pub fn list_tasks_by_user(&self, user_id: i64) -> StoreResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_id], TaskRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TaskRow::into_task).collect()
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> StoreResult<Task> {
        let count = self.conn.execute(
            "UPDATE tasks SET
                title = COALESCE(?1, title),
                status = COALESCE(?2, status),
                init_status = COALESCE(?3, init_status),
                main_model = COALESCE(?4, main_model),
                workspace_path = COALESCE(?5, workspace_path),
                scheduled_cleanup_at = COALESCE(?6, scheduled_cleanup_at),
                initialization_error = COALESCE(?7, initialization_error),
                error_message = COALESCE(?8, error_message),
                workspace_cleaned_up = COALESCE(?9, workspace_cleaned_up),
                has_been_initialized = COALESCE(?10, has_been_initialized),
                base_commit_sha = COALESCE(?11, base_commit_sha),
                shadow_branch = COALESCE(?12, shadow_branch),
                pull_request_number = COALESCE(?13, pull_request_number),
                updated_at = ?14
             WHERE id = ?15",
            params![
                patch.title,
                patch.status.map(|s| s.as_str()),
                patch.init_status.map(|s| s.as_str()),
                patch.main_model,
                patch.workspace_path,
                patch.scheduled_cleanup_at,
                patch.initialization_error,
                patch.error_message,
                patch.workspace_cleaned_up,
                patch.has_been_initialized,
                patch.base_commit_sha,
                patch.shadow_branch,
                patch.pull_request_number,
                now_ms(),
                id,
            ],
        )?;
        if count == 0 {
            return Err(StoreError::not_found("Task not found"));
        }
        self.require_task(id)
    }

    pub fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> StoreResult<Task> {
        self.update_task(
            id,
            &TaskPatch {
                status: Some(status),
                error_message: error_message.map(str::to_string),
                ..TaskPatch::default()
            },
        )
    }

    /// Tasks of this user that still hold a workspace.
    pub fn count_active_tasks(&self, user_id: i64) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND status IN (?2, ?3)",
            params![
                user_id,
                TaskStatus::Initializing.as_str(),
                TaskStatus::Running.as_str()
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete a task after clearing every child record.
    pub fn delete_task(&self, id: i64) -> StoreResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM pull_request_snapshots
             WHERE message_id IN (SELECT id FROM chat_messages WHERE task_id = ?1)",
            params![id],
        )?;
        for table in [
            "chat_messages",
            "todos",
            "memories",
            "file_changes",
            "tool_logs",
            "terminal_output",
            "workspace_status",
            "presence",
            "activities",
            "workflow_traces",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE task_id = ?1"), params![id])?;
        }
        let count = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(count > 0)
    }
}
