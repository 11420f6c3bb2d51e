//! SQLite-backed record stores.
//!
//! `Store` owns the connection; each submodule adds the operations for one
//! entity as another `impl Store` block. Async callers go through
//! [`DbHandle`].

mod connectors;
mod file_changes;
mod memories;
mod messages;
mod presence;
mod sessions;
mod snapshots;
mod tasks;
mod terminal;
mod todos;
mod tool_logs;
mod traces;
mod workspace;

pub use connectors::{ConnectorPatch, NewConnector, REDACTED, generate_name_id};
pub use memories::{MemoryPatch, NewMemory};
pub use messages::{AppendResult, AssistantForPrompt, MessagePatch, NewMessage, StreamDelta};
pub use presence::{DEFAULT_ACTIVITY_LIMIT, NewActivity, PresenceAction, PresenceUpdate};
pub use sessions::Session;
pub use snapshots::NewSnapshot;
pub use tasks::{NewTask, SCRATCHPAD_BASE_BRANCH, SCRATCHPAD_OWNER, TaskPatch};
pub use terminal::NewTerminalOutput;
pub use todos::NewTodo;
pub use tool_logs::{DEFAULT_RECENT_LIMIT, ToolLogUpdate};
pub use traces::{NewTrace, TracePatch, estimate_cost_millicents};
pub use workspace::WorkspaceStatusPatch;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::Connection;

use crate::errors::{StoreError, StoreResult};

/// Async-safe handle to the store.
///
/// Wraps `Store` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Store>>,
}

impl DbHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Store) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the store mutex synchronously. For startup and tests only;
    /// never call this from a hot async path.
    pub fn lock_sync(&self) -> StoreResult<std::sync::MutexGuard<'_, Store>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Other(anyhow::anyhow!("DB lock poisoned: {}", e)))
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> StoreResult<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    // Child tables reference their task without ON DELETE CASCADE: removing
    // a task goes through `delete_task`, which clears children first.
    fn run_migrations(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                image TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'INITIALIZING',
                repo_full_name TEXT NOT NULL DEFAULT '',
                repo_url TEXT NOT NULL DEFAULT '',
                is_scratchpad INTEGER NOT NULL DEFAULT 0,
                main_model TEXT,
                workspace_path TEXT,
                init_status TEXT NOT NULL DEFAULT 'INACTIVE',
                scheduled_cleanup_at INTEGER,
                initialization_error TEXT,
                error_message TEXT,
                workspace_cleaned_up INTEGER NOT NULL DEFAULT 0,
                has_been_initialized INTEGER NOT NULL DEFAULT 0,
                base_branch TEXT NOT NULL DEFAULT 'main',
                base_commit_sha TEXT,
                shadow_branch TEXT,
                pull_request_number INTEGER,
                github_issue_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                llm_model TEXT,
                metadata_json TEXT NOT NULL DEFAULT '',
                sequence INTEGER NOT NULL,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                finish_reason TEXT,
                status TEXT NOT NULL DEFAULT 'complete',
                prompt_message_id INTEGER,
                client_message_id TEXT,
                created_at INTEGER NOT NULL,
                edited_at INTEGER,
                UNIQUE(task_id, sequence)
            );

            CREATE TABLE IF NOT EXISTS pull_request_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL UNIQUE REFERENCES chat_messages(id),
                status TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                files_changed INTEGER NOT NULL DEFAULT 0,
                lines_added INTEGER NOT NULL DEFAULT 0,
                lines_removed INTEGER NOT NULL DEFAULT 0,
                commit_sha TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS todos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                sequence INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                repo_full_name TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                file_path TEXT NOT NULL,
                operation TEXT NOT NULL,
                additions INTEGER NOT NULL DEFAULT 0,
                deletions INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                tool_name TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT 'null',
                status TEXT NOT NULL DEFAULT 'RUNNING',
                result TEXT,
                error TEXT,
                duration_ms INTEGER,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS terminal_output (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                command_id TEXT NOT NULL,
                content TEXT NOT NULL,
                stream_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspace_status (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL UNIQUE REFERENCES tasks(id),
                is_healthy INTEGER NOT NULL DEFAULT 1,
                last_heartbeat INTEGER NOT NULL,
                active_process_count INTEGER NOT NULL DEFAULT 0,
                disk_usage_bytes INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS presence (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                user_name TEXT NOT NULL,
                user_image TEXT,
                cursor TEXT,
                selection TEXT,
                activity TEXT NOT NULL DEFAULT 'viewing',
                last_seen_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(task_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                user_id INTEGER NOT NULL REFERENCES users(id),
                activity_type TEXT NOT NULL,
                metadata TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_traces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL REFERENCES tasks(id),
                trace_id TEXT NOT NULL UNIQUE,
                message_id INTEGER,
                workflow_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'STARTED',
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                total_duration_ms INTEGER,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                estimated_cost_millicents INTEGER,
                model TEXT,
                provider TEXT,
                error_type TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mcp_connectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER REFERENCES users(id),
                name TEXT NOT NULL,
                name_id TEXT NOT NULL,
                url TEXT NOT NULL,
                transport TEXT NOT NULL DEFAULT 'HTTP',
                enabled INTEGER NOT NULL DEFAULT 1,
                oauth_client_id TEXT,
                oauth_client_secret TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_task_sequence ON chat_messages(task_id, sequence);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_id
                ON chat_messages(task_id, client_message_id)
                WHERE client_message_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS idx_messages_prompt ON chat_messages(prompt_message_id);
            CREATE INDEX IF NOT EXISTS idx_todos_task_sequence ON todos(task_id, sequence);
            CREATE INDEX IF NOT EXISTS idx_memories_task ON memories(task_id);
            CREATE INDEX IF NOT EXISTS idx_memories_user_repo ON memories(user_id, repo_full_name);
            CREATE INDEX IF NOT EXISTS idx_file_changes_task ON file_changes(task_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_tool_logs_task ON tool_logs(task_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_terminal_task ON terminal_output(task_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_terminal_command ON terminal_output(command_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_presence_task ON presence(task_id, last_seen_at);
            CREATE INDEX IF NOT EXISTS idx_activities_task ON activities(task_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_traces_task ON workflow_traces(task_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_connectors_user ON mcp_connectors(user_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_connectors_user_name
                ON mcp_connectors(COALESCE(user_id, 0), name_id);
            ",
        )
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a TEXT column into one of the wire enums.
pub(crate) fn parse_column<T>(raw: &str) -> StoreResult<T>
where
    T: FromStr<Err = String>,
{
    T::from_str(raw).map_err(|e| StoreError::Other(anyhow::anyhow!(e)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_create_all_tables() -> anyhow::Result<()> {
        let store = Store::new_in_memory()?;
        let table_count: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN (
                'users', 'sessions', 'tasks', 'chat_messages', 'pull_request_snapshots',
                'todos', 'memories', 'file_changes', 'tool_logs', 'terminal_output',
                'workspace_status', 'presence', 'activities', 'workflow_traces', 'mcp_connectors')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 15);
        Ok(())
    }

    #[test]
    fn test_migrations_are_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tasklane.db");
        Store::new(&path)?;
        Store::new(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_runs_closure() -> anyhow::Result<()> {
        let handle = DbHandle::new(Store::new_in_memory()?);
        let user = handle
            .call(|db| db.upsert_user("Ada", "ada@example.com", None))
            .await?;
        assert_eq!(user.email, "ada@example.com");
        Ok(())
    }

    #[test]
    fn test_parse_column_reports_bad_values() {
        let err = parse_column::<tasklane_common::models::TaskStatus>("NOPE").unwrap_err();
        assert!(err.to_string().contains("Invalid task status: NOPE"));
    }
}
