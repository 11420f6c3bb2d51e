use std::collections::BTreeMap;

use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use serde_json::Value;
use tasklane_common::models::{ToolLog, ToolLogStats, ToolStatus};

use super::{Store, now_ms, parse_column};
use crate::errors::{StoreError, StoreResult};

pub const DEFAULT_RECENT_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolLogUpdate {
    pub status: ToolStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

const TOOL_LOG_COLUMNS: &str =
    "id, task_id, tool_name, args, status, result, error, duration_ms, created_at, completed_at";

struct ToolLogRow {
    id: i64,
    task_id: i64,
    tool_name: String,
    args: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    duration_ms: Option<i64>,
    created_at: i64,
    completed_at: Option<i64>,
}

impl ToolLogRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            tool_name: row.get(2)?,
            args: row.get(3)?,
            status: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            duration_ms: row.get(7)?,
            created_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }

    fn into_tool_log(self) -> StoreResult<ToolLog> {
        Ok(ToolLog {
            id: self.id,
            task_id: self.task_id,
            tool_name: self.tool_name,
            args: serde_json::from_str(&self.args)?,
            status: parse_column(&self.status)?,
            result: self.result,
            error: self.error,
            duration_ms: self.duration_ms,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

impl Store {
    /// Record the start of a tool invocation; it begins RUNNING.
    pub fn create_tool_log(&self, task_id: i64, tool_name: &str, args: &Value) -> StoreResult<ToolLog> {
        self.require_task(task_id)?;
        self.conn.execute(
            "INSERT INTO tool_logs (task_id, tool_name, args, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_id,
                tool_name,
                serde_json::to_string(args)?,
                ToolStatus::Running.as_str(),
                now_ms(),
            ],
        )?;
        self.require_tool_log(self.conn.last_insert_rowid())
    }

    pub fn update_tool_log(&self, id: i64, update: &ToolLogUpdate) -> StoreResult<ToolLog> {
        let completed_at = (update.status != ToolStatus::Running).then(now_ms);
        let count = self.conn.execute(
            "UPDATE tool_logs SET
                status = ?1,
                result = COALESCE(?2, result),
                error = COALESCE(?3, error),
                duration_ms = COALESCE(?4, duration_ms),
                completed_at = COALESCE(?5, completed_at)
             WHERE id = ?6",
            params![
                update.status.as_str(),
                update.result,
                update.error,
                update.duration_ms,
                completed_at,
                id,
            ],
        )?;
        if count == 0 {
            return Err(StoreError::not_found("Tool log not found"));
        }
        self.require_tool_log(id)
    }

    pub fn require_tool_log(&self, id: i64) -> StoreResult<ToolLog> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TOOL_LOG_COLUMNS} FROM tool_logs WHERE id = ?1"),
                params![id],
                ToolLogRow::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("Tool log not found"))?;
        row.into_tool_log()
    }

    pub fn tool_logs_by_task(&self, task_id: i64) -> StoreResult<Vec<ToolLog>> {
        self.query_tool_logs(
            &format!("SELECT {TOOL_LOG_COLUMNS} FROM tool_logs WHERE task_id = ?1 ORDER BY created_at, id"),
            params![task_id],
        )
    }

    /// The newest `limit` tool calls, newest first.
    pub fn recent_tool_logs(&self, task_id: i64, limit: usize) -> StoreResult<Vec<ToolLog>> {
        self.query_tool_logs(
            &format!(
                "SELECT {TOOL_LOG_COLUMNS} FROM tool_logs
                 WHERE task_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            params![task_id, limit as i64],
        )
    }

    pub fn running_tool_logs(&self, task_id: i64) -> StoreResult<Vec<ToolLog>> {
        self.query_tool_logs(
            &format!(
                "SELECT {TOOL_LOG_COLUMNS} FROM tool_logs
                 WHERE task_id = ?1 AND status = ?2 ORDER BY created_at, id"
            ),
            params![task_id, ToolStatus::Running.as_str()],
        )
    }

    /// Counts by status and tool, plus the rounded mean duration of the
    /// calls that reported one.
    pub fn tool_log_stats(&self, task_id: i64) -> StoreResult<ToolLogStats> {
        let logs = self.tool_logs_by_task(task_id)?;
        let mut stats = ToolLogStats {
            total: logs.len() as i64,
            by_tool: BTreeMap::new(),
            ..ToolLogStats::default()
        };
        let mut durations = Vec::new();
        for log in &logs {
            match log.status {
                ToolStatus::Running => stats.running += 1,
                ToolStatus::Completed => stats.completed += 1,
                ToolStatus::Failed => stats.failed += 1,
            }
            *stats.by_tool.entry(log.tool_name.clone()).or_default() += 1;
            if let Some(duration) = log.duration_ms {
                durations.push(duration);
            }
        }
        if !durations.is_empty() {
            let sum: i64 = durations.iter().sum();
            stats.avg_duration_ms = (sum as f64 / durations.len() as f64).round() as i64;
        }
        Ok(stats)
    }

    pub fn delete_tool_logs(&self, task_id: i64) -> StoreResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM tool_logs WHERE task_id = ?1", params![task_id])?;
        Ok(count)
    }

    fn query_tool_logs(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<ToolLog>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ToolLogRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ToolLogRow::into_tool_log).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;
    use serde_json::json;

    fn finish(store: &Store, id: i64, status: ToolStatus, duration_ms: i64) -> ToolLog {
        store
            .update_tool_log(
                id,
                &ToolLogUpdate {
                    status,
                    result: Some("ok".into()),
                    error: None,
                    duration_ms: Some(duration_ms),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_lifecycle_sets_completed_at() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let log = store.create_tool_log(task.id, "read_file", &json!({"path": "README.md"}))?;
        assert_eq!(log.status, ToolStatus::Running);
        assert!(log.completed_at.is_none());
        assert_eq!(log.args["path"], "README.md");
        assert_eq!(store.running_tool_logs(task.id)?.len(), 1);

        let done = finish(&store, log.id, ToolStatus::Completed, 12);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result.as_deref(), Some("ok"));
        assert!(store.running_tool_logs(task.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_stats() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let a = store.create_tool_log(task.id, "read_file", &json!({}))?;
        let b = store.create_tool_log(task.id, "read_file", &json!({}))?;
        let c = store.create_tool_log(task.id, "run_command", &json!({"cmd": "ls"}))?;
        store.create_tool_log(task.id, "grep", &json!({}))?;
        finish(&store, a.id, ToolStatus::Completed, 10);
        finish(&store, b.id, ToolStatus::Completed, 15);
        finish(&store, c.id, ToolStatus::Failed, 20);

        let stats = store.tool_log_stats(task.id)?;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.avg_duration_ms, 15);
        assert_eq!(stats.by_tool.get("read_file"), Some(&2));
        Ok(())
    }

    #[test]
    fn test_recent_limits_newest_first() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let ids: Vec<i64> = (0..3)
            .map(|_| store.create_tool_log(task.id, "grep", &json!(null)).map(|l| l.id))
            .collect::<StoreResult<_>>()?;
        let recent = store.recent_tool_logs(task.id, 2)?;
        assert_eq!(recent.iter().map(|l| l.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
        Ok(())
    }

    #[test]
    fn test_update_missing_tool_log() {
        let store = test_support::store();
        let err = store
            .update_tool_log(
                1,
                &ToolLogUpdate {
                    status: ToolStatus::Failed,
                    result: None,
                    error: Some("boom".into()),
                    duration_ms: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
