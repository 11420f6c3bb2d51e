use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::WorkspaceStatus;

use super::{Store, now_ms};
use crate::errors::{StoreError, StoreResult};

/// Health report from the workspace sidecar. Absent fields keep their
/// previous value; every report refreshes the heartbeat.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatusPatch {
    pub is_healthy: Option<bool>,
    pub active_process_count: Option<i64>,
    pub disk_usage_bytes: Option<i64>,
}

fn status_from_row(row: &Row) -> rusqlite::Result<WorkspaceStatus> {
    Ok(WorkspaceStatus {
        id: row.get(0)?,
        task_id: row.get(1)?,
        is_healthy: row.get(2)?,
        last_heartbeat: row.get(3)?,
        active_process_count: row.get(4)?,
        disk_usage_bytes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Store {
    pub fn upsert_workspace_status(&self, task_id: i64, patch: &WorkspaceStatusPatch) -> StoreResult<WorkspaceStatus> {
        self.require_task(task_id)?;
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO workspace_status (task_id, is_healthy, last_heartbeat,
                active_process_count, disk_usage_bytes, created_at, updated_at)
             VALUES (?1, COALESCE(?2, 1), ?3, COALESCE(?4, 0), ?5, ?3, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                is_healthy = COALESCE(?2, is_healthy),
                last_heartbeat = ?3,
                active_process_count = COALESCE(?4, active_process_count),
                disk_usage_bytes = COALESCE(?5, disk_usage_bytes),
                updated_at = ?3",
            params![
                task_id,
                patch.is_healthy,
                now,
                patch.active_process_count,
                patch.disk_usage_bytes,
            ],
        )?;
        self.workspace_status(task_id)?
            .ok_or_else(|| StoreError::not_found("Workspace status not found"))
    }

    pub fn workspace_status(&self, task_id: i64) -> StoreResult<Option<WorkspaceStatus>> {
        let status = self
            .conn
            .query_row(
                "SELECT id, task_id, is_healthy, last_heartbeat, active_process_count,
                    disk_usage_bytes, created_at, updated_at
                 FROM workspace_status WHERE task_id = ?1",
                params![task_id],
                status_from_row,
            )
            .optional()?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;

    #[test]
    fn test_upsert_keeps_unreported_fields() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        assert!(store.workspace_status(task.id)?.is_none());

        let first = store.upsert_workspace_status(
            task.id,
            &WorkspaceStatusPatch {
                is_healthy: Some(true),
                active_process_count: Some(3),
                disk_usage_bytes: Some(1024),
            },
        )?;
        let second = store.upsert_workspace_status(
            task.id,
            &WorkspaceStatusPatch {
                is_healthy: Some(false),
                ..WorkspaceStatusPatch::default()
            },
        )?;
        assert_eq!(first.id, second.id);
        assert!(!second.is_healthy);
        assert_eq!(second.active_process_count, 3);
        assert_eq!(second.disk_usage_bytes, Some(1024));
        assert!(second.last_heartbeat >= first.last_heartbeat);
        Ok(())
    }
}
