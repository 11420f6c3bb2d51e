use rusqlite::{Row, params};
use tasklane_common::models::{FileChange, FileChangeStats, FileOperation};

use super::{Store, now_ms, parse_column};
use crate::errors::StoreResult;

const FILE_CHANGE_COLUMNS: &str =
    "id, task_id, file_path, operation, additions, deletions, created_at";

fn file_change_from_row(row: &Row) -> rusqlite::Result<(FileChange, String)> {
    Ok((
        FileChange {
            id: row.get(0)?,
            task_id: row.get(1)?,
            file_path: row.get(2)?,
            operation: FileOperation::Update,
            additions: row.get(4)?,
            deletions: row.get(5)?,
            created_at: row.get(6)?,
        },
        row.get(3)?,
    ))
}

impl Store {
    pub fn create_file_change(
        &self,
        task_id: i64,
        file_path: &str,
        operation: FileOperation,
        additions: i64,
        deletions: i64,
    ) -> StoreResult<FileChange> {
        self.require_task(task_id)?;
        let created_at = now_ms();
        self.conn.execute(
            "INSERT INTO file_changes (task_id, file_path, operation, additions, deletions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, file_path, operation.as_str(), additions, deletions, created_at],
        )?;
        Ok(FileChange {
            id: self.conn.last_insert_rowid(),
            task_id,
            file_path: file_path.to_string(),
            operation,
            additions,
            deletions,
            created_at,
        })
    }

    pub fn file_changes_by_task(&self, task_id: i64) -> StoreResult<Vec<FileChange>> {
        self.query_file_changes(
            &format!(
                "SELECT {FILE_CHANGE_COLUMNS} FROM file_changes
                 WHERE task_id = ?1 ORDER BY created_at, id"
            ),
            params![task_id],
        )
    }

    /// Changes recorded strictly after `since` (epoch ms).
    pub fn file_changes_since(&self, task_id: i64, since: i64) -> StoreResult<Vec<FileChange>> {
        self.query_file_changes(
            &format!(
                "SELECT {FILE_CHANGE_COLUMNS} FROM file_changes
                 WHERE task_id = ?1 AND created_at > ?2 ORDER BY created_at, id"
            ),
            params![task_id, since],
        )
    }

    pub fn file_change_stats(&self, task_id: i64) -> StoreResult<FileChangeStats> {
        let changes = self.file_changes_by_task(task_id)?;
        let mut stats = FileChangeStats::default();
        for change in &changes {
            stats.total_changes += 1;
            stats.total_additions += change.additions;
            stats.total_deletions += change.deletions;
            match change.operation {
                FileOperation::Create => stats.creates += 1,
                FileOperation::Update => stats.updates += 1,
                FileOperation::Delete => stats.deletes += 1,
                FileOperation::Rename => stats.renames += 1,
            }
        }
        Ok(stats)
    }

    pub fn delete_file_changes(&self, task_id: i64) -> StoreResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM file_changes WHERE task_id = ?1", params![task_id])?;
        Ok(count)
    }

    fn query_file_changes(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<FileChange>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, file_change_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(mut change, operation)| {
                change.operation = parse_column(&operation)?;
                Ok(change)
            })
            .collect()
    }
}
