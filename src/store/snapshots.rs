use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{PullRequestSnapshot, PullRequestStatus};

use super::{Store, now_ms, parse_column};
use crate::errors::StoreResult;

/// PR state captured at the moment a message created or updated it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot {
    pub status: PullRequestStatus,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files_changed: i64,
    #[serde(default)]
    pub lines_added: i64,
    #[serde(default)]
    pub lines_removed: i64,
    #[serde(default)]
    pub commit_sha: String,
}

const SNAPSHOT_COLUMNS: &str = "s.id, s.message_id, s.status, s.title, s.description, \
    s.files_changed, s.lines_added, s.lines_removed, s.commit_sha, s.created_at";

fn snapshot_from_row(row: &Row) -> rusqlite::Result<(PullRequestSnapshot, String)> {
    let status: String = row.get(2)?;
    Ok((
        PullRequestSnapshot {
            id: row.get(0)?,
            message_id: row.get(1)?,
            status: PullRequestStatus::Created,
            title: row.get(3)?,
            description: row.get(4)?,
            files_changed: row.get(5)?,
            lines_added: row.get(6)?,
            lines_removed: row.get(7)?,
            commit_sha: row.get(8)?,
            created_at: row.get(9)?,
        },
        status,
    ))
}

fn with_status((mut snapshot, status): (PullRequestSnapshot, String)) -> StoreResult<PullRequestSnapshot> {
    snapshot.status = parse_column(&status)?;
    Ok(snapshot)
}

impl Store {
    /// Attach (or replace) the PR snapshot of a message.
    pub fn upsert_snapshot(&self, message_id: i64, new: &NewSnapshot) -> StoreResult<PullRequestSnapshot> {
        self.require_message(message_id)?;
        self.conn.execute(
            "INSERT INTO pull_request_snapshots (message_id, status, title, description,
                files_changed, lines_added, lines_removed, commit_sha, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(message_id) DO UPDATE SET
                status = excluded.status,
                title = excluded.title,
                description = excluded.description,
                files_changed = excluded.files_changed,
                lines_added = excluded.lines_added,
                lines_removed = excluded.lines_removed,
                commit_sha = excluded.commit_sha",
            params![
                message_id,
                new.status.as_str(),
                new.title,
                new.description,
                new.files_changed,
                new.lines_added,
                new.lines_removed,
                new.commit_sha,
                now_ms(),
            ],
        )?;
        let snapshot = self.snapshot_for_message(message_id)?;
        snapshot.ok_or_else(|| anyhow::anyhow!("snapshot vanished after upsert").into())
    }

    pub fn snapshot_for_message(&self, message_id: i64) -> StoreResult<Option<PullRequestSnapshot>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM pull_request_snapshots s WHERE s.message_id = ?1"),
                params![message_id],
                snapshot_from_row,
            )
            .optional()?;
        row.map(with_status).transpose()
    }

    pub(crate) fn snapshots_for_task(&self, task_id: i64) -> StoreResult<Vec<PullRequestSnapshot>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM pull_request_snapshots s
             JOIN chat_messages m ON m.id = s.message_id
             WHERE m.task_id = ?1"
        ))?;
        let rows = stmt
            .query_map(params![task_id], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(with_status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::store::test_support;
    use crate::store::NewMessage;
    use tasklane_common::models::MessageRole;

    #[test]
    fn test_upsert_replaces_snapshot() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let message = store.append(&NewMessage {
            task_id: task.id,
            role: MessageRole::Assistant,
            content: "Opened a PR".into(),
            llm_model: None,
            metadata: None,
            client_message_id: None,
            status: None,
        })?;
        let mut snapshot = NewSnapshot {
            status: PullRequestStatus::Created,
            title: "Fix login".into(),
            description: "Handles expired cookies".into(),
            files_changed: 2,
            lines_added: 30,
            lines_removed: 4,
            commit_sha: "aaa111".into(),
        };
        let first = store.upsert_snapshot(message.message_id, &snapshot)?;

        snapshot.status = PullRequestStatus::Updated;
        snapshot.commit_sha = "bbb222".into();
        let second = store.upsert_snapshot(message.message_id, &snapshot)?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, PullRequestStatus::Updated);
        assert_eq!(second.commit_sha, "bbb222");
        assert_eq!(store.snapshots_for_task(task.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_snapshot_requires_message() {
        let store = test_support::store();
        let err = store
            .upsert_snapshot(
                5,
                &NewSnapshot {
                    status: PullRequestStatus::Created,
                    title: "x".into(),
                    description: String::new(),
                    files_changed: 0,
                    lines_added: 0,
                    lines_removed: 0,
                    commit_sha: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
