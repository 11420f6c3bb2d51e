use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasklane_common::models::{Activity, ActivityType, Cursor, Presence, PresenceActivity, Selection};

use super::{Store, now_ms, parse_column};
use crate::errors::StoreResult;

pub const DEFAULT_ACTIVITY_LIMIT: usize = 50;

/// One presence heartbeat from a viewer of a task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub task_id: i64,
    pub user_id: i64,
    pub user_name: String,
    #[serde(default)]
    pub user_image: Option<String>,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    #[serde(default)]
    pub selection: Option<Selection>,
    #[serde(default)]
    pub activity: Option<PresenceActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub task_id: i64,
    pub user_id: i64,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub metadata: Option<Value>,
}

struct PresenceRow {
    id: i64,
    task_id: i64,
    user_id: i64,
    user_name: String,
    user_image: Option<String>,
    cursor: Option<String>,
    selection: Option<String>,
    activity: String,
    last_seen_at: i64,
    created_at: i64,
}

impl PresenceRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            user_id: row.get(2)?,
            user_name: row.get(3)?,
            user_image: row.get(4)?,
            cursor: row.get(5)?,
            selection: row.get(6)?,
            activity: row.get(7)?,
            last_seen_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_presence(self) -> StoreResult<Presence> {
        Ok(Presence {
            id: self.id,
            task_id: self.task_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_image: self.user_image,
            cursor: self.cursor.as_deref().map(serde_json::from_str::<Cursor>).transpose()?,
            selection: self.selection.as_deref().map(serde_json::from_str::<Selection>).transpose()?,
            activity: parse_column(&self.activity)?,
            last_seen_at: self.last_seen_at,
            created_at: self.created_at,
        })
    }
}

fn to_json_column<T: Serialize>(value: Option<&T>) -> StoreResult<Option<String>> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

impl Store {
    /// Upsert the caller's presence row and refresh `last_seen_at`.
    pub fn update_presence(&self, update: &PresenceUpdate) -> StoreResult<PresenceAction> {
        self.require_task(update.task_id)?;
        let now = now_ms();
        let cursor = to_json_column(update.cursor.as_ref())?;
        let selection = to_json_column(update.selection.as_ref())?;
        let activity = update.activity.unwrap_or_default();

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM presence WHERE task_id = ?1 AND user_id = ?2",
                params![update.task_id, update.user_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                self.conn.execute(
                    "UPDATE presence SET user_name = ?1, user_image = ?2, cursor = ?3,
                        selection = ?4, activity = ?5, last_seen_at = ?6
                     WHERE id = ?7",
                    params![
                        update.user_name,
                        update.user_image,
                        cursor,
                        selection,
                        activity.as_str(),
                        now,
                        id,
                    ],
                )?;
                Ok(PresenceAction::Updated)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO presence (task_id, user_id, user_name, user_image, cursor,
                        selection, activity, last_seen_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![
                        update.task_id,
                        update.user_id,
                        update.user_name,
                        update.user_image,
                        cursor,
                        selection,
                        activity.as_str(),
                        now,
                    ],
                )?;
                Ok(PresenceAction::Created)
            }
        }
    }

    /// Viewers of a task seen within the last `timeout_ms`.
    pub fn active_users(&self, task_id: i64, timeout_ms: i64) -> StoreResult<Vec<Presence>> {
        let cutoff = now_ms() - timeout_ms;
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, user_id, user_name, user_image, cursor, selection, activity,
                last_seen_at, created_at
             FROM presence WHERE task_id = ?1 AND last_seen_at >= ?2
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![task_id, cutoff], PresenceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(PresenceRow::into_presence).collect()
    }

    pub fn remove_presence(&self, task_id: i64, user_id: i64) -> StoreResult<bool> {
        let count = self.conn.execute(
            "DELETE FROM presence WHERE task_id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
        Ok(count > 0)
    }

    /// Drop presence rows older than `timeout_ms` across all tasks.
    pub fn cleanup_stale_presence(&self, timeout_ms: i64) -> StoreResult<usize> {
        let cutoff = now_ms() - timeout_ms;
        let count = self
            .conn
            .execute("DELETE FROM presence WHERE last_seen_at < ?1", params![cutoff])?;
        Ok(count)
    }

    pub fn record_activity(&self, new: &NewActivity) -> StoreResult<Activity> {
        self.require_task(new.task_id)?;
        let created_at = now_ms();
        let metadata = to_json_column(new.metadata.as_ref())?;
        self.conn.execute(
            "INSERT INTO activities (task_id, user_id, activity_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.task_id,
                new.user_id,
                new.activity_type.as_str(),
                metadata,
                created_at,
            ],
        )?;
        Ok(Activity {
            id: self.conn.last_insert_rowid(),
            task_id: new.task_id,
            user_id: new.user_id,
            activity_type: new.activity_type,
            metadata: new.metadata.clone(),
            created_at,
        })
    }

    /// The newest `limit` activities of a task, newest first.
    pub fn recent_activities(&self, task_id: i64, limit: usize) -> StoreResult<Vec<Activity>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, user_id, activity_type, metadata, created_at
             FROM activities WHERE task_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![task_id, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, task_id, user_id, activity_type, metadata, created_at)| {
                Ok(Activity {
                    id,
                    task_id,
                    user_id,
                    activity_type: parse_column(&activity_type)?,
                    metadata: metadata.as_deref().map(serde_json::from_str::<Value>).transpose()?,
                    created_at,
                })
            })
            .collect()
    }
}
