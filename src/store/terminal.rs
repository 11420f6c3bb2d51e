use rusqlite::{Row, params};
use serde::Deserialize;
use tasklane_common::models::{CombinedOutput, StreamType, TerminalOutput};

use super::{Store, now_ms, parse_column};
use crate::errors::StoreResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTerminalOutput {
    pub task_id: i64,
    pub command_id: String,
    pub content: String,
    pub stream_type: StreamType,
    /// When the sidecar observed the chunk; defaults to insert time.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

const TERMINAL_COLUMNS: &str = "id, task_id, command_id, content, stream_type, timestamp, created_at";

fn terminal_from_row(row: &Row) -> rusqlite::Result<(TerminalOutput, String)> {
    Ok((
        TerminalOutput {
            id: row.get(0)?,
            task_id: row.get(1)?,
            command_id: row.get(2)?,
            content: row.get(3)?,
            stream_type: StreamType::Stdout,
            timestamp: row.get(5)?,
            created_at: row.get(6)?,
        },
        row.get(4)?,
    ))
}

impl Store {
    pub fn append_terminal_output(&self, new: &NewTerminalOutput) -> StoreResult<TerminalOutput> {
        self.require_task(new.task_id)?;
        let created_at = now_ms();
        let timestamp = new.timestamp.unwrap_or(created_at);
        self.conn.execute(
            "INSERT INTO terminal_output (task_id, command_id, content, stream_type, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.task_id,
                new.command_id,
                new.content,
                new.stream_type.as_str(),
                timestamp,
                created_at,
            ],
        )?;
        Ok(TerminalOutput {
            id: self.conn.last_insert_rowid(),
            task_id: new.task_id,
            command_id: new.command_id.clone(),
            content: new.content.clone(),
            stream_type: new.stream_type,
            timestamp,
            created_at,
        })
    }

    pub fn terminal_output_by_task(&self, task_id: i64) -> StoreResult<Vec<TerminalOutput>> {
        self.query_terminal(
            &format!("SELECT {TERMINAL_COLUMNS} FROM terminal_output WHERE task_id = ?1 ORDER BY timestamp, id"),
            params![task_id],
        )
    }

    pub fn terminal_output_by_command(&self, command_id: &str) -> StoreResult<Vec<TerminalOutput>> {
        self.query_terminal(
            &format!(
                "SELECT {TERMINAL_COLUMNS} FROM terminal_output WHERE command_id = ?1 ORDER BY timestamp, id"
            ),
            params![command_id],
        )
    }

    pub fn terminal_output_since(&self, task_id: i64, since: i64) -> StoreResult<Vec<TerminalOutput>> {
        self.query_terminal(
            &format!(
                "SELECT {TERMINAL_COLUMNS} FROM terminal_output
                 WHERE task_id = ?1 AND timestamp > ?2 ORDER BY timestamp, id"
            ),
            params![task_id, since],
        )
    }

    /// Concatenated stdout and stderr of one command, in timestamp order.
    pub fn combined_output(&self, command_id: &str) -> StoreResult<CombinedOutput> {
        let mut combined = CombinedOutput::default();
        for chunk in self.terminal_output_by_command(command_id)? {
            match chunk.stream_type {
                StreamType::Stdout => combined.stdout.push_str(&chunk.content),
                StreamType::Stderr => combined.stderr.push_str(&chunk.content),
            }
        }
        Ok(combined)
    }

    pub fn delete_terminal_output_by_command(&self, command_id: &str) -> StoreResult<usize> {
        let count = self.conn.execute(
            "DELETE FROM terminal_output WHERE command_id = ?1",
            params![command_id],
        )?;
        Ok(count)
    }

    pub fn delete_terminal_output(&self, task_id: i64) -> StoreResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM terminal_output WHERE task_id = ?1", params![task_id])?;
        Ok(count)
    }

    fn query_terminal(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<TerminalOutput>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, terminal_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(mut output, stream_type)| {
                output.stream_type = parse_column(&stream_type)?;
                Ok(output)
            })
            .collect()
    }
}
