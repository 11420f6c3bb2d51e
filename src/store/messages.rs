use std::collections::HashMap;

use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tasklane_common::MessageMetadata;
use tasklane_common::models::{ChatMessage, MessageRole, MessageStatus};

pub use crate::assembler::StreamDelta;

use super::{Store, now_ms, parse_column};
use crate::assembler::apply_delta;
use crate::errors::{StoreError, StoreResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub task_id: i64,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub llm_model: Option<String>,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
    /// Idempotency key chosen by the caller.
    #[serde(default)]
    pub client_message_id: Option<String>,
    #[serde(default)]
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResult {
    pub message_id: i64,
    pub sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantForPrompt {
    pub message_id: i64,
    pub sequence: i64,
    pub reused: bool,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    pub content: Option<String>,
    pub llm_model: Option<String>,
    pub metadata: Option<MessageMetadata>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    pub status: Option<MessageStatus>,
}

const MESSAGE_COLUMNS: &str = "id, task_id, role, content, llm_model, metadata_json, sequence, \
    prompt_tokens, completion_tokens, total_tokens, finish_reason, status, prompt_message_id, \
    client_message_id, created_at, edited_at";

struct MessageRow {
    id: i64,
    task_id: i64,
    role: String,
    content: String,
    llm_model: Option<String>,
    metadata_json: String,
    sequence: i64,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
    finish_reason: Option<String>,
    status: String,
    prompt_message_id: Option<i64>,
    client_message_id: Option<String>,
    created_at: i64,
    edited_at: Option<i64>,
}

impl MessageRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            llm_model: row.get(4)?,
            metadata_json: row.get(5)?,
            sequence: row.get(6)?,
            prompt_tokens: row.get(7)?,
            completion_tokens: row.get(8)?,
            total_tokens: row.get(9)?,
            finish_reason: row.get(10)?,
            status: row.get(11)?,
            prompt_message_id: row.get(12)?,
            client_message_id: row.get(13)?,
            created_at: row.get(14)?,
            edited_at: row.get(15)?,
        })
    }

    fn into_message(self) -> StoreResult<ChatMessage> {
        Ok(ChatMessage {
            id: self.id,
            task_id: self.task_id,
            role: parse_column(&self.role)?,
            content: self.content,
            llm_model: self.llm_model,
            metadata_json: self.metadata_json,
            sequence: self.sequence,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            finish_reason: self.finish_reason,
            status: parse_column(&self.status)?,
            prompt_message_id: self.prompt_message_id,
            client_message_id: self.client_message_id,
            created_at: self.created_at,
            edited_at: self.edited_at,
            pull_request_snapshot: None,
        })
    }
}

impl Store {
    /// Append a message at the next sequence of its task.
    ///
    /// With a `client_message_id`, a retried call returns the record the
    /// first call created instead of inserting a duplicate.
    pub fn append(&self, new: &NewMessage) -> StoreResult<AppendResult> {
        if let Some(client_id) = &new.client_message_id {
            let existing = self
                .conn
                .query_row(
                    "SELECT id, sequence FROM chat_messages
                     WHERE task_id = ?1 AND client_message_id = ?2",
                    params![new.task_id, client_id],
                    |row| {
                        Ok(AppendResult {
                            message_id: row.get(0)?,
                            sequence: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            if let Some(existing) = existing {
                return Ok(existing);
            }
        }
        self.require_task(new.task_id)?;

        let metadata = new.metadata.clone().unwrap_or_default().encode()?;
        let sequence = self.latest_sequence(new.task_id)? + 1;
        self.conn.execute(
            "INSERT INTO chat_messages (task_id, role, content, llm_model, metadata_json, sequence,
                status, client_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.task_id,
                new.role.as_str(),
                new.content,
                new.llm_model,
                metadata,
                sequence,
                new.status.unwrap_or(MessageStatus::Complete).as_str(),
                new.client_message_id,
                now_ms(),
            ],
        )?;
        Ok(AppendResult {
            message_id: self.conn.last_insert_rowid(),
            sequence,
        })
    }

    /// Open an empty assistant message for streaming.
    pub fn start_streaming(&self, task_id: i64, llm_model: Option<&str>) -> StoreResult<AppendResult> {
        self.append(&NewMessage {
            task_id,
            role: MessageRole::Assistant,
            content: String::new(),
            llm_model: llm_model.map(str::to_string),
            metadata: Some(MessageMetadata::streaming()),
            client_message_id: None,
            status: Some(MessageStatus::Streaming),
        })
    }

    /// Fold one delta into a streaming message and return the result.
    ///
    /// The final delta also copies usage and finish reason into their
    /// columns and marks the message complete.
    pub fn append_stream_delta(&self, message_id: i64, delta: &StreamDelta) -> StoreResult<ChatMessage> {
        let tx = self.conn.unchecked_transaction()?;
        let message = self
            .get_message(message_id)?
            .ok_or_else(|| StoreError::not_found("Message not found for streaming"))?;

        let mut content = message.content.clone();
        let mut metadata = message.metadata()?;
        apply_delta(message_id, &mut content, &mut metadata, delta)?;

        let (status, usage, finish_reason) = if delta.is_final {
            (
                MessageStatus::Complete,
                metadata.usage.clone().unwrap_or_default(),
                metadata.finish_reason.clone(),
            )
        } else {
            (message.status, Default::default(), None)
        };
        tx.execute(
            "UPDATE chat_messages SET
                content = ?1,
                metadata_json = ?2,
                status = ?3,
                prompt_tokens = COALESCE(?4, prompt_tokens),
                completion_tokens = COALESCE(?5, completion_tokens),
                total_tokens = COALESCE(?6, total_tokens),
                finish_reason = COALESCE(?7, finish_reason),
                edited_at = ?8
             WHERE id = ?9",
            params![
                content,
                metadata.encode()?,
                status.as_str(),
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                finish_reason,
                now_ms(),
                message_id,
            ],
        )?;
        tx.commit()?;
        self.require_message(message_id)
    }

    pub fn get_message(&self, id: i64) -> StoreResult<Option<ChatMessage>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                MessageRow::from_row,
            )
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    pub fn require_message(&self, id: i64) -> StoreResult<ChatMessage> {
        self.get_message(id)?
            .ok_or_else(|| StoreError::not_found("Message not found"))
    }

    /// A task's messages by sequence, each with its PR snapshot if any.
    pub fn messages_by_task(&self, task_id: i64) -> StoreResult<Vec<ChatMessage>> {
        let mut messages = self.query_messages(
            &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE task_id = ?1 ORDER BY sequence"),
            params![task_id],
        )?;
        let mut snapshots: HashMap<i64, _> = self
            .snapshots_for_task(task_id)?
            .into_iter()
            .map(|s| (s.message_id, s))
            .collect();
        for message in &mut messages {
            message.pull_request_snapshot = snapshots.remove(&message.id);
        }
        Ok(messages)
    }

    pub fn messages_by_status(&self, task_id: i64, status: MessageStatus) -> StoreResult<Vec<ChatMessage>> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                 WHERE task_id = ?1 AND status = ?2 ORDER BY sequence"
            ),
            params![task_id, status.as_str()],
        )
    }

    fn query_messages(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, MessageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Highest sequence in the task, or -1 when it has no messages.
    pub fn latest_sequence(&self, task_id: i64) -> StoreResult<i64> {
        let sequence = self.conn.query_row(
            "SELECT COALESCE(MAX(sequence), -1) FROM chat_messages WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(sequence)
    }

    pub fn update_message(&self, id: i64, patch: &MessagePatch) -> StoreResult<ChatMessage> {
        let metadata = patch.metadata.as_ref().map(MessageMetadata::encode).transpose()?;
        let count = self.conn.execute(
            "UPDATE chat_messages SET
                content = COALESCE(?1, content),
                llm_model = COALESCE(?2, llm_model),
                metadata_json = COALESCE(?3, metadata_json),
                prompt_tokens = COALESCE(?4, prompt_tokens),
                completion_tokens = COALESCE(?5, completion_tokens),
                total_tokens = COALESCE(?6, total_tokens),
                finish_reason = COALESCE(?7, finish_reason),
                status = COALESCE(?8, status)
             WHERE id = ?9",
            params![
                patch.content,
                patch.llm_model,
                metadata,
                patch.prompt_tokens,
                patch.completion_tokens,
                patch.total_tokens,
                patch.finish_reason,
                patch.status.map(|s| s.as_str()),
                id,
            ],
        )?;
        if count == 0 {
            return Err(StoreError::not_found("Message not found"));
        }
        self.require_message(id)
    }

    /// Replace the text of a USER message.
    pub fn edit_message(&self, id: i64, content: &str) -> StoreResult<ChatMessage> {
        let message = self.require_message(id)?;
        if message.role != MessageRole::User {
            return Err(StoreError::validation("Can only edit user messages"));
        }
        self.conn.execute(
            "UPDATE chat_messages SET content = ?1, edited_at = ?2 WHERE id = ?3",
            params![content, now_ms(), id],
        )?;
        self.require_message(id)
    }

    /// Delete a message together with its PR snapshot.
    pub fn remove_message(&self, id: i64) -> StoreResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM pull_request_snapshots WHERE message_id = ?1",
            params![id],
        )?;
        let count = tx.execute("DELETE FROM chat_messages WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(count > 0)
    }

    /// Delete every message after `sequence`, returning how many went.
    pub fn remove_after_sequence(&self, task_id: i64, sequence: i64) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM pull_request_snapshots WHERE message_id IN
                (SELECT id FROM chat_messages WHERE task_id = ?1 AND sequence > ?2)",
            params![task_id, sequence],
        )?;
        let deleted = tx.execute(
            "DELETE FROM chat_messages WHERE task_id = ?1 AND sequence > ?2",
            params![task_id, sequence],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    pub fn find_assistant_for_prompt(&self, prompt_message_id: i64) -> StoreResult<Option<ChatMessage>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                     WHERE prompt_message_id = ?1 AND role = ?2
                     ORDER BY sequence LIMIT 1"
                ),
                params![prompt_message_id, MessageRole::Assistant.as_str()],
                MessageRow::from_row,
            )
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    /// The pending assistant reply linked to a prompt, created on first use.
    pub fn get_or_create_assistant_for_prompt(
        &self,
        prompt_message_id: i64,
        llm_model: Option<&str>,
    ) -> StoreResult<AssistantForPrompt> {
        if let Some(existing) = self.find_assistant_for_prompt(prompt_message_id)? {
            return Ok(AssistantForPrompt {
                message_id: existing.id,
                sequence: existing.sequence,
                reused: true,
            });
        }
        let prompt = self
            .get_message(prompt_message_id)?
            .ok_or_else(|| StoreError::not_found("Prompt message not found"))?;

        let tx = self.conn.unchecked_transaction()?;
        let appended = self.append(&NewMessage {
            task_id: prompt.task_id,
            role: MessageRole::Assistant,
            content: String::new(),
            llm_model: llm_model.map(str::to_string),
            metadata: None,
            client_message_id: None,
            status: Some(MessageStatus::Pending),
        })?;
        tx.execute(
            "UPDATE chat_messages SET prompt_message_id = ?1 WHERE id = ?2",
            params![prompt_message_id, appended.message_id],
        )?;
        tx.commit()?;
        Ok(AssistantForPrompt {
            message_id: appended.message_id,
            sequence: appended.sequence,
            reused: false,
        })
    }

    /// Move a message through pending → streaming → complete | failed,
    /// keeping `isStreaming` in its metadata in step.
    pub fn update_message_status(
        &self,
        id: i64,
        status: MessageStatus,
        error_message: Option<&str>,
    ) -> StoreResult<ChatMessage> {
        let message = self.require_message(id)?;
        let mut metadata = message.metadata()?;
        metadata.is_streaming = status == MessageStatus::Streaming;
        if let Some(error) = error_message {
            metadata.error_message = Some(error.to_string());
        }
        self.conn.execute(
            "UPDATE chat_messages SET status = ?1, metadata_json = ?2 WHERE id = ?3",
            params![status.as_str(), metadata.encode()?, id],
        )?;
        self.require_message(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewSnapshot;
    use crate::store::test_support;
    use tasklane_common::models::PullRequestStatus;
    use tasklane_common::{MessagePart, Usage};

    fn user_message(task_id: i64, content: &str, client_id: Option<&str>) -> NewMessage {
        NewMessage {
            task_id,
            role: MessageRole::User,
            content: content.to_string(),
            llm_model: None,
            metadata: None,
            client_message_id: client_id.map(str::to_string),
            status: None,
        }
    }

    fn reasoning(text: &str) -> MessagePart {
        MessagePart::Reasoning {
            text: text.to_string(),
            signature: None,
        }
    }

    fn snapshot() -> NewSnapshot {
        NewSnapshot {
            status: PullRequestStatus::Created,
            title: "Fix login".into(),
            description: String::new(),
            files_changed: 1,
            lines_added: 2,
            lines_removed: 0,
            commit_sha: "abc123".into(),
        }
    }

    #[test]
    fn test_append_assigns_increasing_sequences() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        assert_eq!(store.latest_sequence(task.id)?, -1);
        let first = store.append(&user_message(task.id, "one", None))?;
        let second = store.append(&user_message(task.id, "two", None))?;
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(store.latest_sequence(task.id)?, 1);
        Ok(())
    }

    #[test]
    fn test_append_is_idempotent_on_client_id() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let first = store.append(&user_message(task.id, "hello", Some("client-1")))?;
        let retry = store.append(&user_message(task.id, "hello again", Some("client-1")))?;
        assert_eq!(first, retry);

        let messages = store.messages_by_task(task.id)?;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        Ok(())
    }

    #[test]
    fn test_client_id_is_scoped_per_task() -> anyhow::Result<()> {
        let (store, user, task) = test_support::store_with_task();
        let other = test_support::task_for(&store, &user);
        let a = store.append(&user_message(task.id, "a", Some("same")))?;
        let b = store.append(&user_message(other.id, "b", Some("same")))?;
        assert_ne!(a.message_id, b.message_id);
        Ok(())
    }

    #[test]
    fn test_append_to_missing_task() {
        let store = test_support::store();
        let err = store.append(&user_message(42, "x", None)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_streaming_lifecycle() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        store.append(&user_message(task.id, "prompt", None))?;
        let started = store.start_streaming(task.id, Some("claude-sonnet-4"))?;
        assert_eq!(started.sequence, 1);

        let opened = store.require_message(started.message_id)?;
        assert_eq!(opened.role, MessageRole::Assistant);
        assert_eq!(opened.status, MessageStatus::Streaming);
        assert!(opened.metadata()?.is_streaming);

        let deltas = ["Hel", "lo, ", "world"];
        for text in deltas {
            store.append_stream_delta(
                started.message_id,
                &StreamDelta {
                    delta_text: text.to_string(),
                    ..StreamDelta::default()
                },
            )?;
        }
        let finished = store.append_stream_delta(
            started.message_id,
            &StreamDelta {
                usage: Some(Usage {
                    prompt_tokens: Some(20),
                    completion_tokens: Some(5),
                    total_tokens: Some(25),
                }),
                finish_reason: Some("stop".into()),
                is_final: true,
                ..StreamDelta::default()
            },
        )?;

        assert_eq!(finished.content, deltas.concat());
        assert_eq!(finished.status, MessageStatus::Complete);
        assert_eq!(finished.total_tokens, Some(25));
        assert_eq!(finished.finish_reason.as_deref(), Some("stop"));
        assert!(finished.edited_at.is_some());
        let metadata = finished.metadata()?;
        assert!(!metadata.is_streaming);
        Ok(())
    }

    #[test]
    fn test_reasoning_merges_across_calls() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let started = store.start_streaming(task.id, None)?;
        for part in [reasoning("Looking "), reasoning("at files")] {
            store.append_stream_delta(
                started.message_id,
                &StreamDelta {
                    parts: vec![part],
                    ..StreamDelta::default()
                },
            )?;
        }
        store.append_stream_delta(
            started.message_id,
            &StreamDelta {
                parts: vec![
                    MessagePart::ToolCall {
                        tool_call_id: "call-1".into(),
                        tool_name: "list_dir".into(),
                        args: serde_json::json!({"path": "."}),
                    },
                    reasoning("Now edit"),
                ],
                ..StreamDelta::default()
            },
        )?;

        let parts = store.require_message(started.message_id)?.metadata()?.parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], reasoning("Looking at files"));
        assert_eq!(parts[2], reasoning("Now edit"));
        Ok(())
    }

    #[test]
    fn test_delta_to_missing_message() {
        let store = test_support::store();
        let err = store
            .append_stream_delta(99, &StreamDelta::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m == "Message not found for streaming"));
    }

    #[test]
    fn test_delta_to_finalized_message_fails() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let started = store.start_streaming(task.id, None)?;
        store.append_stream_delta(
            started.message_id,
            &StreamDelta {
                is_final: true,
                ..StreamDelta::default()
            },
        )?;
        let err = store
            .append_stream_delta(
                started.message_id,
                &StreamDelta {
                    delta_text: "late".into(),
                    ..StreamDelta::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.require_message(started.message_id)?.content, "");
        Ok(())
    }

    #[test]
    fn test_malformed_metadata_surfaces_as_error() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let started = store.start_streaming(task.id, None)?;
        store.conn.execute(
            "UPDATE chat_messages SET metadata_json = '{broken' WHERE id = ?1",
            params![started.message_id],
        )?;
        let err = store
            .append_stream_delta(started.message_id, &StreamDelta::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::Metadata(_)));
        Ok(())
    }

    #[test]
    fn test_update_message_patches_only_given_fields() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let appended = store.append(&user_message(task.id, "original", None))?;
        let updated = store.update_message(
            appended.message_id,
            &MessagePatch {
                llm_model: Some("gpt-4o".into()),
                ..MessagePatch::default()
            },
        )?;
        assert_eq!(updated.content, "original");
        assert_eq!(updated.llm_model.as_deref(), Some("gpt-4o"));
        Ok(())
    }

    #[test]
    fn test_edit_only_user_messages() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let prompt = store.append(&user_message(task.id, "typo", None))?;
        let edited = store.edit_message(prompt.message_id, "fixed")?;
        assert_eq!(edited.content, "fixed");
        assert!(edited.edited_at.is_some());

        let reply = store.start_streaming(task.id, None)?;
        let err = store.edit_message(reply.message_id, "nope").unwrap_err();
        assert!(matches!(err, StoreError::Validation(ref m) if m == "Can only edit user messages"));
        Ok(())
    }

    #[test]
    fn test_remove_message_drops_snapshot() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let appended = store.append(&user_message(task.id, "ship it", None))?;
        store.upsert_snapshot(appended.message_id, &snapshot())?;
        assert!(store.remove_message(appended.message_id)?);
        assert!(store.snapshot_for_message(appended.message_id)?.is_none());
        assert!(!store.remove_message(appended.message_id)?);
        Ok(())
    }

    #[test]
    fn test_remove_after_sequence() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        for text in ["a", "b", "c", "d"] {
            store.append(&user_message(task.id, text, None))?;
        }
        let third = store.messages_by_task(task.id)?[2].id;
        store.upsert_snapshot(third, &snapshot())?;

        assert_eq!(store.remove_after_sequence(task.id, 1)?, 2);
        let remaining: Vec<String> = store
            .messages_by_task(task.id)?
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(remaining, vec!["a", "b"]);
        assert!(store.snapshot_for_message(third)?.is_none());
        Ok(())
    }

    #[test]
    fn test_messages_by_task_attaches_snapshot() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let appended = store.append(&user_message(task.id, "done", None))?;
        store.upsert_snapshot(appended.message_id, &snapshot())?;
        let messages = store.messages_by_task(task.id)?;
        let attached = messages[0].pull_request_snapshot.as_ref().expect("snapshot");
        assert_eq!(attached.commit_sha, "abc123");
        Ok(())
    }

    #[test]
    fn test_assistant_for_prompt_is_reused() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let prompt = store.append(&user_message(task.id, "question", None))?;
        let created = store.get_or_create_assistant_for_prompt(prompt.message_id, Some("gpt-4o"))?;
        assert!(!created.reused);
        assert_eq!(created.sequence, 1);

        let again = store.get_or_create_assistant_for_prompt(prompt.message_id, None)?;
        assert!(again.reused);
        assert_eq!(again.message_id, created.message_id);

        let reply = store.require_message(created.message_id)?;
        assert_eq!(reply.status, MessageStatus::Pending);
        assert_eq!(reply.prompt_message_id, Some(prompt.message_id));
        Ok(())
    }

    #[test]
    fn test_update_message_status_tracks_streaming_flag() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let prompt = store.append(&user_message(task.id, "question", None))?;
        let reply = store.get_or_create_assistant_for_prompt(prompt.message_id, None)?;

        let streaming = store.update_message_status(reply.message_id, MessageStatus::Streaming, None)?;
        assert!(streaming.metadata()?.is_streaming);

        let failed = store.update_message_status(
            reply.message_id,
            MessageStatus::Failed,
            Some("provider timeout"),
        )?;
        let metadata = failed.metadata()?;
        assert!(!metadata.is_streaming);
        assert_eq!(metadata.error_message.as_deref(), Some("provider timeout"));

        let failed_list = store.messages_by_status(task.id, MessageStatus::Failed)?;
        assert_eq!(failed_list.len(), 1);
        Ok(())
    }
}
