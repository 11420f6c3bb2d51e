use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{Todo, TodoStatus};

use super::{Store, now_ms, parse_column};
use crate::errors::{StoreError, StoreResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTodo {
    pub task_id: i64,
    pub content: String,
    #[serde(default)]
    pub status: Option<TodoStatus>,
    /// Explicit position; appended after the last todo when absent.
    #[serde(default)]
    pub sequence: Option<i64>,
}

const TODO_COLUMNS: &str = "id, task_id, content, status, sequence, created_at, updated_at";

struct TodoRow {
    id: i64,
    task_id: i64,
    content: String,
    status: String,
    sequence: i64,
    created_at: i64,
    updated_at: i64,
}

impl TodoRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            content: row.get(2)?,
            status: row.get(3)?,
            sequence: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_todo(self) -> StoreResult<Todo> {
        Ok(Todo {
            id: self.id,
            task_id: self.task_id,
            content: self.content,
            status: parse_column(&self.status)?,
            sequence: self.sequence,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Store {
    pub fn create_todo(&self, new: &NewTodo) -> StoreResult<Todo> {
        self.require_task(new.task_id)?;
        let sequence = match new.sequence {
            Some(sequence) => sequence,
            None => self.next_todo_sequence(new.task_id)?,
        };
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO todos (task_id, content, status, sequence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                new.task_id,
                new.content,
                new.status.unwrap_or(TodoStatus::Pending).as_str(),
                sequence,
                now,
            ],
        )?;
        self.require_todo(self.conn.last_insert_rowid())
    }

    /// Create several todos in order, all or nothing.
    pub fn bulk_create_todos(&self, todos: &[NewTodo]) -> StoreResult<Vec<Todo>> {
        let tx = self.conn.unchecked_transaction()?;
        let created = todos
            .iter()
            .map(|todo| self.create_todo(todo))
            .collect::<StoreResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(created)
    }

    fn next_todo_sequence(&self, task_id: i64) -> StoreResult<i64> {
        let next = self.conn.query_row(
            "SELECT COALESCE(MAX(sequence) + 1, 0) FROM todos WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    pub fn get_todo(&self, id: i64) -> StoreResult<Option<Todo>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1"),
                params![id],
                TodoRow::from_row,
            )
            .optional()?;
        row.map(TodoRow::into_todo).transpose()
    }

    fn require_todo(&self, id: i64) -> StoreResult<Todo> {
        self.get_todo(id)?
            .ok_or_else(|| StoreError::not_found("Todo not found"))
    }

    pub fn update_todo(
        &self,
        id: i64,
        content: Option<&str>,
        status: Option<TodoStatus>,
    ) -> StoreResult<Todo> {
        let count = self.conn.execute(
            "UPDATE todos SET
                content = COALESCE(?1, content),
                status = COALESCE(?2, status),
                updated_at = ?3
             WHERE id = ?4",
            params![content, status.map(|s| s.as_str()), now_ms(), id],
        )?;
        if count == 0 {
            return Err(StoreError::not_found("Todo not found"));
        }
        self.require_todo(id)
    }

    pub fn update_todo_status(&self, id: i64, status: TodoStatus) -> StoreResult<Todo> {
        self.update_todo(id, None, Some(status))
    }

    pub fn remove_todo(&self, id: i64) -> StoreResult<()> {
        let count = self
            .conn
            .execute("DELETE FROM todos WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(StoreError::not_found("Todo not found"));
        }
        Ok(())
    }

    pub fn remove_all_todos(&self, task_id: i64) -> StoreResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM todos WHERE task_id = ?1", params![task_id])?;
        Ok(count)
    }

    pub fn todos_by_task(&self, task_id: i64) -> StoreResult<Vec<Todo>> {
        self.query_todos(
            &format!("SELECT {TODO_COLUMNS} FROM todos WHERE task_id = ?1 ORDER BY sequence, id"),
            params![task_id],
        )
    }

    pub fn todos_by_task_and_status(&self, task_id: i64, status: TodoStatus) -> StoreResult<Vec<Todo>> {
        self.query_todos(
            &format!(
                "SELECT {TODO_COLUMNS} FROM todos
                 WHERE task_id = ?1 AND status = ?2 ORDER BY sequence, id"
            ),
            params![task_id, status.as_str()],
        )
    }

    fn query_todos(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Todo>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, TodoRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TodoRow::into_todo).collect()
    }

    /// Move a todo to sequence `new_sequence`.
    ///
    /// Todos between the old and new position shift by one toward the gap,
    /// so sequences stay unique within the task.
    pub fn reorder_todo(&self, id: i64, new_sequence: i64) -> StoreResult<Todo> {
        if new_sequence < 0 {
            return Err(StoreError::validation("Sequence must be non-negative"));
        }
        let todo = self.require_todo(id)?;
        let old_sequence = todo.sequence;
        if old_sequence == new_sequence {
            return Ok(todo);
        }

        let tx = self.conn.unchecked_transaction()?;
        let now = now_ms();
        if old_sequence < new_sequence {
            tx.execute(
                "UPDATE todos SET sequence = sequence - 1, updated_at = ?1
                 WHERE task_id = ?2 AND id != ?3 AND sequence > ?4 AND sequence <= ?5",
                params![now, todo.task_id, id, old_sequence, new_sequence],
            )?;
        } else {
            tx.execute(
                "UPDATE todos SET sequence = sequence + 1, updated_at = ?1
                 WHERE task_id = ?2 AND id != ?3 AND sequence >= ?4 AND sequence < ?5",
                params![now, todo.task_id, id, new_sequence, old_sequence],
            )?;
        }
        tx.execute(
            "UPDATE todos SET sequence = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_sequence, now, id],
        )?;
        tx.commit()?;
        self.require_todo(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;

    fn todo(task_id: i64, content: &str) -> NewTodo {
        NewTodo {
            task_id,
            content: content.to_string(),
            status: None,
            sequence: None,
        }
    }

    fn order(store: &Store, task_id: i64) -> Vec<(String, i64)> {
        store
            .todos_by_task(task_id)
            .unwrap()
            .into_iter()
            .map(|t| (t.content, t.sequence))
            .collect()
    }

    #[test]
    fn test_sequences_default_to_next() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let first = store.create_todo(&todo(task.id, "write tests"))?;
        let second = store.create_todo(&todo(task.id, "fix bug"))?;
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.status, TodoStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_bulk_create_is_atomic() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let result = store.bulk_create_todos(&[todo(task.id, "ok"), todo(999, "bad task")]);
        assert!(result.is_err());
        assert!(store.todos_by_task(task.id)?.is_empty());

        let created = store.bulk_create_todos(&[todo(task.id, "a"), todo(task.id, "b")])?;
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].sequence, 1);
        Ok(())
    }

    #[test]
    fn test_update_and_status_filter() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let a = store.create_todo(&todo(task.id, "a"))?;
        store.create_todo(&todo(task.id, "b"))?;
        let updated = store.update_todo(a.id, Some("a, revised"), None)?;
        assert_eq!(updated.content, "a, revised");
        assert_eq!(updated.status, TodoStatus::Pending);

        store.update_todo_status(a.id, TodoStatus::Completed)?;
        let done = store.todos_by_task_and_status(task.id, TodoStatus::Completed)?;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a.id);
        Ok(())
    }

    #[test]
    fn test_missing_todo_errors() {
        let store = test_support::store();
        let err = store.remove_todo(12).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m == "Todo not found"));
        assert!(store.update_todo_status(12, TodoStatus::Completed).is_err());
    }

    #[test]
    fn test_remove_all_todos() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        store.create_todo(&todo(task.id, "a"))?;
        store.create_todo(&todo(task.id, "b"))?;
        assert_eq!(store.remove_all_todos(task.id)?, 2);
        assert!(store.todos_by_task(task.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_reorder_forward_shifts_between() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let ids: Vec<i64> = ["a", "b", "c", "d"]
            .iter()
            .map(|c| store.create_todo(&todo(task.id, c)).map(|t| t.id))
            .collect::<StoreResult<_>>()?;

        store.reorder_todo(ids[0], 2)?;
        assert_eq!(
            order(&store, task.id),
            vec![
                ("b".to_string(), 0),
                ("c".to_string(), 1),
                ("a".to_string(), 2),
                ("d".to_string(), 3),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_reorder_backward_shifts_between() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let ids: Vec<i64> = ["a", "b", "c", "d"]
            .iter()
            .map(|c| store.create_todo(&todo(task.id, c)).map(|t| t.id))
            .collect::<StoreResult<_>>()?;

        store.reorder_todo(ids[3], 1)?;
        let sequences: Vec<i64> = order(&store, task.id).into_iter().map(|(_, s)| s).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        let contents: Vec<String> = order(&store, task.id).into_iter().map(|(c, _)| c).collect();
        assert_eq!(contents, vec!["a", "d", "b", "c"]);
        Ok(())
    }

    #[test]
    fn test_reorder_rejects_negative() -> anyhow::Result<()> {
        let (store, _user, task) = test_support::store_with_task();
        let a = store.create_todo(&todo(task.id, "a"))?;
        let err = store.reorder_todo(a.id, -1).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        Ok(())
    }

    #[test]
    fn test_reorder_does_not_touch_other_tasks() -> anyhow::Result<()> {
        let (store, user, task) = test_support::store_with_task();
        let other = test_support::task_for(&store, &user);
        let a = store.create_todo(&todo(task.id, "a"))?;
        store.create_todo(&todo(task.id, "b"))?;
        store.create_todo(&todo(other.id, "x"))?;
        store.create_todo(&todo(other.id, "y"))?;

        store.reorder_todo(a.id, 1)?;
        assert_eq!(
            order(&store, other.id),
            vec![("x".to_string(), 0), ("y".to_string(), 1)]
        );
        Ok(())
    }
}
