use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{Memory, MemoryCategory};

use super::{Store, now_ms, parse_column};
use crate::errors::{StoreError, StoreResult};

/// A repository fact the agent wants to remember across tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    pub task_id: i64,
    pub user_id: i64,
    pub repo_full_name: String,
    pub content: String,
    pub category: MemoryCategory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub category: Option<MemoryCategory>,
}

const MEMORY_COLUMNS: &str =
    "id, task_id, user_id, repo_full_name, content, category, created_at, updated_at";

struct MemoryRow {
    id: i64,
    task_id: i64,
    user_id: i64,
    repo_full_name: String,
    content: String,
    category: String,
    created_at: i64,
    updated_at: i64,
}

impl MemoryRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            user_id: row.get(2)?,
            repo_full_name: row.get(3)?,
            content: row.get(4)?,
            category: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_memory(self) -> StoreResult<Memory> {
        Ok(Memory {
            id: self.id,
            task_id: self.task_id,
            user_id: self.user_id,
            repo_full_name: self.repo_full_name,
            content: self.content,
            category: parse_column(&self.category)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Store {
    pub fn create_memory(&self, new: &NewMemory) -> StoreResult<Memory> {
        self.require_task(new.task_id)?;
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO memories (task_id, user_id, repo_full_name, content, category,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new.task_id,
                new.user_id,
                new.repo_full_name,
                new.content,
                new.category.as_str(),
                now,
            ],
        )?;
        self.require_memory(self.conn.last_insert_rowid())
    }

    pub fn bulk_create_memories(&self, memories: &[NewMemory]) -> StoreResult<Vec<Memory>> {
        let tx = self.conn.unchecked_transaction()?;
        let created = memories
            .iter()
            .map(|memory| self.create_memory(memory))
            .collect::<StoreResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(created)
    }

    pub fn get_memory(&self, id: i64) -> StoreResult<Option<Memory>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
                params![id],
                MemoryRow::from_row,
            )
            .optional()?;
        row.map(MemoryRow::into_memory).transpose()
    }

    fn require_memory(&self, id: i64) -> StoreResult<Memory> {
        self.get_memory(id)?
            .ok_or_else(|| StoreError::not_found("Memory not found"))
    }

    pub fn update_memory(&self, id: i64, patch: &MemoryPatch) -> StoreResult<Memory> {
        let count = self.conn.execute(
            "UPDATE memories SET
                content = COALESCE(?1, content),
                category = COALESCE(?2, category),
                updated_at = ?3
             WHERE id = ?4",
            params![
                patch.content,
                patch.category.map(|c| c.as_str()),
                now_ms(),
                id
            ],
        )?;
        if count == 0 {
            return Err(StoreError::not_found("Memory not found"));
        }
        self.require_memory(id)
    }

    pub fn remove_memory(&self, id: i64) -> StoreResult<()> {
        let count = self
            .conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if count == 0 {
            return Err(StoreError::not_found("Memory not found"));
        }
        Ok(())
    }

    pub fn memories_by_task(&self, task_id: i64) -> StoreResult<Vec<Memory>> {
        self.query_memories(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE task_id = ?1 ORDER BY created_at DESC, id DESC"),
            params![task_id],
        )
    }

    /// Everything a user has learned about one repository, across tasks.
    pub fn memories_by_user_repo(&self, user_id: i64, repo_full_name: &str) -> StoreResult<Vec<Memory>> {
        self.query_memories(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1 AND repo_full_name = ?2
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id, repo_full_name],
        )
    }

    pub fn memories_by_category(
        &self,
        user_id: i64,
        repo_full_name: &str,
        category: MemoryCategory,
    ) -> StoreResult<Vec<Memory>> {
        self.query_memories(
            &format!(
                "SELECT {MEMORY_COLUMNS} FROM memories
                 WHERE user_id = ?1 AND repo_full_name = ?2 AND category = ?3
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id, repo_full_name, category.as_str()],
        )
    }

    /// Case-insensitive substring search over a user's memories of a repo.
    pub fn search_memories(&self, user_id: i64, repo_full_name: &str, query: &str) -> StoreResult<Vec<Memory>> {
        let needle = query.to_lowercase();
        let memories = self.memories_by_user_repo(user_id, repo_full_name)?;
        Ok(memories
            .into_iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .collect())
    }

    fn query_memories(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<Memory>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, MemoryRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MemoryRow::into_memory).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support;

    fn memory(task_id: i64, user_id: i64, content: &str, category: MemoryCategory) -> NewMemory {
        NewMemory {
            task_id,
            user_id,
            repo_full_name: "acme/web".to_string(),
            content: content.to_string(),
            category,
        }
    }

    #[test]
    fn test_memories_span_tasks_of_same_repo() -> anyhow::Result<()> {
        let (store, user, task) = test_support::store_with_task();
        let other = test_support::task_for(&store, &user);
        store.create_memory(&memory(task.id, user.id, "Uses pnpm", MemoryCategory::Setup))?;
        store.create_memory(&memory(other.id, user.id, "Tests run with vitest", MemoryCategory::Testing))?;

        assert_eq!(store.memories_by_task(task.id)?.len(), 1);
        assert_eq!(store.memories_by_user_repo(user.id, "acme/web")?.len(), 2);
        assert!(store.memories_by_user_repo(user.id, "acme/api")?.is_empty());
        let testing = store.memories_by_category(user.id, "acme/web", MemoryCategory::Testing)?;
        assert_eq!(testing.len(), 1);
        Ok(())
    }

    #[test]
    fn test_search_is_case_insensitive() -> anyhow::Result<()> {
        let (store, user, task) = test_support::store_with_task();
        store.bulk_create_memories(&[
            memory(task.id, user.id, "Deploys through Vercel", MemoryCategory::Infra),
            memory(task.id, user.id, "Tailwind for styles", MemoryCategory::Styles),
        ])?;
        let hits = store.search_memories(user.id, "acme/web", "VERCEL")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, MemoryCategory::Infra);
        Ok(())
    }

    #[test]
    fn test_update_and_remove() -> anyhow::Result<()> {
        let (store, user, task) = test_support::store_with_task();
        let created = store.create_memory(&memory(task.id, user.id, "old", MemoryCategory::General))?;
        let updated = store.update_memory(
            created.id,
            &MemoryPatch {
                content: Some("new".into()),
                category: None,
            },
        )?;
        assert_eq!(updated.content, "new");
        assert_eq!(updated.category, MemoryCategory::General);

        store.remove_memory(created.id)?;
        let err = store.remove_memory(created.id).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m == "Memory not found"));
        Ok(())
    }
}
