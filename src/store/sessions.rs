use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use tasklane_common::models::User;

use super::{Store, now_ms};
use crate::errors::StoreResult;

/// A bearer session issued to a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub expires_at: i64,
}

const USER_COLUMNS: &str = "id, name, email, image, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        image: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Store {
    // ── Users ─────────────────────────────────────────────────────────

    /// Insert a user, or refresh name/image of the one with this email.
    pub fn upsert_user(&self, name: &str, email: &str, image: Option<&str>) -> StoreResult<User> {
        self.conn.execute(
            "INSERT INTO users (name, email, image, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(email) DO UPDATE SET
                name = excluded.name,
                image = COALESCE(excluded.image, users.image)",
            params![name, email, image, now_ms()],
        )?;
        let user = self.conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
            params![email],
            user_from_row,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    // ── Sessions ──────────────────────────────────────────────────────

    pub fn create_session(&self, user_id: i64, ttl: chrono::Duration) -> StoreResult<Session> {
        let now = now_ms();
        let session = Session {
            token: uuid::Uuid::new_v4().simple().to_string(),
            user_id,
            expires_at: now + ttl.num_milliseconds(),
        };
        self.conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session.token, session.user_id, session.expires_at, now],
        )?;
        Ok(session)
    }

    /// Resolve a bearer token. Expired sessions resolve to `None`.
    pub fn user_for_session(&self, token: &str) -> StoreResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT u.id, u.name, u.email, u.image, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                params![token, now_ms()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_session(&self, token: &str) -> StoreResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::test_support;

    #[test]
    fn test_upsert_user_reuses_email() -> anyhow::Result<()> {
        let store = test_support::store();
        let first = store.upsert_user("Ada", "ada@example.com", Some("a.png"))?;
        let second = store.upsert_user("Ada L.", "ada@example.com", None)?;
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Ada L.");
        assert_eq!(second.image.as_deref(), Some("a.png"));
        Ok(())
    }

    #[test]
    fn test_session_resolves_user() -> anyhow::Result<()> {
        let store = test_support::store();
        let user = test_support::user(&store, "ada@example.com");
        let session = store.create_session(user.id, chrono::Duration::days(1))?;
        let resolved = store.user_for_session(&session.token)?;
        assert_eq!(resolved.map(|u| u.id), Some(user.id));
        assert!(store.user_for_session("bogus")?.is_none());
        Ok(())
    }

    #[test]
    fn test_expired_session_does_not_resolve() -> anyhow::Result<()> {
        let store = test_support::store();
        let user = test_support::user(&store, "ada@example.com");
        let session = store.create_session(user.id, chrono::Duration::milliseconds(-1))?;
        assert!(store.user_for_session(&session.token)?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_session() -> anyhow::Result<()> {
        let store = test_support::store();
        let user = test_support::user(&store, "ada@example.com");
        let session = store.create_session(user.id, chrono::Duration::days(1))?;
        assert!(store.delete_session(&session.token)?);
        assert!(!store.delete_session(&session.token)?);
        Ok(())
    }
}
