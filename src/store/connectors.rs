use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{McpConnector, McpTransport};

use super::{Store, now_ms, parse_column};
use crate::errors::{StoreError, StoreResult};
use crate::mcp::url_guard::validate_mcp_url;

/// Stand-in for an OAuth client secret in anything returned to callers.
pub const REDACTED: &str = "[REDACTED]";

const MAX_NAME_LEN: usize = 20;
const RESERVED_NAME_ID: &str = "global";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConnector {
    pub name: String,
    pub url: String,
    #[serde(default = "default_transport")]
    pub transport: McpTransport,
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,
}

fn default_transport() -> McpTransport {
    McpTransport::Http
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub transport: Option<McpTransport>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub enabled: Option<bool>,
}

/// Derive the tool-namespace id of a connector name: lower-cased, with
/// every run of non-alphanumerics collapsed to one `_`, edges trimmed.
pub fn generate_name_id(name: &str) -> StoreResult<String> {
    let mut name_id = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            name_id.push(c);
        } else if !name_id.ends_with('_') {
            name_id.push('_');
        }
    }
    let name_id = name_id.trim_matches('_').to_string();
    if name_id.is_empty() {
        return Err(StoreError::validation(
            "Name must contain at least one alphanumeric character",
        ));
    }
    if name_id == RESERVED_NAME_ID {
        return Err(StoreError::validation("Name 'global' is reserved"));
    }
    Ok(name_id)
}

fn check_name(name: &str) -> StoreResult<String> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(StoreError::validation("Name must be 20 characters or less"));
    }
    generate_name_id(name)
}

fn check_url(url: &str) -> StoreResult<()> {
    validate_mcp_url(url)
        .map(|_| ())
        .map_err(|rejection| StoreError::validation(rejection.to_string()))
}

fn redact(mut connector: McpConnector) -> McpConnector {
    if connector.oauth_client_secret.is_some() {
        connector.oauth_client_secret = Some(REDACTED.to_string());
    }
    connector
}

const CONNECTOR_COLUMNS: &str = "id, user_id, name, name_id, url, transport, enabled, \
    oauth_client_id, oauth_client_secret, created_at, updated_at";

fn connector_from_row(row: &Row) -> rusqlite::Result<(McpConnector, String)> {
    Ok((
        McpConnector {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            name_id: row.get(3)?,
            url: row.get(4)?,
            transport: McpTransport::Http,
            enabled: row.get(6)?,
            oauth_client_id: row.get(7)?,
            oauth_client_secret: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        },
        row.get(5)?,
    ))
}

fn with_transport((mut connector, transport): (McpConnector, String)) -> StoreResult<McpConnector> {
    connector.transport = parse_column(&transport)?;
    Ok(connector)
}

impl Store {
    /// Create a connector owned by `user_id`; `None` creates a global one.
    pub fn create_connector(&self, user_id: Option<i64>, new: &NewConnector) -> StoreResult<McpConnector> {
        let name_id = check_name(&new.name)?;
        check_url(&new.url)?;
        if self.connector_by_name_id(user_id, &name_id)?.is_some() {
            return Err(StoreError::validation(format!(
                "A connector with the name \"{}\" already exists",
                new.name
            )));
        }
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO mcp_connectors (user_id, name, name_id, url, transport, enabled,
                oauth_client_id, oauth_client_secret, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?8)",
            params![
                user_id,
                new.name,
                name_id,
                new.url,
                new.transport.as_str(),
                new.oauth_client_id,
                new.oauth_client_secret,
                now,
            ],
        )?;
        self.require_connector(self.conn.last_insert_rowid()).map(redact)
    }

    pub fn update_connector(&self, id: i64, user_id: i64, patch: &ConnectorPatch) -> StoreResult<McpConnector> {
        let existing = self.require_connector(id)?;
        if existing.user_id != Some(user_id) {
            return Err(StoreError::forbidden("Cannot update this connector"));
        }

        let name_id = match &patch.name {
            Some(name) => {
                let name_id = check_name(name)?;
                let duplicate = self.connector_by_name_id(Some(user_id), &name_id)?;
                if duplicate.is_some_and(|d| d.id != id) {
                    return Err(StoreError::validation(format!(
                        "A connector with the name \"{name}\" already exists"
                    )));
                }
                Some(name_id)
            }
            None => None,
        };
        if let Some(url) = &patch.url {
            check_url(url)?;
        }

        self.conn.execute(
            "UPDATE mcp_connectors SET
                name = COALESCE(?1, name),
                name_id = COALESCE(?2, name_id),
                url = COALESCE(?3, url),
                transport = COALESCE(?4, transport),
                oauth_client_id = COALESCE(?5, oauth_client_id),
                oauth_client_secret = COALESCE(?6, oauth_client_secret),
                enabled = COALESCE(?7, enabled),
                updated_at = ?8
             WHERE id = ?9",
            params![
                patch.name,
                name_id,
                patch.url,
                patch.transport.map(|t| t.as_str()),
                patch.oauth_client_id,
                patch.oauth_client_secret,
                patch.enabled,
                now_ms(),
                id,
            ],
        )?;
        self.require_connector(id).map(redact)
    }

    pub fn toggle_connector(&self, id: i64, user_id: i64, enabled: bool) -> StoreResult<McpConnector> {
        self.update_connector(
            id,
            user_id,
            &ConnectorPatch {
                enabled: Some(enabled),
                ..ConnectorPatch::default()
            },
        )
    }

    pub fn remove_connector(&self, id: i64, user_id: i64) -> StoreResult<()> {
        let existing = self.require_connector(id)?;
        if existing.user_id != Some(user_id) {
            return Err(StoreError::forbidden("Cannot delete this connector"));
        }
        self.conn
            .execute("DELETE FROM mcp_connectors WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// A connector with its secret redacted.
    pub fn get_connector(&self, id: i64) -> StoreResult<Option<McpConnector>> {
        Ok(self.get_connector_with_secrets(id)?.map(redact))
    }

    /// A connector with its secret intact. Only discovery should use this.
    pub(crate) fn get_connector_with_secrets(&self, id: i64) -> StoreResult<Option<McpConnector>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CONNECTOR_COLUMNS} FROM mcp_connectors WHERE id = ?1"),
                params![id],
                connector_from_row,
            )
            .optional()?;
        row.map(with_transport).transpose()
    }

    fn require_connector(&self, id: i64) -> StoreResult<McpConnector> {
        self.get_connector_with_secrets(id)?
            .ok_or_else(|| StoreError::not_found("Connector not found"))
    }

    fn connector_by_name_id(&self, user_id: Option<i64>, name_id: &str) -> StoreResult<Option<McpConnector>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONNECTOR_COLUMNS} FROM mcp_connectors
                     WHERE user_id IS ?1 AND name_id = ?2"
                ),
                params![user_id, name_id],
                connector_from_row,
            )
            .optional()?;
        row.map(with_transport).transpose()
    }

    /// The user's connectors plus global ones, newest first, secrets redacted.
    pub fn list_connectors(&self, user_id: i64) -> StoreResult<Vec<McpConnector>> {
        let connectors = self.query_connectors(
            &format!(
                "SELECT {CONNECTOR_COLUMNS} FROM mcp_connectors
                 WHERE user_id = ?1 OR user_id IS NULL
                 ORDER BY created_at DESC, id DESC"
            ),
            params![user_id],
        )?;
        Ok(connectors.into_iter().map(redact).collect())
    }

    /// Enabled connectors available to a user, secrets intact for the agent.
    pub fn list_enabled_connectors(&self, user_id: i64) -> StoreResult<Vec<McpConnector>> {
        self.query_connectors(
            &format!(
                "SELECT {CONNECTOR_COLUMNS} FROM mcp_connectors
                 WHERE (user_id = ?1 OR user_id IS NULL) AND enabled = 1
                 ORDER BY user_id IS NULL, created_at, id"
            ),
            params![user_id],
        )
    }

    fn query_connectors(&self, sql: &str, params: impl rusqlite::Params) -> StoreResult<Vec<McpConnector>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, connector_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(with_transport).collect()
    }
}
