//! Typed error hierarchy for tasklane.
//!
//! - `StoreError`: record-store failures, classified as not found,
//!   validation or authorization
//! - `McpError`: connector URL rejection and discovery failures
//! - `BackendError`: server-to-server calls to the agent backend

use tasklane_common::MetadataError;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the record stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

impl From<McpError> for StoreError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::InvalidUrl(reason) => StoreError::Validation(reason.to_string()),
            other => StoreError::Other(anyhow::Error::new(other)),
        }
    }
}

/// Why a connector URL was refused. Each variant has its own message so the
/// caller can tell the user exactly what to fix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("Invalid URL format")]
    Unparseable,

    #[error("Only HTTPS URLs are allowed for security")]
    NotHttps,

    #[error("URL must include a host")]
    MissingHost,

    #[error("Localhost URLs are not allowed")]
    Localhost,

    #[error("Internal hostnames are not allowed")]
    InternalHostname,

    #[error("Private IP addresses are not allowed")]
    PrivateAddress,

    #[error("Link-local and cloud metadata addresses are not allowed")]
    LinkLocal,

    #[error("Broadcast and unspecified addresses are not allowed")]
    Unroutable,
}

/// Errors from MCP connector validation and discovery.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid MCP URL: {0}")]
    InvalidUrl(UrlRejection),

    #[error("MCP request {method} failed: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("MCP request {method} returned HTTP {status}")]
    Status {
        method: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("MCP error {code} from {method}: {message}")]
    Rpc {
        method: &'static str,
        code: i64,
        message: String,
    },
}

/// Errors from calls to the agent backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend returned HTTP {status} for {path}: {body}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
        body: String,
    },
}
