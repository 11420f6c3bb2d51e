//! HTTP surface of the service.

mod connectors;
mod memories;
mod messages;
mod presence;
mod sidecar;
mod tasks;
mod todos;
mod traces;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tasklane_common::models::Task;
use tokio::sync::broadcast;

use crate::auth::AuthUser;
use crate::backend::BackendClient;
use crate::config::ServiceConfig;
use crate::errors::StoreError;
use crate::mcp::McpClient;
use crate::store::DbHandle;
use crate::ws::{RealtimeEvent, SocketFrame, broadcast_event};

pub use tasks::{CreateTaskForm, derive_title, is_local_path, local_repo_full_name};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub events: broadcast::Sender<SocketFrame>,
    pub config: ServiceConfig,
    pub backend: BackendClient,
    pub mcp: McpClient,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(db: DbHandle, config: ServiceConfig) -> Self {
        let (events, _) = broadcast::channel::<SocketFrame>(256);
        Self {
            db,
            events,
            backend: BackendClient::new(&config.backend),
            mcp: McpClient::new(),
            config,
        }
    }

    pub fn broadcast(&self, event: &RealtimeEvent) {
        broadcast_event(&self.events, event);
    }

    /// Load a task the caller may act on. Ownership is not checked in
    /// bypass mode.
    pub async fn task_for(&self, user: &AuthUser, task_id: i64) -> Result<Task, ApiError> {
        let task = self.db.call(move |db| db.require_task(task_id)).await?;
        if !self.config.auth.bypass && task.user_id != user.id() {
            tracing::warn!(task_id, user_id = user.id(), owner = task.user_id, "task ownership mismatch");
            return Err(ApiError::Forbidden("Forbidden".into()));
        }
        Ok(task)
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::Forbidden(msg) => ApiError::Forbidden(msg),
            other => {
                tracing::error!(error = %other, "store operation failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/health", get(health_check))
        .merge(tasks::routes())
        .merge(messages::routes())
        .merge(todos::routes())
        .merge(memories::routes())
        .merge(sidecar::routes())
        .merge(presence::routes())
        .merge(traces::routes())
        .merge(connectors::routes())
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tasklane_common::models::User;
    use tower::ServiceExt;

    pub struct TestApp {
        pub router: Router,
        pub state: SharedState,
        pub user: User,
        pub token: String,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_config(ServiceConfig::default())
        }

        pub fn with_config(config: ServiceConfig) -> Self {
            let store = Store::new_in_memory().expect("in-memory store");
            let user = store
                .upsert_user("Ada", "ada@example.com", None)
                .expect("user");
            let session = store
                .create_session(user.id, chrono::Duration::days(1))
                .expect("session");
            let state = Arc::new(AppState::new(DbHandle::new(store), config));
            Self {
                router: api_router().with_state(state.clone()),
                state,
                user,
                token: session.token,
            }
        }

        /// A second user with their own session token.
        pub fn other_user_token(&self) -> String {
            let store = self.state.db.lock_sync().expect("lock");
            let other = store
                .upsert_user("Grace", "grace@example.com", None)
                .expect("user");
            store
                .create_session(other.id, chrono::Duration::days(1))
                .expect("session")
                .token
        }

        pub fn task(&self) -> Task {
            let store = self.state.db.lock_sync().expect("lock");
            crate::store::test_support::task_for(&store, &self.user)
        }

        pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = self.router.clone().oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = response.into_body().collect().await.expect("body").to_bytes();
            let body = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, body)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::builder()
                    .uri(uri)
                    .header("authorization", format!("Bearer {}", self.token))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
        }

        pub async fn json(&self, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
            self.send(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("authorization", format!("Bearer {}", self.token))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
        }
    }
}
