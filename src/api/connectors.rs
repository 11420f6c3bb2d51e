use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde::Deserialize;
use serde_json::json;

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::errors::StoreError;
use crate::store::{ConnectorPatch, NewConnector};

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/connectors", get(list_connectors).post(create_connector))
        .route(
            "/api/connectors/{id}",
            patch(update_connector).delete(delete_connector),
        )
        .route("/api/connectors/{id}/toggle", post(toggle_connector))
        .route("/api/connectors/{id}/discover", post(discover))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleBody {
    enabled: bool,
}

async fn list_connectors(
    State(state): State<SharedState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let connectors = state.db.call(move |db| db.list_connectors(user_id)).await?;
    Ok(Json(connectors))
}

async fn create_connector(
    State(state): State<SharedState>,
    user: AuthUser,
    Json(body): Json<NewConnector>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let connector = state
        .db
        .call(move |db| db.create_connector(Some(user_id), &body))
        .await?;
    tracing::info!(user_id, connector = %connector.name_id, "connector created");
    Ok(Json(connector))
}

async fn update_connector(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<ConnectorPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let connector = state
        .db
        .call(move |db| db.update_connector(id, user_id, &patch))
        .await?;
    Ok(Json(connector))
}

async fn toggle_connector(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<ToggleBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    let connector = state
        .db
        .call(move |db| db.toggle_connector(id, user_id, body.enabled))
        .await?;
    Ok(Json(connector))
}

async fn delete_connector(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user.id();
    state.db.call(move |db| db.remove_connector(id, user_id)).await?;
    Ok(Json(json!({ "success": true })))
}

async fn discover(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let discovery = state
        .mcp
        .discover(&state.db, id, user.id())
        .await
        .map_err(|e| match e {
            StoreError::Other(source) => {
                tracing::warn!(connector_id = id, error = %source, "MCP discovery failed");
                ApiError::Internal(format!("Failed to discover MCP capabilities: {source}"))
            }
            other => ApiError::from(other),
        })?;
    Ok(Json(discovery))
}
