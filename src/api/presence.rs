use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tasklane_common::models::{ActivityType, Cursor, PresenceActivity, Selection};

use super::{ApiError, SharedState};
use crate::auth::AuthUser;
use crate::store::{DEFAULT_ACTIVITY_LIMIT, NewActivity, PresenceUpdate};
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/tasks/{id}/presence",
            get(active_users).put(heartbeat).delete(leave),
        )
        .route("/api/tasks/{id}/activities", get(list_activities).post(record_activity))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceBody {
    #[serde(default)]
    cursor: Option<Cursor>,
    #[serde(default)]
    selection: Option<Selection>,
    #[serde(default)]
    activity: Option<PresenceActivity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityBody {
    activity_type: ActivityType,
    #[serde(default)]
    metadata: Option<Value>,
}

async fn active_users(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let timeout_ms = state.config.realtime.presence_timeout_ms();
    let users = state
        .db
        .call(move |db| db.active_users(task_id, timeout_ms))
        .await?;
    Ok(Json(users))
}

async fn heartbeat(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<PresenceBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let update = PresenceUpdate {
        task_id,
        user_id: user.id(),
        user_name: user.0.name.clone(),
        user_image: user.0.image.clone(),
        cursor: body.cursor,
        selection: body.selection,
        activity: body.activity,
    };
    let action = state.db.call(move |db| db.update_presence(&update)).await?;
    state.broadcast(&RealtimeEvent::PresenceChanged { task_id });
    Ok(Json(json!({ "action": action })))
}

async fn leave(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let user_id = user.id();
    let removed = state
        .db
        .call(move |db| db.remove_presence(task_id, user_id))
        .await?;
    if removed {
        state.broadcast(&RealtimeEvent::PresenceChanged { task_id });
    }
    Ok(Json(json!({ "success": removed })))
}

async fn list_activities(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    let activities = state
        .db
        .call(move |db| db.recent_activities(task_id, limit))
        .await?;
    Ok(Json(activities))
}

async fn record_activity(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<ActivityBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new = NewActivity {
        task_id,
        user_id: user.id(),
        activity_type: body.activity_type,
        metadata: body.metadata,
    };
    let activity = state.db.call(move |db| db.record_activity(&new)).await?;
    state.broadcast(&RealtimeEvent::ActivityRecorded {
        activity: activity.clone(),
    });
    Ok(Json(activity))
}
