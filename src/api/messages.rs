use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use serde_json::json;
use tasklane_common::models::{ChatMessage, MessageRole, MessageStatus};
use tasklane_common::{MessageMetadata, MessagePart, StreamChunk};

use super::{ApiError, SharedState};
use crate::assembler::{StreamDelta, WireDelta};
use crate::auth::AuthUser;
use crate::store::{MessagePatch, NewMessage, NewSnapshot};
use crate::ws::RealtimeEvent;

pub(super) fn routes() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks/{id}/messages", get(list_messages).post(append_message))
        .route("/api/tasks/{id}/messages/stream", post(start_stream))
        .route("/api/tasks/{id}/messages/truncate", post(truncate_after))
        .route(
            "/api/messages/{id}",
            get(get_message).patch(update_message).delete(delete_message),
        )
        .route("/api/messages/{id}/content", put(edit_message))
        .route("/api/messages/{id}/status", patch(update_status))
        .route("/api/messages/{id}/delta", post(append_delta))
        .route("/api/messages/{id}/assistant", post(assistant_for_prompt))
        .route("/api/messages/{id}/snapshot", put(upsert_snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendBody {
    role: MessageRole,
    #[serde(default)]
    content: String,
    #[serde(default)]
    llm_model: Option<String>,
    #[serde(default)]
    metadata: Option<MessageMetadata>,
    #[serde(default)]
    client_message_id: Option<String>,
    #[serde(default)]
    status: Option<MessageStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelBody {
    #[serde(default)]
    llm_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TruncateBody {
    after_sequence: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditBody {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: MessageStatus,
    #[serde(default)]
    error_message: Option<String>,
}

/// Load a message whose task the caller may act on.
async fn message_for(state: &SharedState, user: &AuthUser, id: i64) -> Result<ChatMessage, ApiError> {
    let message = state.db.call(move |db| db.require_message(id)).await?;
    state.task_for(user, message.task_id).await?;
    Ok(message)
}

fn messages_changed(state: &SharedState, message: &ChatMessage) {
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id: message.task_id,
        message_id: Some(message.id),
    });
}

/// Chunks a socket client needs to replay one delta.
///
/// Text parts carry the same text as `deltaText`, so `deltaText` becomes a
/// content chunk only when the delta has no text parts.
fn chunks_for(delta: &StreamDelta) -> Vec<StreamChunk> {
    let has_text_parts = delta
        .parts
        .iter()
        .any(|part| matches!(part, MessagePart::Text { .. }));
    let mut chunks = Vec::new();
    if !delta.delta_text.is_empty() && !has_text_parts {
        chunks.push(StreamChunk::Content {
            content: delta.delta_text.clone(),
        });
    }
    chunks.extend(delta.parts.iter().map(StreamChunk::from_part));
    if let Some(usage) = &delta.usage {
        chunks.push(StreamChunk::Usage { usage: usage.clone() });
    }
    if delta.is_final {
        chunks.push(StreamChunk::Complete {
            finish_reason: delta.finish_reason.clone(),
        });
    }
    chunks
}

async fn list_messages(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let messages = state.db.call(move |db| db.messages_by_task(task_id)).await?;
    Ok(Json(messages))
}

async fn append_message(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<AppendBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let new = NewMessage {
        task_id,
        role: body.role,
        content: body.content,
        llm_model: body.llm_model,
        metadata: body.metadata,
        client_message_id: body.client_message_id,
        status: body.status,
    };
    let appended = state.db.call(move |db| db.append(&new)).await?;
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id,
        message_id: Some(appended.message_id),
    });
    Ok(Json(appended))
}

async fn start_stream(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    body: Option<Json<ModelBody>>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let model = body.map(|Json(b)| b).unwrap_or_default().llm_model;
    let appended = state
        .db
        .call(move |db| db.start_streaming(task_id, model.as_deref()))
        .await?;
    tracing::debug!(task_id, message_id = appended.message_id, "streaming message opened");
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id,
        message_id: Some(appended.message_id),
    });
    Ok(Json(appended))
}

async fn append_delta(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(wire): Json<WireDelta>,
) -> Result<impl IntoResponse, ApiError> {
    let message = message_for(&state, &user, id).await?;
    let delta = StreamDelta::try_from(wire).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let chunks = chunks_for(&delta);
    let updated = state
        .db
        .call(move |db| db.append_stream_delta(id, &delta))
        .await?;

    for chunk in chunks {
        state.broadcast(&RealtimeEvent::StreamChunk {
            task_id: message.task_id,
            message_id: id,
            chunk,
        });
    }
    messages_changed(&state, &updated);
    Ok(Json(updated))
}

async fn get_message(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let message = message_for(&state, &user, id).await?;
    let snapshot = state.db.call(move |db| db.snapshot_for_message(id)).await?;
    Ok(Json(ChatMessage {
        pull_request_snapshot: snapshot,
        ..message
    }))
}

async fn update_message(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<MessagePatch>,
) -> Result<impl IntoResponse, ApiError> {
    message_for(&state, &user, id).await?;
    let updated = state.db.call(move |db| db.update_message(id, &patch)).await?;
    messages_changed(&state, &updated);
    Ok(Json(updated))
}

async fn edit_message(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<EditBody>,
) -> Result<impl IntoResponse, ApiError> {
    message_for(&state, &user, id).await?;
    let updated = state
        .db
        .call(move |db| db.edit_message(id, &body.content))
        .await?;
    messages_changed(&state, &updated);
    Ok(Json(updated))
}

async fn update_status(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, ApiError> {
    message_for(&state, &user, id).await?;
    let updated = state
        .db
        .call(move |db| db.update_message_status(id, body.status, body.error_message.as_deref()))
        .await?;
    messages_changed(&state, &updated);
    Ok(Json(updated))
}

async fn delete_message(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let message = message_for(&state, &user, id).await?;
    let removed = state.db.call(move |db| db.remove_message(id)).await?;
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id: message.task_id,
        message_id: None,
    });
    Ok(Json(json!({ "success": removed })))
}

async fn truncate_after(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(task_id): Path<i64>,
    Json(body): Json<TruncateBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.task_for(&user, task_id).await?;
    let removed = state
        .db
        .call(move |db| db.remove_after_sequence(task_id, body.after_sequence))
        .await?;
    tracing::info!(task_id, after = body.after_sequence, removed, "messages truncated");
    state.broadcast(&RealtimeEvent::MessagesChanged {
        task_id,
        message_id: None,
    });
    Ok(Json(json!({ "removed": removed })))
}

async fn assistant_for_prompt(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<ModelBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = message_for(&state, &user, id).await?;
    let model = body.map(|Json(b)| b).unwrap_or_default().llm_model;
    let assistant = state
        .db
        .call(move |db| db.get_or_create_assistant_for_prompt(id, model.as_deref()))
        .await?;
    if !assistant.reused {
        state.broadcast(&RealtimeEvent::MessagesChanged {
            task_id: prompt.task_id,
            message_id: Some(assistant.message_id),
        });
    }
    Ok(Json(assistant))
}

async fn upsert_snapshot(
    State(state): State<SharedState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<NewSnapshot>,
) -> Result<impl IntoResponse, ApiError> {
    let message = message_for(&state, &user, id).await?;
    let snapshot = state.db.call(move |db| db.upsert_snapshot(id, &body)).await?;
    messages_changed(&state, &message);
    Ok(Json(snapshot))
}
