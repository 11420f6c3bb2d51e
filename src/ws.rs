use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use axum::body::Bytes;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use tasklane_common::StreamChunk;
use tasklane_common::models::{Activity, FileChange, Task, TerminalOutput, ToolLog, User, WorkspaceStatus};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::api::{ApiError, AppState};
use crate::auth::{self, AuthUser};
use crate::realtime::presence::PresenceHeartbeat;
use crate::store::PresenceUpdate;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Realtime event types ─────────────────────────────────────────────

/// Everything fanned out to socket subscribers.
///
/// All variants except `StreamChunk` are native record-change notifications;
/// `StreamChunk` carries the legacy per-delta streaming protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        task_id: i64,
    },
    MessagesChanged {
        task_id: i64,
        message_id: Option<i64>,
    },
    TodosChanged {
        task_id: i64,
    },
    MemoriesChanged {
        task_id: i64,
    },
    FileChanged {
        task_id: i64,
        change: FileChange,
    },
    ToolLogChanged {
        task_id: i64,
        log: ToolLog,
    },
    TerminalOutput {
        task_id: i64,
        output: TerminalOutput,
    },
    WorkspaceStatusChanged {
        task_id: i64,
        status: WorkspaceStatus,
    },
    PresenceChanged {
        task_id: i64,
    },
    ActivityRecorded {
        activity: Activity,
    },
    TraceChanged {
        task_id: i64,
    },
    StreamChunk {
        task_id: i64,
        message_id: i64,
        chunk: StreamChunk,
    },
}

impl RealtimeEvent {
    pub fn task_id(&self) -> i64 {
        match self {
            Self::TaskCreated { task } | Self::TaskUpdated { task } => task.id,
            Self::ActivityRecorded { activity } => activity.task_id,
            Self::TaskDeleted { task_id }
            | Self::MessagesChanged { task_id, .. }
            | Self::TodosChanged { task_id }
            | Self::MemoriesChanged { task_id }
            | Self::FileChanged { task_id, .. }
            | Self::ToolLogChanged { task_id, .. }
            | Self::TerminalOutput { task_id, .. }
            | Self::WorkspaceStatusChanged { task_id, .. }
            | Self::PresenceChanged { task_id }
            | Self::TraceChanged { task_id }
            | Self::StreamChunk { task_id, .. } => *task_id,
        }
    }

    /// True for record-change notifications, false for legacy stream chunks.
    pub fn is_native(&self) -> bool {
        !matches!(self, Self::StreamChunk { .. })
    }
}

// ── Socket handler ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketParams {
    /// Task being viewed. Only its events are forwarded.
    pub task_id: Option<i64>,
    /// Session token, for clients that cannot set headers on upgrade.
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SocketParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let (viewer, task_id) = authorize_viewer(&state, &headers, &params).await?;
    let heartbeat = viewer_heartbeat(&state, viewer, task_id);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, task_id, heartbeat)))
}

/// Resolve the caller of a socket upgrade and check they may watch the
/// requested task.
pub async fn authorize_viewer(
    state: &AppState,
    headers: &HeaderMap,
    params: &SocketParams,
) -> Result<(User, i64), ApiError> {
    let viewer = match auth::resolve_user(state, headers, params.token.as_deref()).await? {
        Some(user) => AuthUser(user),
        None => return Err(ApiError::Unauthorized),
    };
    let task_id = params
        .task_id
        .ok_or_else(|| ApiError::BadRequest("taskId is required".into()))?;
    state.task_for(&viewer, task_id).await?;
    Ok((viewer.0, task_id))
}

fn viewer_heartbeat(state: &Arc<AppState>, viewer: User, task_id: i64) -> PresenceHeartbeat {
    let update = PresenceUpdate {
        task_id,
        user_id: viewer.id,
        user_name: viewer.name,
        user_image: viewer.image,
        cursor: None,
        selection: None,
        activity: None,
    };
    PresenceHeartbeat::start(
        Arc::new(state.db.clone()),
        update,
        state.config.realtime.presence_interval(),
    )
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, task_id: i64, heartbeat: PresenceHeartbeat) {
    let (sender, receiver) = socket.split();
    let subscription = TaskSubscription::new(task_id, state.events.subscribe());
    run_socket_loop(sender, receiver, subscription).await;
    heartbeat.stop().await;
}

/// A broadcast receiver narrowed to one task's frames.
pub struct TaskSubscription {
    task_id: i64,
    rx: broadcast::Receiver<SocketFrame>,
}

impl TaskSubscription {
    pub fn new(task_id: i64, rx: broadcast::Receiver<SocketFrame>) -> Self {
        Self { task_id, rx }
    }

    /// Next frame for this task, or `None` once the channel closes. A lagged
    /// receiver skips ahead.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.task_id == self.task_id => return Some(frame.json),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(task_id = self.task_id, skipped, "socket subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines task-scoped forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: TaskSubscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("socket missed pong deadline; closing");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// One serialized event, tagged with the task it belongs to.
#[derive(Debug, Clone)]
pub struct SocketFrame {
    pub task_id: i64,
    pub json: String,
}

/// Serialize and broadcast an event to every subscriber.
/// Returns silently even if no clients are connected.
pub fn broadcast_event(tx: &broadcast::Sender<SocketFrame>, event: &RealtimeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(SocketFrame {
                task_id: event.task_id(),
                json,
            });
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize realtime event");
        }
    }
}
