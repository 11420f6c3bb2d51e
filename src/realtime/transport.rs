//! Hybrid transport: one view of a task, fed either by native record-change
//! notifications or by the legacy socket stream.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tasklane_common::models::{ChatMessage, FileChange, ToolLog, WorkspaceStatus};
use tasklane_common::{MessageMetadata, MessagePart, StreamChunk};

use super::streaming_view::{StreamingParts, StreamingView};
use super::task_view::{TaskRealtimeView, TaskSnapshot};
use crate::errors::StoreResult;
use crate::store::DbHandle;
use crate::ws::RealtimeEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeMode {
    #[default]
    Native,
    Socket,
}

impl RealtimeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Socket => "socket",
        }
    }
}

impl FromStr for RealtimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "socket" => Ok(Self::Socket),
            other => Err(format!("Invalid realtime transport: {other}")),
        }
    }
}

impl fmt::Display for RealtimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task page renders, whichever transport filled it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridView {
    pub messages: Vec<ChatMessage>,
    pub streaming_parts_map: BTreeMap<String, MessagePart>,
    pub streaming_parts_order: Vec<String>,
    pub is_streaming: bool,
    pub file_changes: Vec<FileChange>,
    pub tool_logs: Vec<ToolLog>,
    pub running_tools: Vec<ToolLog>,
    pub workspace_status: Option<WorkspaceStatus>,
    pub is_workspace_healthy: bool,
    pub active_tool_count: usize,
    pub mode: RealtimeMode,
    pub is_native_enabled: bool,
}

impl HybridView {
    pub fn empty(mode: RealtimeMode) -> Self {
        Self {
            messages: Vec::new(),
            streaming_parts_map: BTreeMap::new(),
            streaming_parts_order: Vec::new(),
            is_streaming: false,
            file_changes: Vec::new(),
            tool_logs: Vec::new(),
            running_tools: Vec::new(),
            workspace_status: None,
            is_workspace_healthy: true,
            active_tool_count: 0,
            mode,
            is_native_enabled: mode == RealtimeMode::Native,
        }
    }

    fn with_streaming(mut self, parts: &StreamingParts, is_streaming: bool) -> Self {
        self.streaming_parts_map = parts.parts.clone();
        self.streaming_parts_order = parts.order.clone();
        self.is_streaming = is_streaming;
        self
    }
}

#[async_trait]
pub trait TaskTransport: Send + Sync {
    fn mode(&self) -> RealtimeMode;

    /// Reload whatever this transport reads from storage.
    async fn refresh(&mut self) -> StoreResult<()>;

    /// Feed one event. Returns whether the view may have changed.
    async fn on_event(&mut self, event: &RealtimeEvent) -> StoreResult<bool>;

    fn view(&self) -> HybridView;
}

// ── Native ───────────────────────────────────────────────────────────

/// Re-queries the store whenever a record of its task changes.
pub struct NativeTransport {
    task_id: i64,
    db: DbHandle,
    messages: Vec<ChatMessage>,
    streaming: StreamingView,
    sidecar: TaskRealtimeView,
}

impl NativeTransport {
    pub fn new(task_id: i64, db: DbHandle) -> Self {
        Self {
            task_id,
            db,
            messages: Vec::new(),
            streaming: StreamingView::default(),
            sidecar: TaskRealtimeView::new(),
        }
    }
}

#[async_trait]
impl TaskTransport for NativeTransport {
    fn mode(&self) -> RealtimeMode {
        RealtimeMode::Native
    }

    async fn refresh(&mut self) -> StoreResult<()> {
        let task_id = self.task_id;
        let (messages, snapshot) = self
            .db
            .call(move |db| Ok((db.messages_by_task(task_id)?, TaskSnapshot::load(db, task_id)?)))
            .await?;
        self.streaming = StreamingView::from_messages(&messages);
        self.messages = messages;
        let fresh = self.sidecar.apply(snapshot);
        if !fresh.is_empty() {
            tracing::debug!(task_id, count = fresh.len(), "new file changes");
        }
        Ok(())
    }

    async fn on_event(&mut self, event: &RealtimeEvent) -> StoreResult<bool> {
        if !event.is_native() || event.task_id() != self.task_id {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    fn view(&self) -> HybridView {
        let sidecar = &self.sidecar;
        HybridView {
            messages: self.messages.clone(),
            file_changes: sidecar.file_changes().to_vec(),
            tool_logs: sidecar.tool_logs().to_vec(),
            running_tools: sidecar.running_tools().to_vec(),
            workspace_status: sidecar.workspace_status().cloned(),
            is_workspace_healthy: sidecar.is_workspace_healthy(),
            active_tool_count: sidecar.active_tool_count(),
            ..HybridView::empty(RealtimeMode::Native)
        }
        .with_streaming(&self.streaming.streaming, self.streaming.is_streaming())
    }
}

// ── Socket ───────────────────────────────────────────────────────────

/// Builds the streaming message from legacy chunks only. Sidecar data is not
/// available on this path.
pub struct SocketTransport {
    task_id: i64,
    db: DbHandle,
    messages: Vec<ChatMessage>,
    message_id: Option<i64>,
    metadata: MessageMetadata,
}

impl SocketTransport {
    pub fn new(task_id: i64, db: DbHandle) -> Self {
        Self {
            task_id,
            db,
            messages: Vec::new(),
            message_id: None,
            metadata: MessageMetadata::default(),
        }
    }

    fn push_chunk(&mut self, message_id: i64, chunk: &StreamChunk) -> bool {
        if self.message_id != Some(message_id) {
            self.message_id = Some(message_id);
            self.metadata = MessageMetadata::streaming();
        }
        match chunk.clone() {
            StreamChunk::Content { content } => {
                if let Some(MessagePart::Text { text }) = self.metadata.parts.last_mut() {
                    text.push_str(&content);
                } else {
                    self.metadata.push_part(MessagePart::Text { text: content });
                }
            }
            StreamChunk::Reasoning { reasoning, signature } => {
                self.metadata.push_part(MessagePart::Reasoning {
                    text: reasoning,
                    signature,
                });
            }
            StreamChunk::RedactedReasoning { data } => {
                self.metadata.push_part(MessagePart::RedactedReasoning { data });
            }
            StreamChunk::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => self.metadata.push_part(MessagePart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            }),
            StreamChunk::ToolResult {
                tool_call_id,
                tool_name,
                result,
                is_error,
            } => self.metadata.push_part(MessagePart::ToolResult {
                tool_call_id,
                tool_name,
                result,
                is_error,
            }),
            StreamChunk::Error { error } => self.metadata.push_part(MessagePart::Error { error }),
            StreamChunk::Usage { usage } => self.metadata.merge_usage(&usage),
            StreamChunk::Complete { finish_reason } => {
                self.metadata.is_streaming = false;
                self.metadata.finish_reason = finish_reason;
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl TaskTransport for SocketTransport {
    fn mode(&self) -> RealtimeMode {
        RealtimeMode::Socket
    }

    async fn refresh(&mut self) -> StoreResult<()> {
        let task_id = self.task_id;
        self.messages = self.db.call(move |db| db.messages_by_task(task_id)).await?;
        Ok(())
    }

    async fn on_event(&mut self, event: &RealtimeEvent) -> StoreResult<bool> {
        let RealtimeEvent::StreamChunk {
            task_id,
            message_id,
            chunk,
        } = event
        else {
            return Ok(false);
        };
        if *task_id != self.task_id {
            return Ok(false);
        }
        if self.push_chunk(*message_id, chunk) {
            // the finished turn is stored now; pick it up with the history
            self.refresh().await?;
        }
        Ok(true)
    }

    fn view(&self) -> HybridView {
        let parts = StreamingParts::from_parts(self.message_id, &self.metadata.parts);
        HybridView {
            messages: self.messages.clone(),
            ..HybridView::empty(RealtimeMode::Socket)
        }
        .with_streaming(&parts, self.metadata.is_streaming)
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

/// One task's realtime state, bound to the configured transport.
///
/// A missing or malformed task id yields an inert reconciler: its view is
/// empty and it ignores every event. Without any task id the native path is
/// reported as disabled.
pub struct HybridTask {
    mode: RealtimeMode,
    has_task_id: bool,
    transport: Option<Box<dyn TaskTransport>>,
}

impl HybridTask {
    pub fn new(task_id: Option<&str>, mode: RealtimeMode, db: DbHandle) -> Self {
        let parsed = task_id.and_then(|raw| match raw.trim().parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::debug!(task_id = raw, "ignoring unparseable task id");
                None
            }
        });
        let transport: Option<Box<dyn TaskTransport>> = parsed.map(|id| match mode {
            RealtimeMode::Native => Box::new(NativeTransport::new(id, db.clone())) as Box<dyn TaskTransport>,
            RealtimeMode::Socket => Box::new(SocketTransport::new(id, db.clone())),
        });
        Self {
            mode,
            has_task_id: task_id.is_some(),
            transport,
        }
    }

    pub fn mode(&self) -> RealtimeMode {
        self.mode
    }

    pub fn is_inert(&self) -> bool {
        self.transport.is_none()
    }

    pub async fn refresh(&mut self) -> StoreResult<()> {
        match self.transport.as_mut() {
            Some(transport) => transport.refresh().await,
            None => Ok(()),
        }
    }

    pub async fn on_event(&mut self, event: &RealtimeEvent) -> StoreResult<bool> {
        match self.transport.as_mut() {
            Some(transport) => transport.on_event(event).await,
            None => Ok(false),
        }
    }

    /// Decode one socket frame and feed it in. Frames that are not realtime
    /// events are skipped.
    pub async fn consume(&mut self, frame: &str) -> StoreResult<bool> {
        match serde_json::from_str::<RealtimeEvent>(frame) {
            Ok(event) => self.on_event(&event).await,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized socket frame");
                Ok(false)
            }
        }
    }

    pub fn view(&self) -> HybridView {
        match &self.transport {
            Some(transport) => transport.view(),
            None => HybridView {
                is_native_enabled: self.mode == RealtimeMode::Native && self.has_task_id,
                ..HybridView::empty(self.mode)
            },
        }
    }
}
