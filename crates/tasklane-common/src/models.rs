use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declares a closed set of string-valued states.
///
/// Each variant maps to exactly one wire string, used for JSON and for the
/// TEXT column in SQLite, so `as_str` and `FromStr` always agree.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($label:literal) {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", $label, s)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ── Tasks ─────────────────────────────────────────────────────────────

wire_enum! {
    pub enum TaskStatus ("task status") {
        Stopped => "STOPPED",
        Initializing => "INITIALIZING",
        Archived => "ARCHIVED",
        Running => "RUNNING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

impl TaskStatus {
    /// Whether a task in this state still holds a workspace slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }
}

wire_enum! {
    /// Steps of workspace initialization, in the order they run.
    pub enum InitStatus ("init status") {
        Inactive => "INACTIVE",
        PrepareWorkspace => "PREPARE_WORKSPACE",
        CreateVm => "CREATE_VM",
        WaitVmReady => "WAIT_VM_READY",
        VerifyVmWorkspace => "VERIFY_VM_WORKSPACE",
        StartBackgroundServices => "START_BACKGROUND_SERVICES",
        InstallDependencies => "INSTALL_DEPENDENCIES",
        CompleteShadowWiki => "COMPLETE_SHADOW_WIKI",
        Active => "ACTIVE",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub status: TaskStatus,
    pub repo_full_name: String,
    pub repo_url: String,
    pub is_scratchpad: bool,
    pub main_model: Option<String>,
    pub workspace_path: Option<String>,
    pub init_status: InitStatus,
    pub scheduled_cleanup_at: Option<i64>,
    pub initialization_error: Option<String>,
    pub error_message: Option<String>,
    pub workspace_cleaned_up: bool,
    pub has_been_initialized: bool,
    pub base_branch: String,
    pub base_commit_sha: Option<String>,
    pub shadow_branch: Option<String>,
    pub pull_request_number: Option<i64>,
    pub github_issue_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Chat messages ─────────────────────────────────────────────────────

wire_enum! {
    pub enum MessageRole ("message role") {
        User => "USER",
        Assistant => "ASSISTANT",
        System => "SYSTEM",
    }
}

wire_enum! {
    pub enum MessageStatus ("message status") {
        Pending => "pending",
        Streaming => "streaming",
        Complete => "complete",
        Failed => "failed",
    }
}

wire_enum! {
    pub enum PullRequestStatus ("pull request status") {
        Created => "CREATED",
        Updated => "UPDATED",
    }
}

/// A chat message as stored.
///
/// `metadata_json` is kept raw so a single malformed blob never hides the
/// rest of a task's history; decode it with [`ChatMessage::metadata`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub task_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub llm_model: Option<String>,
    pub metadata_json: String,
    pub sequence: i64,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub finish_reason: Option<String>,
    pub status: MessageStatus,
    pub prompt_message_id: Option<i64>,
    pub client_message_id: Option<String>,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request_snapshot: Option<PullRequestSnapshot>,
}

impl ChatMessage {
    pub fn metadata(&self) -> Result<crate::MessageMetadata, crate::MetadataError> {
        crate::MessageMetadata::decode(&self.metadata_json)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSnapshot {
    pub id: i64,
    pub message_id: i64,
    pub status: PullRequestStatus,
    pub title: String,
    pub description: String,
    pub files_changed: i64,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub commit_sha: String,
    pub created_at: i64,
}

// ── Todos and memories ────────────────────────────────────────────────

wire_enum! {
    pub enum TodoStatus ("todo status") {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: i64,
    pub task_id: i64,
    pub content: String,
    pub status: TodoStatus,
    pub sequence: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

wire_enum! {
    pub enum MemoryCategory ("memory category") {
        Infra => "INFRA",
        Setup => "SETUP",
        Styles => "STYLES",
        Architecture => "ARCHITECTURE",
        Testing => "TESTING",
        Patterns => "PATTERNS",
        Bugs => "BUGS",
        Performance => "PERFORMANCE",
        Config => "CONFIG",
        General => "GENERAL",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub repo_full_name: String,
    pub content: String,
    pub category: MemoryCategory,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Sidecar telemetry ─────────────────────────────────────────────────

wire_enum! {
    pub enum FileOperation ("file operation") {
        Create => "CREATE",
        Update => "UPDATE",
        Delete => "DELETE",
        Rename => "RENAME",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub id: i64,
    pub task_id: i64,
    pub file_path: String,
    pub operation: FileOperation,
    pub additions: i64,
    pub deletions: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeStats {
    pub total_changes: i64,
    pub creates: i64,
    pub updates: i64,
    pub deletes: i64,
    pub renames: i64,
    pub total_additions: i64,
    pub total_deletions: i64,
}

wire_enum! {
    pub enum ToolStatus ("tool status") {
        Running => "RUNNING",
        Completed => "COMPLETED",
        Failed => "FAILED",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolLog {
    pub id: i64,
    pub task_id: i64,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub status: ToolStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolLogStats {
    pub total: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub avg_duration_ms: i64,
    pub by_tool: std::collections::BTreeMap<String, i64>,
}

wire_enum! {
    pub enum StreamType ("stream type") {
        Stdout => "stdout",
        Stderr => "stderr",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutput {
    pub id: i64,
    pub task_id: i64,
    pub command_id: String,
    pub content: String,
    pub stream_type: StreamType,
    pub timestamp: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CombinedOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub id: i64,
    pub task_id: i64,
    pub is_healthy: bool,
    pub last_heartbeat: i64,
    pub active_process_count: i64,
    pub disk_usage_bytes: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Presence ──────────────────────────────────────────────────────────

wire_enum! {
    pub enum PresenceActivity ("presence activity") {
        Viewing => "viewing",
        Typing => "typing",
        EditingFile => "editing-file",
        RunningCommand => "running-command",
        Idle => "idle",
    }
}

impl Default for PresenceActivity {
    fn default() -> Self {
        Self::Viewing
    }
}

wire_enum! {
    pub enum ActivityType ("activity type") {
        UserJoined => "user-joined",
        UserLeft => "user-left",
        FileOpened => "file-opened",
        FileSaved => "file-saved",
        CommandStarted => "command-started",
        CommandCompleted => "command-completed",
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub start: i64,
    pub end: i64,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub user_image: Option<String>,
    pub cursor: Option<Cursor>,
    pub selection: Option<Selection>,
    pub activity: PresenceActivity,
    pub last_seen_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub activity_type: ActivityType,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

// ── Workflow traces ───────────────────────────────────────────────────

wire_enum! {
    pub enum WorkflowType ("workflow type") {
        StreamChat => "streamChat",
        StreamChatWithTools => "streamChatWithTools",
        GenerateText => "generateText",
        ToolExecution => "toolExecution",
    }
}

wire_enum! {
    pub enum TraceStatus ("trace status") {
        Started => "STARTED",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

impl TraceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrace {
    pub id: i64,
    pub task_id: i64,
    pub trace_id: String,
    pub message_id: Option<i64>,
    pub workflow_type: WorkflowType,
    pub status: TraceStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub total_duration_ms: Option<i64>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub estimated_cost_millicents: Option<i64>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub metadata: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── MCP connectors ────────────────────────────────────────────────────

wire_enum! {
    pub enum McpTransport ("transport type") {
        Http => "HTTP",
        Sse => "SSE",
    }
}

/// A configured MCP endpoint. `user_id` of `None` marks a global connector
/// visible to every user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpConnector {
    pub id: i64,
    pub user_id: Option<i64>,
    pub name: String,
    pub name_id: String,
    pub url: String,
    pub transport: McpTransport,
    pub enabled: bool,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_enum_roundtrips_every_variant() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()), Ok(*status));
        }
        for op in FileOperation::ALL {
            assert_eq!(FileOperation::from_str(op.as_str()), Ok(*op));
        }
    }

    #[test]
    fn test_wire_enum_rejects_unknown() {
        let err = TodoStatus::from_str("DONE").unwrap_err();
        assert_eq!(err, "Invalid todo status: DONE");
    }

    #[test]
    fn test_kebab_case_serialization() {
        let json = serde_json::to_string(&PresenceActivity::EditingFile).unwrap();
        assert_eq!(json, "\"editing-file\"");
        let parsed: ActivityType = serde_json::from_str("\"command-started\"").unwrap();
        assert_eq!(parsed, ActivityType::CommandStarted);
    }

    #[test]
    fn test_active_task_statuses() {
        assert!(TaskStatus::Initializing.is_active());
        assert!(TaskStatus::Running.is_active());
        assert!(!TaskStatus::Failed.is_active());
        assert!(!TaskStatus::Archived.is_active());
    }

    #[test]
    fn test_presence_activity_default_is_viewing() {
        assert_eq!(PresenceActivity::default(), PresenceActivity::Viewing);
    }
}
