//! Live sidecar state of one task: file tree, diff stats, tool activity and
//! workspace health.

use serde::Serialize;
use tasklane_common::models::{FileChange, ToolLog, WorkspaceStatus};

use super::feed::FeedTracker;
use super::file_tree::FileTree;
use crate::errors::StoreResult;
use crate::store::{DEFAULT_RECENT_LIMIT, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub additions: i64,
    pub deletions: i64,
    pub total_files: i64,
}

impl DiffStats {
    pub fn from_changes(changes: &[FileChange]) -> Self {
        changes.iter().fold(Self::default(), |acc, change| Self {
            additions: acc.additions + change.additions,
            deletions: acc.deletions + change.deletions,
            total_files: acc.total_files + 1,
        })
    }
}

/// Everything the sidecar streams for one task, as one snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    pub file_changes: Vec<FileChange>,
    pub tool_logs: Vec<ToolLog>,
    pub running_tools: Vec<ToolLog>,
    pub workspace_status: Option<WorkspaceStatus>,
}

impl TaskSnapshot {
    pub fn load(store: &Store, task_id: i64) -> StoreResult<Self> {
        Ok(Self {
            file_changes: store.file_changes_by_task(task_id)?,
            tool_logs: store.recent_tool_logs(task_id, DEFAULT_RECENT_LIMIT)?,
            running_tools: store.running_tool_logs(task_id)?,
            workspace_status: store.workspace_status(task_id)?,
        })
    }
}

#[derive(Debug, Default)]
pub struct TaskRealtimeView {
    tracker: FeedTracker,
    tree: FileTree,
    diff_stats: DiffStats,
    snapshot: TaskSnapshot,
}

impl TaskRealtimeView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a tree fetched elsewhere, e.g. from the backend.
    pub fn with_tree(tree: FileTree) -> Self {
        Self {
            tree,
            ..Self::default()
        }
    }

    /// Take a new snapshot and return the file changes that arrived with it.
    ///
    /// The first snapshot is the baseline: its changes are replayed into
    /// the tree but none of them count as new.
    pub fn apply(&mut self, snapshot: TaskSnapshot) -> Vec<FileChange> {
        let baseline = self.tracker.is_fresh();
        let fresh: Vec<FileChange> = self
            .tracker
            .observe(&snapshot.file_changes)
            .into_iter()
            .cloned()
            .collect();
        for change in &fresh {
            self.tree.apply(change);
        }
        self.diff_stats = DiffStats::from_changes(&snapshot.file_changes);
        self.snapshot = snapshot;
        if baseline { Vec::new() } else { fresh }
    }

    pub fn file_tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn diff_stats(&self) -> DiffStats {
        self.diff_stats
    }

    pub fn file_changes(&self) -> &[FileChange] {
        &self.snapshot.file_changes
    }

    pub fn tool_logs(&self) -> &[ToolLog] {
        &self.snapshot.tool_logs
    }

    pub fn running_tools(&self) -> &[ToolLog] {
        &self.snapshot.running_tools
    }

    pub fn workspace_status(&self) -> Option<&WorkspaceStatus> {
        self.snapshot.workspace_status.as_ref()
    }

    /// Healthy unless the sidecar has reported otherwise.
    pub fn is_workspace_healthy(&self) -> bool {
        self.snapshot
            .workspace_status
            .as_ref()
            .is_none_or(|status| status.is_healthy)
    }

    pub fn active_tool_count(&self) -> usize {
        self.snapshot.running_tools.len()
    }
}
