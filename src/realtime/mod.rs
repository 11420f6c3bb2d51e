//! Realtime view-state: reducers that turn successive record snapshots and
//! socket frames into what a task page shows.

pub mod feed;
pub mod file_tree;
pub mod presence;
pub mod streaming_view;
pub mod task_view;
pub mod terminal_view;
pub mod transport;

pub use feed::{FeedItem, FeedTracker, new_items};
pub use file_tree::{FileNode, FileTree, NodeKind};
pub use presence::{PresenceHeartbeat, PresenceSink};
pub use streaming_view::{StreamingParts, StreamingView};
pub use task_view::{DiffStats, TaskRealtimeView, TaskSnapshot};
pub use terminal_view::{TaskTerminalView, TerminalView};
pub use transport::{HybridTask, HybridView, RealtimeMode, TaskTransport};
