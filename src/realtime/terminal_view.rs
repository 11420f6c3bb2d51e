//! Terminal output buffers built from a growing feed of output rows.

use std::collections::BTreeMap;

use tasklane_common::models::TerminalOutput;

use super::feed::FeedTracker;

/// Output of a single command, accumulated into one text buffer.
#[derive(Debug, Default)]
pub struct TerminalView {
    tracker: FeedTracker,
    rows: Vec<TerminalOutput>,
    text: String,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows not seen before, in timestamp order. Returns how many
    /// were appended.
    pub fn apply(&mut self, snapshot: &[TerminalOutput]) -> usize {
        let mut fresh: Vec<TerminalOutput> = self.tracker.observe(snapshot).into_iter().cloned().collect();
        fresh.sort_by_key(|row| (row.timestamp, row.id));
        for row in &fresh {
            self.text.push_str(&row.content);
        }
        let appended = fresh.len();
        self.rows.extend(fresh);
        appended
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn rows(&self) -> &[TerminalOutput] {
        &self.rows
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.text.clear();
    }
}

/// Every command of a task, bucketed by command id.
#[derive(Debug, Default)]
pub struct TaskTerminalView {
    tracker: FeedTracker,
    by_command: BTreeMap<String, Vec<TerminalOutput>>,
}

impl TaskTerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, snapshot: &[TerminalOutput]) -> usize {
        let fresh = self.tracker.observe(snapshot);
        let appended = fresh.len();
        for row in fresh {
            let bucket = self.by_command.entry(row.command_id.clone()).or_default();
            bucket.push(row.clone());
            bucket.sort_by_key(|r| (r.timestamp, r.id));
        }
        appended
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.by_command.keys().map(String::as_str)
    }

    pub fn output(&self, command_id: &str) -> &[TerminalOutput] {
        self.by_command.get(command_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Concatenated text of one command.
    pub fn text(&self, command_id: &str) -> String {
        self.output(command_id).iter().map(|row| row.content.as_str()).collect()
    }

    pub fn grouped(&self) -> &BTreeMap<String, Vec<TerminalOutput>> {
        &self.by_command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklane_common::models::StreamType;

    fn row(id: i64, command_id: &str, content: &str, timestamp: i64) -> TerminalOutput {
        TerminalOutput {
            id,
            task_id: 1,
            command_id: command_id.to_string(),
            content: content.to_string(),
            stream_type: StreamType::Stdout,
            timestamp,
            created_at: id * 10,
        }
    }

    #[test]
    fn test_buffer_dedupes_and_sorts_new_rows() {
        let mut view = TerminalView::new();
        assert_eq!(view.apply(&[row(1, "c", "a", 1)]), 1);

        // rows 3 and 2 arrive out of order alongside an already-seen row
        let snapshot = [row(1, "c", "a", 1), row(3, "c", "c", 3), row(2, "c", "b", 2)];
        assert_eq!(view.apply(&snapshot), 2);
        assert_eq!(view.text(), "abc");
        assert_eq!(view.apply(&snapshot), 0);
        assert_eq!(view.rows().len(), 3);
    }

    #[test]
    fn test_task_view_groups_by_command() {
        let mut view = TaskTerminalView::new();
        view.apply(&[
            row(1, "build", "compiling\n", 5),
            row(2, "test", "running 3 tests\n", 6),
            row(3, "build", "finished\n", 7),
        ]);
        view.apply(&[row(4, "build", "warming\n", 1)]);

        assert_eq!(view.commands().collect::<Vec<_>>(), vec!["build", "test"]);
        assert_eq!(view.text("build"), "warming\ncompiling\nfinished\n");
        assert_eq!(view.output("test").len(), 1);
        assert!(view.output("deploy").is_empty());
    }
}
