//! Detecting newly arrived items in a growing record feed.

use std::collections::HashSet;

use tasklane_common::models::{Activity, ChatMessage, FileChange, TerminalOutput, ToolLog};

/// Identity of a feed row: record id plus creation time.
pub type FeedKey = (i64, i64);

pub trait FeedItem {
    fn feed_key(&self) -> FeedKey;
}

macro_rules! feed_item {
    ($($ty:ty),+ $(,)?) => {
        $(impl FeedItem for $ty {
            fn feed_key(&self) -> FeedKey {
                (self.id, self.created_at)
            }
        })+
    };
}

feed_item!(FileChange, TerminalOutput, ToolLog, ChatMessage, Activity);

/// Items of `current` whose key is absent from `previous`, in `current` order.
pub fn new_items<'a, T: FeedItem>(previous: &[T], current: &'a [T]) -> Vec<&'a T> {
    let seen: HashSet<FeedKey> = previous.iter().map(FeedItem::feed_key).collect();
    current
        .iter()
        .filter(|item| !seen.contains(&item.feed_key()))
        .collect()
}

/// Remembers every key it has been shown, across snapshots.
///
/// Unlike [`new_items`], an item that drops out of a windowed snapshot and
/// later reappears is not reported twice.
#[derive(Debug, Default)]
pub struct FeedTracker {
    seen: HashSet<FeedKey>,
    snapshots: usize,
}

impl FeedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current` and return the items not seen before.
    pub fn observe<'a, T: FeedItem>(&mut self, current: &'a [T]) -> Vec<&'a T> {
        self.snapshots += 1;
        current
            .iter()
            .filter(|item| self.seen.insert(item.feed_key()))
            .collect()
    }

    /// True until the first snapshot has been observed.
    pub fn is_fresh(&self) -> bool {
        self.snapshots == 0
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
