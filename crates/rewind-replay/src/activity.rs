//! Synchronized activity feed
//!
//! The feed lists the useful events of a session with a description of
//! their target as it was when the event happened. It is computed lazily by
//! walking a private reconstructor forward, and can be restarted at will.

use rewind_core::{InteractionKind, NodeId};
use serde::Serialize;

use crate::reconstruct::Reconstructor;
use crate::timeline::Timeline;

/// One entry of the activity feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    /// Position in the feed
    pub position: usize,
    pub sequence: u64,
    /// Offset from session start in ms
    pub offset: u64,
    pub kind: InteractionKind,
    pub target: NodeId,
    pub description: String,
}

/// Resumable position in the feed, independent of a borrowed timeline
#[derive(Debug, Clone, Default)]
pub struct ActivityCursor {
    next: usize,
    reconstructor: Reconstructor,
}

impl ActivityCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of the next item
    pub fn position(&self) -> usize {
        self.next
    }

    /// Produce the next item, if any
    pub fn next_item(&mut self, timeline: &Timeline) -> Option<ActivityItem> {
        let index = *timeline.useful_indexes().get(self.next)?;
        let envelope = &timeline.events()[index];
        let (kind, target) = envelope.interaction_kind()?;

        self.reconstructor.seek_to(timeline, index + 1);
        let item = ActivityItem {
            position: self.next,
            sequence: envelope.sequence,
            offset: timeline.offset(index),
            kind,
            target,
            description: self.reconstructor.state().describe(target),
        };
        self.next += 1;
        Some(item)
    }
}

/// Lazy iterator over a timeline's activity feed
pub struct ActivityIter<'a> {
    timeline: &'a Timeline,
    cursor: ActivityCursor,
}

impl<'a> ActivityIter<'a> {
    /// Iterate the feed from the beginning
    pub fn new(timeline: &'a Timeline) -> Self {
        Self {
            timeline,
            cursor: ActivityCursor::new(),
        }
    }

    /// Start over from the first item
    pub fn restart(&mut self) {
        self.cursor = ActivityCursor::new();
    }
}

impl Iterator for ActivityIter<'_> {
    type Item = ActivityItem;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_item(self.timeline)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .timeline
            .useful_indexes()
            .len()
            .saturating_sub(self.cursor.position());
        (remaining, Some(remaining))
    }
}

/// Memoized feed items, extended on demand
#[derive(Debug, Clone, Default)]
pub struct ActivityCache {
    items: Vec<ActivityItem>,
    cursor: ActivityCursor,
}

impl ActivityCache {
    /// Item at `position`, computing any missing items before it
    pub fn get(&mut self, timeline: &Timeline, position: usize) -> Option<&ActivityItem> {
        while self.items.len() <= position {
            let item = self.cursor.next_item(timeline)?;
            self.items.push(item);
        }
        self.items.get(position)
    }

    /// Drop everything computed so far
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
