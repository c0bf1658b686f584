//! Incremental reconstruction with checkpoint restarts

use tracing::{trace, warn};

use crate::state::ReplayState;
use crate::timeline::Timeline;

/// How a reconstruction step reached its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Already at the target
    Unchanged,
    /// Applied only the events between the old and new position
    Forward { applied: usize },
    /// Restarted from the checkpoint at `from` (0 when there is none)
    Rebuilt { from: usize },
}

/// Replay state positioned after a prefix of a timeline
#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
    state: ReplayState,
    /// Number of leading events reflected in `state`
    applied: usize,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    /// Number of leading events applied
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Move to the state after the first `count` events
    ///
    /// Moving forward without crossing a checkpoint applies only the new
    /// events. Moving backwards or across a checkpoint restarts from the
    /// nearest checkpoint before `count`. Both paths reach the same state as
    /// applying every event from the start.
    pub fn seek_to(&mut self, timeline: &Timeline, count: usize) -> Step {
        let count = count.min(timeline.len());
        if count == self.applied {
            return Step::Unchanged;
        }

        if count > self.applied && !timeline.has_checkpoint_in(self.applied, count) {
            let applied = count - self.applied;
            self.apply_range(timeline, count);
            return Step::Forward { applied };
        }

        let from = match timeline.checkpoint_before(count) {
            Some(checkpoint) => {
                self.state = ReplayState::with_page(checkpoint.page.clone());
                checkpoint.index
            }
            None => {
                self.state = ReplayState::default();
                0
            }
        };
        self.applied = from;
        self.apply_range(timeline, count);

        trace!(from, to = count, "Rebuilt from checkpoint");
        Step::Rebuilt { from }
    }

    /// Forget all state
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn apply_range(&mut self, timeline: &Timeline, to: usize) {
        for envelope in &timeline.events()[self.applied..to] {
            if let Err(e) = self.state.apply(envelope) {
                warn!(
                    session = %envelope.session_id,
                    sequence = envelope.sequence,
                    event_type = envelope.type_name(),
                    error = %e,
                    "Skipping malformed event"
                );
            }
        }
        self.applied = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::{
        AddedNode, EventEnvelope, EventKind, IncrementalData, MutationData, SerializedNode,
        SessionId, UsefulEventFilter,
    };

    fn sid() -> SessionId {
        SessionId::from("S1")
    }

    fn snapshot(seq: u64, ts: i64) -> EventEnvelope {
        EventEnvelope::full_snapshot(
            sid(),
            seq,
            ts,
            SerializedNode::Document {
                id: 1,
                children: vec![SerializedNode::element(2, "body", vec![], vec![])],
            },
        )
    }

    fn add(seq: u64, ts: i64, id: u64) -> EventEnvelope {
        EventEnvelope::mutation(
            sid(),
            seq,
            ts,
            MutationData {
                adds: vec![AddedNode {
                    parent_id: 2,
                    next_id: None,
                    node: SerializedNode::element(id, "div", vec![], vec![]),
                }],
                ..Default::default()
            },
        )
    }

    fn timeline() -> Timeline {
        Timeline::new(
            vec![
                EventEnvelope::new(
                    sid(),
                    0,
                    0,
                    EventKind::Meta {
                        href: "https://a.test".into(),
                        width: 800,
                        height: 600,
                    },
                ),
                snapshot(1, 0),
                add(2, 10, 10),
                add(3, 20, 11),
                EventEnvelope::incremental(
                    sid(),
                    4,
                    30,
                    IncrementalData::ViewportResize {
                        width: 1024,
                        height: 768,
                    },
                ),
                snapshot(5, 40),
                add(6, 50, 12),
                // Malformed: parent 99 never existed
                EventEnvelope::mutation(
                    sid(),
                    7,
                    60,
                    MutationData {
                        adds: vec![AddedNode {
                            parent_id: 99,
                            next_id: None,
                            node: SerializedNode::text(13, "x"),
                        }],
                        ..Default::default()
                    },
                ),
                add(8, 70, 14),
            ],
            UsefulEventFilter::default(),
        )
    }

    fn sequential(timeline: &Timeline, count: usize) -> ReplayState {
        let mut state = ReplayState::default();
        for envelope in &timeline.events()[..count] {
            let _ = state.apply(envelope);
        }
        state
    }

    #[test]
    fn test_forward_within_segment() {
        let timeline = timeline();
        let mut reconstructor = Reconstructor::new();
        assert_eq!(reconstructor.seek_to(&timeline, 3), Step::Rebuilt { from: 1 });
        assert_eq!(reconstructor.seek_to(&timeline, 5), Step::Forward { applied: 2 });
        assert_eq!(reconstructor.seek_to(&timeline, 5), Step::Unchanged);
    }

    #[test]
    fn test_crossing_checkpoint_rebuilds() {
        let timeline = timeline();
        let mut reconstructor = Reconstructor::new();
        reconstructor.seek_to(&timeline, 3);
        assert_eq!(reconstructor.seek_to(&timeline, 7), Step::Rebuilt { from: 5 });
        assert_eq!(reconstructor.state(), &sequential(&timeline, 7));
        let page = &reconstructor.state().page;
        assert_eq!(page.viewport.map(|v| v.width), Some(1024));
        assert_eq!(page.href.as_deref(), Some("https://a.test"));
    }

    #[test]
    fn test_every_target_matches_sequential() {
        let timeline = timeline();
        for start in 0..=timeline.len() {
            for target in 0..=timeline.len() {
                let mut reconstructor = Reconstructor::new();
                reconstructor.seek_to(&timeline, start);
                reconstructor.seek_to(&timeline, target);
                assert_eq!(
                    reconstructor.state(),
                    &sequential(&timeline, target),
                    "start {start} target {target}"
                );
            }
        }
    }

    #[test]
    fn test_malformed_event_skipped() {
        let timeline = timeline();
        let mut reconstructor = Reconstructor::new();
        reconstructor.seek_to(&timeline, timeline.len());
        let dom = reconstructor.state().dom.as_ref().unwrap();
        assert!(dom.contains(14));
        assert!(!dom.contains(13));
        assert!(!dom.contains(10));
    }
}
