//! Loaded session timeline
//!
//! Holds the visible events of a session together with the indexes the
//! engine needs: the time offset of every event, the reconstruction
//! checkpoints (valid full snapshots) and the useful events.

use rewind_core::{EventEnvelope, EventKind, UsefulEventFilter};
use tracing::warn;

use crate::dom::Dom;
use crate::state::PageContext;

/// A full snapshot that reconstruction can restart from
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Index of the snapshot event
    pub index: usize,
    /// Page context in effect just before the snapshot
    pub page: PageContext,
}

/// Events of one session, indexed for playback
#[derive(Debug, Clone)]
pub struct Timeline {
    events: Vec<EventEnvelope>,
    /// Offset of each event from the first, made non-decreasing
    offsets: Vec<u64>,
    checkpoints: Vec<Checkpoint>,
    /// Indexes of useful events
    useful: Vec<usize>,
    filter: UsefulEventFilter,
    /// Page context after the last event
    page: PageContext,
}

impl Timeline {
    /// Index a sequence of events ordered by sequence number
    pub fn new(events: Vec<EventEnvelope>, filter: UsefulEventFilter) -> Self {
        let mut timeline = Self {
            events: Vec::with_capacity(events.len()),
            offsets: Vec::with_capacity(events.len()),
            checkpoints: Vec::new(),
            useful: Vec::new(),
            filter,
            page: PageContext::default(),
        };
        timeline.extend(events);
        timeline
    }

    /// Append events that follow the current last sequence
    ///
    /// Events at or below the last sequence are ignored. Returns the number
    /// of events added.
    pub fn extend(&mut self, events: impl IntoIterator<Item = EventEnvelope>) -> usize {
        let mut added = 0;
        for envelope in events {
            if let Some(last) = self.events.last() {
                if envelope.sequence <= last.sequence {
                    continue;
                }
                if envelope.sequence != last.sequence + 1 {
                    warn!(
                        last = last.sequence,
                        next = envelope.sequence,
                        "Sequence gap in timeline"
                    );
                }
            }
            self.push(envelope);
            added += 1;
        }
        added
    }

    fn push(&mut self, envelope: EventEnvelope) {
        let index = self.events.len();
        let start = self.events.first().map_or(envelope.timestamp, |e| e.timestamp);
        let raw = (envelope.timestamp - start).max(0) as u64;
        let offset = self.offsets.last().map_or(raw, |prev| raw.max(*prev));

        if let EventKind::FullSnapshot { node } = &envelope.data {
            if Dom::from_snapshot(node).is_ok() {
                self.checkpoints.push(Checkpoint {
                    index,
                    page: self.page.clone(),
                });
            } else {
                warn!(sequence = envelope.sequence, "Invalid full snapshot, not a checkpoint");
            }
        }
        if self.filter.is_useful(&envelope) {
            self.useful.push(index);
        }
        self.page.observe(&envelope);

        self.offsets.push(offset);
        self.events.push(envelope);
    }

    /// All events
    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Timestamp of the first event (ms since epoch)
    pub fn start_time(&self) -> Option<i64> {
        self.events.first().map(|e| e.timestamp)
    }

    /// Offset of the last event
    pub fn total_duration(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Last sequence number
    pub fn last_sequence(&self) -> Option<u64> {
        self.events.last().map(|e| e.sequence)
    }

    /// Offset of the event at `index`
    pub fn offset(&self, index: usize) -> u64 {
        self.offsets[index]
    }

    /// Number of events at or before `time`
    pub fn count_at(&self, time: u64) -> usize {
        self.offsets.partition_point(|offset| *offset <= time)
    }

    /// Last checkpoint with index below `count`
    pub fn checkpoint_before(&self, count: usize) -> Option<&Checkpoint> {
        let position = self.checkpoints.partition_point(|c| c.index < count);
        position.checked_sub(1).map(|p| &self.checkpoints[p])
    }

    /// Whether a checkpoint lies in `[from, to)`
    pub fn has_checkpoint_in(&self, from: usize, to: usize) -> bool {
        let position = self.checkpoints.partition_point(|c| c.index < from);
        self.checkpoints
            .get(position)
            .is_some_and(|c| c.index < to)
    }

    /// The filter used to classify useful events
    pub fn filter(&self) -> &UsefulEventFilter {
        &self.filter
    }

    /// Event indexes of useful events, in order
    pub fn useful_indexes(&self) -> &[usize] {
        &self.useful
    }

    /// Number of useful events with offset at or before `time`
    pub fn useful_count_at(&self, time: u64) -> usize {
        self.useful
            .partition_point(|index| self.offsets[*index] <= time)
    }

    /// Offset of the `n`th useful event
    pub fn useful_offset(&self, n: usize) -> Option<u64> {
        self.useful.get(n).map(|index| self.offsets[*index])
    }

    /// Offset of the first useful event strictly after `time`
    pub fn next_useful_after(&self, time: u64) -> Option<u64> {
        self.useful_offset(self.useful_count_at(time))
    }

    /// Offset of the first useful event at or after `time`
    pub fn next_useful_at_or_after(&self, time: u64) -> Option<u64> {
        let position = self
            .useful
            .partition_point(|index| self.offsets[*index] < time);
        self.useful_offset(position)
    }

    /// Offset of the last useful event at or before `time`
    pub fn prev_useful_at_or_before(&self, time: u64) -> Option<u64> {
        self.useful_count_at(time)
            .checked_sub(1)
            .and_then(|n| self.useful_offset(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::{IncrementalData, InteractionKind, SerializedNode, SessionId};

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
                children: vec![],
            },
        )
    }

    fn scroll(seq: u64, ts: i64) -> EventEnvelope {
        EventEnvelope::incremental(
            sid(),
            seq,
            ts,
            IncrementalData::Scroll {
                id: 1,
                x: 0.0,
                y: 0.0,
            },
        )
    }

    fn click(seq: u64, ts: i64) -> EventEnvelope {
        EventEnvelope::interaction(sid(), seq, ts, InteractionKind::Click, 1)
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let timeline = Timeline::new(
            vec![snapshot(0, 1_000), scroll(1, 1_500), scroll(2, 1_400), scroll(3, 2_000)],
            UsefulEventFilter::default(),
        );
        let offsets: Vec<u64> = (0..4).map(|i| timeline.offset(i)).collect();
        assert_eq!(offsets, vec![0, 500, 500, 1_000]);
        assert_eq!(timeline.total_duration(), 1_000);
        assert_eq!(timeline.start_time(), Some(1_000));
    }

    #[test]
    fn test_count_at() {
        let timeline = Timeline::new(
            vec![snapshot(0, 0), scroll(1, 100), scroll(2, 100), scroll(3, 300)],
            UsefulEventFilter::default(),
        );
        assert_eq!(timeline.count_at(0), 1);
        assert_eq!(timeline.count_at(99), 1);
        assert_eq!(timeline.count_at(100), 3);
        assert_eq!(timeline.count_at(10_000), 4);
    }

    #[test]
    fn test_checkpoints() {
        let timeline = Timeline::new(
            vec![snapshot(0, 0), scroll(1, 10), snapshot(2, 20), scroll(3, 30)],
            UsefulEventFilter::default(),
        );
        assert_eq!(timeline.checkpoint_before(1).map(|c| c.index), Some(0));
        assert_eq!(timeline.checkpoint_before(3).map(|c| c.index), Some(2));
        assert_eq!(timeline.checkpoint_before(0), None);
        assert!(timeline.has_checkpoint_in(1, 3));
        assert!(!timeline.has_checkpoint_in(3, 4));
    }

    #[test]
    fn test_useful_lookups() {
        let timeline = Timeline::new(
            vec![snapshot(0, 0), click(1, 1_000), scroll(2, 5_000), click(3, 9_000), scroll(4, 10_000)],
            UsefulEventFilter::default(),
        );
        assert_eq!(timeline.useful_indexes(), &[1, 3]);
        assert_eq!(timeline.next_useful_after(0), Some(1_000));
        assert_eq!(timeline.next_useful_after(1_000), Some(9_000));
        assert_eq!(timeline.next_useful_after(9_000), None);
        assert_eq!(timeline.next_useful_at_or_after(1_000), Some(1_000));
        assert_eq!(timeline.prev_useful_at_or_before(8_999), Some(1_000));
        assert_eq!(timeline.prev_useful_at_or_before(999), None);
    }

    #[test]
    fn test_extend_ignores_known_sequences() {
        let mut timeline = Timeline::new(vec![snapshot(0, 0), scroll(1, 10)], UsefulEventFilter::default());
        let added = timeline.extend(vec![scroll(1, 10), scroll(2, 20)]);
        assert_eq!(added, 1);
        assert_eq!(timeline.last_sequence(), Some(2));
        assert_eq!(timeline.total_duration(), 20);
    }
}
