//! Per-session timeline bookkeeping shared by every store implementation
//!
//! A [`SessionTimeline`] keeps two regions:
//!
//! - the **visible prefix**: the longest run of consecutive sequences
//!   starting at 0, which is all that reads ever return
//! - the **pending** set: envelopes received ahead of a gap, keyed by
//!   sequence, promoted into the prefix once the gap closes
//!
//! Appending is split into [`SessionTimeline::prepare`] (validation and
//! deduplication, no mutation) and [`SessionTimeline::commit`], so a
//! persistent store can write the fresh envelopes to disk in between.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rewind_core::{EventEnvelope, SessionId, SessionMeta};

use crate::error::{StorageError, StorageResult};

/// Result of appending a batch to a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppendOutcome {
    /// Envelopes not seen before (visible or pending)
    pub accepted: usize,
    /// Envelopes ignored because their sequence was already known
    pub duplicates: usize,
    /// Envelopes that joined the visible prefix because of this append, in order
    pub newly_visible: Vec<EventEnvelope>,
}

impl AppendOutcome {
    /// Whether the append changed what readers can observe
    pub fn advanced(&self) -> bool {
        !self.newly_visible.is_empty()
    }
}

/// Envelopes that passed validation and deduplication
#[derive(Debug, Default)]
pub struct PreparedAppend {
    pub fresh: Vec<EventEnvelope>,
    pub duplicates: usize,
}

/// Ordered event sequence of one session
#[derive(Debug, Clone)]
pub struct SessionTimeline {
    id: SessionId,
    visible: Vec<EventEnvelope>,
    pending: BTreeMap<u64, EventEnvelope>,
    is_live: bool,
    last_activity: DateTime<Utc>,
}

impl SessionTimeline {
    /// Create an empty, live timeline
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            visible: Vec::new(),
            pending: BTreeMap::new(),
            is_live: true,
            last_activity: Utc::now(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Whether the session still accepts appends
    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Length of the visible prefix
    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    /// Number of envelopes waiting behind a gap
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Validate and deduplicate a batch without modifying the timeline
    ///
    /// The whole batch is rejected if any envelope belongs to a different
    /// session or is otherwise invalid. Within the batch the first
    /// occurrence of a sequence wins.
    pub fn prepare(&self, envelopes: Vec<EventEnvelope>) -> StorageResult<PreparedAppend> {
        if !self.is_live {
            return Err(StorageError::SessionFinalized(self.id.clone()));
        }
        for envelope in &envelopes {
            envelope.validate_for(&self.id)?;
        }

        let mut seen = HashSet::with_capacity(envelopes.len());
        let mut prepared = PreparedAppend::default();
        for envelope in envelopes {
            let sequence = envelope.sequence;
            if self.contains(sequence) || !seen.insert(sequence) {
                prepared.duplicates += 1;
            } else {
                prepared.fresh.push(envelope);
            }
        }
        Ok(prepared)
    }

    /// Insert prepared envelopes and promote any run that closed a gap
    pub fn commit(&mut self, prepared: PreparedAppend) -> AppendOutcome {
        self.commit_at(prepared, Utc::now())
    }

    /// Insert prepared envelopes, recording `at` as the activity time
    pub(crate) fn commit_at(&mut self, prepared: PreparedAppend, at: DateTime<Utc>) -> AppendOutcome {
        let accepted = prepared.fresh.len();
        for envelope in prepared.fresh {
            self.pending.insert(envelope.sequence, envelope);
        }

        let mut newly_visible = Vec::new();
        while let Some(next) = self.pending.remove(&(self.visible.len() as u64)) {
            newly_visible.push(next.clone());
            self.visible.push(next);
        }

        if accepted > 0 {
            self.last_activity = at;
        }

        AppendOutcome {
            accepted,
            duplicates: prepared.duplicates,
            newly_visible,
        }
    }

    /// Contiguous slice of the visible prefix, `to` exclusive
    pub fn slice(&self, from: u64, to: Option<u64>) -> Vec<EventEnvelope> {
        let len = self.visible.len();
        let end = to.map_or(len, |to| (to.min(len as u64)) as usize);
        let start = (from.min(len as u64)) as usize;
        if start >= end {
            return Vec::new();
        }
        self.visible[start..end].to_vec()
    }

    /// Mark the session finalized; returns false if it already was
    pub fn finalize(&mut self) -> bool {
        let changed = self.is_live;
        self.is_live = false;
        changed
    }

    /// Summary of the session
    pub fn meta(&self) -> SessionMeta {
        SessionMeta {
            id: self.id.clone(),
            start_time: self.visible.first().map(|e| e.timestamp),
            end_time: self.visible.last().map(|e| e.timestamp),
            event_count: self.visible.len(),
            last_sequence: self.visible.last().map(|e| e.sequence),
            pending: self.pending.len(),
            is_live: self.is_live,
            last_activity: self.last_activity,
        }
    }

    pub(crate) fn set_last_activity(&mut self, at: DateTime<Utc>) {
        self.last_activity = at;
    }

    fn contains(&self, sequence: u64) -> bool {
        sequence < self.visible.len() as u64 || self.pending.contains_key(&sequence)
    }
}
