//! In-memory timeline store
//!
//! Suitable for tests and for nodes that do not need to survive restarts.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rewind_core::{EventEnvelope, SessionId, SessionMeta};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace, warn};

use crate::TimelineStore;
use crate::error::{StorageError, StorageResult};
use crate::timeline::{AppendOutcome, SessionTimeline};

/// In-memory implementation of [`TimelineStore`]
///
/// Uses a `DashMap` of per-session `RwLock`s, so appends to one session
/// never block reads or writes of another.
#[derive(Debug, Default)]
pub struct InMemoryTimelineStore {
    sessions: DashMap<SessionId, Arc<RwLock<SessionTimeline>>>,
}

impl InMemoryTimelineStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn get(&self, session_id: &SessionId) -> StorageResult<Arc<RwLock<SessionTimeline>>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::SessionNotFound(session_id.clone()))
    }

    fn get_or_create(&self, session_id: &SessionId) -> Arc<RwLock<SessionTimeline>> {
        let entry = self.sessions.entry(session_id.clone()).or_insert_with(|| {
            debug!(session = %session_id, "Creating session timeline");
            Arc::new(RwLock::new(SessionTimeline::new(session_id.clone())))
        });
        Arc::clone(entry.value())
    }
}

#[async_trait]
impl TimelineStore for InMemoryTimelineStore {
    #[instrument(skip(self, envelopes), fields(session = %session_id, count = envelopes.len()))]
    async fn append(
        &self,
        session_id: &SessionId,
        envelopes: Vec<EventEnvelope>,
    ) -> StorageResult<AppendOutcome> {
        if envelopes.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let timeline = self.get_or_create(session_id);
        let mut timeline = timeline.write().await;
        let prepared = timeline.prepare(envelopes).inspect_err(|e| {
            warn!(error = %e, "Rejected append");
        })?;
        let outcome = timeline.commit(prepared);

        trace!(
            accepted = outcome.accepted,
            duplicates = outcome.duplicates,
            visible = outcome.newly_visible.len(),
            "Appended batch"
        );
        Ok(outcome)
    }

    async fn read(
        &self,
        session_id: &SessionId,
        from: u64,
        to: Option<u64>,
    ) -> StorageResult<Vec<EventEnvelope>> {
        let timeline = self.get(session_id)?;
        let timeline = timeline.read().await;
        Ok(timeline.slice(from, to))
    }

    async fn session(&self, session_id: &SessionId) -> StorageResult<SessionMeta> {
        let timeline = self.get(session_id)?;
        let meta = timeline.read().await.meta();
        Ok(meta)
    }

    #[instrument(skip(self), fields(session = %session_id))]
    async fn finalize(&self, session_id: &SessionId) -> StorageResult<bool> {
        let timeline = self.get(session_id)?;
        let changed = timeline.write().await.finalize();
        if changed {
            debug!("Session finalized");
        }
        Ok(changed)
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionMeta>> {
        let timelines: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut metas = Vec::with_capacity(timelines.len());
        for timeline in timelines {
            metas.push(timeline.read().await.meta());
        }
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metas)
    }
}
