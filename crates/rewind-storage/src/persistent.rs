//! Persistent timeline store
//!
//! Write-through store backed by one append-only log per session. Every
//! accepted envelope is written to the session's log before it becomes
//! visible in memory; on open, all logs in the data directory are replayed
//! to rebuild the timelines.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rewind_core::{EventEnvelope, SessionId, SessionMeta};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::TimelineStore;
use crate::append_log::{LogRecord, SessionLog, SessionLogConfig};
use crate::error::{StorageError, StorageResult};
use crate::timeline::{AppendOutcome, PreparedAppend, SessionTimeline};

/// Timeline and log of one session, guarded together
///
/// The log is closed once the session is finalized.
#[derive(Debug)]
struct SessionEntry {
    timeline: SessionTimeline,
    log: Option<SessionLog>,
}

type SharedEntry = Arc<RwLock<SessionEntry>>;

/// File-backed implementation of [`TimelineStore`]
#[derive(Debug)]
pub struct PersistentTimelineStore {
    config: SessionLogConfig,
    sessions: DashMap<SessionId, SharedEntry>,
    /// Serializes creation of new session logs
    creation: Mutex<()>,
}

impl PersistentTimelineStore {
    /// Open a store in `data_dir`, replaying any existing session logs
    pub async fn open(data_dir: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_config(SessionLogConfig::new(data_dir.as_ref())).await
    }

    /// Open a store with explicit log configuration
    #[instrument(skip_all, fields(dir = %config.base_dir.display()))]
    pub async fn with_config(config: SessionLogConfig) -> StorageResult<Self> {
        tokio::fs::create_dir_all(&config.base_dir).await?;

        let store = Self {
            config,
            sessions: DashMap::new(),
            creation: Mutex::new(()),
        };
        store.load_existing().await?;

        info!(sessions = store.sessions.len(), "Persistent timeline store opened");
        Ok(store)
    }

    /// Number of known sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    async fn load_existing(&self) -> StorageResult<()> {
        let mut dir = tokio::fs::read_dir(&self.config.base_dir).await?;
        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            let Some(session_id) = SessionLog::identify(&path, &self.config).await? else {
                debug!(path = %path.display(), "Skipping unrelated file");
                continue;
            };

            let (log, records) = SessionLog::open(&session_id, &self.config).await?;
            let timeline = rebuild_timeline(&session_id, records);
            let log = timeline.is_live().then_some(log);
            self.sessions.insert(
                session_id,
                Arc::new(RwLock::new(SessionEntry { timeline, log })),
            );
        }
        Ok(())
    }

    fn get(&self, session_id: &SessionId) -> StorageResult<SharedEntry> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::SessionNotFound(session_id.clone()))
    }

    async fn get_or_create(&self, session_id: &SessionId) -> StorageResult<SharedEntry> {
        if let Ok(entry) = self.get(session_id) {
            return Ok(entry);
        }

        let _creating = self.creation.lock().await;
        if let Ok(entry) = self.get(session_id) {
            return Ok(entry);
        }

        debug!(session = %session_id, "Creating session log");
        let (log, _) = SessionLog::open(session_id, &self.config).await?;
        let entry = Arc::new(RwLock::new(SessionEntry {
            timeline: SessionTimeline::new(session_id.clone()),
            log: Some(log),
        }));
        self.sessions.insert(session_id.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    #[cfg(test)]
    async fn holds_log(&self, session_id: &SessionId) -> bool {
        match self.get(session_id) {
            Ok(entry) => entry.read().await.log.is_some(),
            Err(_) => false,
        }
    }
}

/// Rebuild a timeline from replayed log records
fn rebuild_timeline(session_id: &SessionId, records: Vec<LogRecord>) -> SessionTimeline {
    let mut timeline = SessionTimeline::new(session_id.clone());
    let mut prepared = PreparedAppend::default();
    let mut finalized = false;
    let mut last_activity = None;

    for record in records {
        last_activity = record.logged_at().or(last_activity);
        match record.envelope() {
            Some(Ok(envelope)) => prepared.fresh.push(envelope),
            Some(Err(e)) => warn!(session = %session_id, error = %e, "Skipping unreadable record"),
            None if matches!(record, LogRecord::Finalized { .. }) => finalized = true,
            None => {}
        }
    }

    let outcome = timeline.commit(prepared);
    if finalized {
        timeline.finalize();
    }
    if let Some(at) = last_activity {
        timeline.set_last_activity(at);
    }

    debug!(
        session = %session_id,
        events = outcome.accepted,
        visible = timeline.visible_len(),
        finalized,
        "Rebuilt timeline"
    );
    timeline
}

#[async_trait]
impl TimelineStore for PersistentTimelineStore {
    #[instrument(skip(self, envelopes), fields(session = %session_id, count = envelopes.len()))]
    async fn append(
        &self,
        session_id: &SessionId,
        envelopes: Vec<EventEnvelope>,
    ) -> StorageResult<AppendOutcome> {
        if envelopes.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let entry = self.get_or_create(session_id).await?;
        let mut guard = entry.write().await;
        let entry = &mut *guard;
        let prepared = entry.timeline.prepare(envelopes).inspect_err(|e| {
            warn!(error = %e, "Rejected append");
        })?;
        let Some(log) = entry.log.as_mut() else {
            return Err(StorageError::SessionFinalized(session_id.clone()));
        };

        let now = Utc::now();
        let records = prepared
            .fresh
            .iter()
            .map(|envelope| LogRecord::event(envelope, now))
            .collect::<StorageResult<Vec<_>>>()?;
        log.append(&records).await?;

        Ok(entry.timeline.commit_at(prepared, now))
    }

    async fn read(
        &self,
        session_id: &SessionId,
        from: u64,
        to: Option<u64>,
    ) -> StorageResult<Vec<EventEnvelope>> {
        let entry = self.get(session_id)?;
        let entry = entry.read().await;
        Ok(entry.timeline.slice(from, to))
    }

    async fn session(&self, session_id: &SessionId) -> StorageResult<SessionMeta> {
        let entry = self.get(session_id)?;
        let meta = entry.read().await.timeline.meta();
        Ok(meta)
    }

    #[instrument(skip(self), fields(session = %session_id))]
    async fn finalize(&self, session_id: &SessionId) -> StorageResult<bool> {
        let entry = self.get(session_id)?;
        let mut entry = entry.write().await;
        if !entry.timeline.is_live() {
            return Ok(false);
        }
        let Some(log) = entry.log.as_mut() else {
            return Ok(false);
        };

        let record = LogRecord::Finalized {
            at_millis: Utc::now().timestamp_millis(),
        };
        log.append(&[record]).await?;
        entry.timeline.finalize();
        entry.log = None;
        debug!("Session finalized, log closed");
        Ok(true)
    }

    async fn sessions(&self) -> StorageResult<Vec<SessionMeta>> {
        let entries: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut metas = Vec::with_capacity(entries.len());
        for entry in entries {
            metas.push(entry.read().await.timeline.meta());
        }
        metas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::InteractionKind;
    use tempfile::TempDir;

    fn sid() -> SessionId {
        SessionId::from("S1")
    }

    fn click(seq: u64) -> EventEnvelope {
        EventEnvelope::interaction(sid(), seq, seq as i64 * 10, InteractionKind::Click, 1)
    }

    async fn open(dir: &TempDir) -> PersistentTimelineStore {
        PersistentTimelineStore::with_config(
            SessionLogConfig::new(dir.path()).with_sync_on_write(false),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.append(&sid(), vec![click(0), click(1)]).await.unwrap();
            store.append(&sid(), vec![click(3)]).await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.session_count(), 1);
        let meta = store.session(&sid()).await.unwrap();
        assert_eq!(meta.event_count, 2);
        assert_eq!(meta.pending, 1);
        assert!(meta.is_live);

        let outcome = store.append(&sid(), vec![click(2), click(3)]).await.unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.newly_visible.len(), 2);
    }

    #[tokio::test]
    async fn test_finalize_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.append(&sid(), vec![click(0)]).await.unwrap();
            assert!(store.finalize(&sid()).await.unwrap());
        }

        let store = open(&dir).await;
        assert!(!store.session(&sid()).await.unwrap().is_live);
        assert!(!store.finalize(&sid()).await.unwrap());
        assert!(matches!(
            store.append(&sid(), vec![click(1)]).await,
            Err(StorageError::SessionFinalized(_))
        ));
    }

    #[tokio::test]
    async fn test_finalized_session_closes_its_log() {
        let dir = TempDir::new().unwrap();
        let live = SessionId::from("S2");
        {
            let store = open(&dir).await;
            store.append(&sid(), vec![click(0)]).await.unwrap();
            store
                .append(&live, vec![EventEnvelope::interaction(live.clone(), 0, 0, InteractionKind::Click, 1)])
                .await
                .unwrap();
            assert!(store.holds_log(&sid()).await);

            assert!(store.finalize(&sid()).await.unwrap());
            assert!(!store.holds_log(&sid()).await);
            assert!(matches!(
                store.append(&sid(), vec![click(1)]).await,
                Err(StorageError::SessionFinalized(_))
            ));
        }

        let store = open(&dir).await;
        assert!(!store.holds_log(&sid()).await);
        assert!(store.holds_log(&live).await);
        assert_eq!(store.read_all(&sid()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_long_session_id_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let long = SessionId::from("session-".repeat(40).as_str());
        let event = EventEnvelope::interaction(long.clone(), 0, 0, InteractionKind::Click, 1);
        {
            let store = open(&dir).await;
            store.append(&long, vec![event.clone()]).await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.read_all(&long).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_rejected_batch_not_written() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.append(&sid(), vec![click(0)]).await.unwrap();
            let foreign = EventEnvelope::session_closed(SessionId::from("S2"), 1, 10);
            assert!(store.append(&sid(), vec![click(1), foreign]).await.is_err());
        }

        let store = open(&dir).await;
        assert_eq!(store.read_all(&sid()).await.unwrap().len(), 1);
    }
}
