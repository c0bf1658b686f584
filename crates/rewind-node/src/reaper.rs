//! Background task finalizing idle live sessions
//!
//! Recorders do not always send a `SessionClosed` event (tabs crash,
//! networks drop). A live session with no accepted append for longer than
//! the session timeout is finalized, which also ends its live tails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rewind_live::LiveBus;
use rewind_storage::{StorageResult, TimelineStore};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::writer::finalize_session;

/// Finalizes live sessions that have been idle for too long
pub struct Reaper {
    store: Arc<dyn TimelineStore>,
    bus: Arc<LiveBus>,
    session_timeout: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn TimelineStore>, bus: Arc<LiveBus>, session_timeout: Duration) -> Self {
        Self {
            store,
            bus,
            session_timeout,
        }
    }

    /// Spawn the reaper as a background task
    pub fn spawn(self, interval: Duration, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                timeout_secs = self.session_timeout.as_secs(),
                interval_secs = interval.as_secs(),
                "Session reaper started"
            );
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Session reaper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.reap_at(Utc::now()).await {
                            warn!(error = %e, "Reaper pass failed");
                        }
                    }
                }
            }
        })
    }

    /// Finalize every live session idle since before `now - timeout`
    ///
    /// Returns the number of sessions finalized.
    pub async fn reap_at(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let timeout = TimeDelta::from_std(self.session_timeout).unwrap_or(TimeDelta::MAX);
        let mut reaped = 0;

        for meta in self.store.sessions().await? {
            if !meta.is_live || now.signed_duration_since(meta.last_activity) <= timeout {
                continue;
            }
            if finalize_session(self.store.as_ref(), &self.bus, &meta.id).await? {
                debug!(
                    session = %meta.id,
                    idle_secs = now.signed_duration_since(meta.last_activity).num_seconds(),
                    pending = meta.pending,
                    "Reaped idle session"
                );
                reaped += 1;
            }
        }

        if reaped > 0 {
            info!(reaped, "Finalized idle sessions");
        }
        Ok(reaped)
    }
}
