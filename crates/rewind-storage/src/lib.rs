//! # Rewind Storage
//!
//! Timeline storage for the Rewind session replay pipeline.
//!
//! A timeline store persists ordered event sequences keyed by session and
//! hands them back as contiguous, gap-free slices for replay.
//!
//! ## Features
//!
//! - **TimelineStore trait**: Append, read and finalize per-session timelines
//! - **InMemoryTimelineStore**: `DashMap`-backed store for tests and ephemeral nodes
//! - **PersistentTimelineStore**: One append-only log file per session, replayed on open
//!
//! ## Ordering guarantees
//!
//! Reads only ever return the *visible prefix* of a session: the longest
//! run of consecutive sequence numbers starting at 0. Envelopes that arrive
//! ahead of a gap are kept aside and become visible once the gap closes, so
//! any delivery order converges to the same sequence. Duplicates are ignored.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rewind_storage::{InMemoryTimelineStore, TimelineStore};
//!
//! let store = InMemoryTimelineStore::new();
//! let outcome = store.append(&session_id, envelopes).await?;
//! let events = store.read(&session_id, 0, None).await?;
//! ```

pub mod append_log;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod timeline;

// Re-exports
pub use append_log::{LogRecord, SessionLog, SessionLogConfig};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryTimelineStore;
pub use persistent::PersistentTimelineStore;
pub use timeline::{AppendOutcome, SessionTimeline};

use async_trait::async_trait;
use rewind_core::{EventEnvelope, SessionId, SessionMeta};

/// Ordered, per-session event storage
///
/// Implementations must be safe to share between the queue consumers that
/// write and the players that read. Appends to one session are serialized;
/// reads observe a consistent prefix.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Append envelopes to a session, creating it on first use
    ///
    /// Envelopes may arrive in any order; they are merged by sequence.
    /// Envelopes whose sequence is already known are ignored.
    ///
    /// # Errors
    ///
    /// - `SessionFinalized` if the session no longer accepts events
    /// - `InvalidEnvelope` if any envelope belongs to another session or is
    ///   otherwise invalid; nothing from the batch is stored
    async fn append(
        &self,
        session_id: &SessionId,
        envelopes: Vec<EventEnvelope>,
    ) -> StorageResult<AppendOutcome>;

    /// Read a contiguous slice of the visible prefix
    ///
    /// `to` is exclusive; `None` reads to the end of the visible prefix.
    /// Ranges beyond the prefix are clamped, never padded.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` if nothing was ever appended for the session.
    async fn read(
        &self,
        session_id: &SessionId,
        from: u64,
        to: Option<u64>,
    ) -> StorageResult<Vec<EventEnvelope>>;

    /// Read the full visible sequence of a session
    async fn read_all(&self, session_id: &SessionId) -> StorageResult<Vec<EventEnvelope>> {
        self.read(session_id, 0, None).await
    }

    /// Summary of a session
    async fn session(&self, session_id: &SessionId) -> StorageResult<SessionMeta>;

    /// Stop accepting events for a session
    ///
    /// Idempotent: returns `true` only for the call that finalized it.
    async fn finalize(&self, session_id: &SessionId) -> StorageResult<bool>;

    /// Summaries of all known sessions, ordered by id
    async fn sessions(&self) -> StorageResult<Vec<SessionMeta>>;
}
