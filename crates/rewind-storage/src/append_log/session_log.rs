//! Per-session append-only log file

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rewind_core::{EventEnvelope, SessionId};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::error::{StorageError, StorageResult};

/// File extension of session logs
pub const LOG_EXTENSION: &str = "log";

/// Longest hex-encoded id used as a file name; longer ids are hashed
const MAX_HEX_STEM: usize = 200;

/// File name prefix of logs named by the hash of their session id
const HASHED_PREFIX: &str = "h-";

/// Configuration for session logs
#[derive(Debug, Clone)]
pub struct SessionLogConfig {
    /// Directory holding one file per session
    pub base_dir: PathBuf,
    /// Whether to sync writes to disk immediately
    pub sync_on_write: bool,
    /// Largest accepted record; anything larger is treated as corruption on replay
    pub max_record_bytes: usize,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/sessions"),
            sync_on_write: true,
            max_record_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl SessionLogConfig {
    /// Config rooted at the given directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Set whether writes are synced
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

/// A single record in a session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogRecord {
    /// An accepted envelope
    Event {
        sequence: u64,
        /// Wall-clock time the envelope was accepted
        logged_at_millis: i64,
        /// JSON-encoded [`EventEnvelope`]
        payload: Bytes,
    },
    /// The session was finalized
    Finalized { at_millis: i64 },
    /// First record of a log, naming its session
    Session { id: String },
}

impl LogRecord {
    /// Encode an envelope as an event record
    pub fn event(envelope: &EventEnvelope, at: DateTime<Utc>) -> StorageResult<Self> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self::Event {
            sequence: envelope.sequence,
            logged_at_millis: at.timestamp_millis(),
            payload: Bytes::from(payload),
        })
    }

    /// Decode the envelope of an event record
    pub fn envelope(&self) -> Option<StorageResult<EventEnvelope>> {
        match self {
            Self::Event { payload, .. } => Some(
                serde_json::from_slice(payload)
                    .map_err(|e| StorageError::Deserialization(e.to_string())),
            ),
            Self::Finalized { .. } | Self::Session { .. } => None,
        }
    }

    /// Wall-clock time this record was written
    pub fn logged_at(&self) -> Option<DateTime<Utc>> {
        let millis = match self {
            Self::Event {
                logged_at_millis, ..
            } => *logged_at_millis,
            Self::Finalized { at_millis } => *at_millis,
            Self::Session { .. } => return None,
        };
        DateTime::from_timestamp_millis(millis)
    }
}

/// Append-only log file of one session
#[derive(Debug)]
pub struct SessionLog {
    session_id: SessionId,
    path: PathBuf,
    file: File,
    offset: u64,
    sync_on_write: bool,
}

impl SessionLog {
    /// Path of the log file for a session
    ///
    /// Ids are hex encoded; ids too long for a file name are named by their
    /// blake3 hash instead and identified by the log's header record.
    pub fn path_for(base_dir: &Path, session_id: &SessionId) -> PathBuf {
        let encoded = hex::encode(session_id.as_str().as_bytes());
        let stem = if encoded.len() > MAX_HEX_STEM {
            format!("{HASHED_PREFIX}{}", blake3::hash(session_id.as_str().as_bytes()).to_hex())
        } else {
            encoded
        };
        base_dir.join(format!("{stem}.{LOG_EXTENSION}"))
    }

    /// Session id of a log file, reading the header of hashed names
    ///
    /// Returns `None` for files that are not session logs.
    pub async fn identify(path: &Path, config: &SessionLogConfig) -> StorageResult<Option<SessionId>> {
        if let Some(session_id) = Self::session_id_from_path(path) {
            return Ok(Some(session_id));
        }
        let hashed = path.extension().is_some_and(|ext| ext == LOG_EXTENSION)
            && path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.starts_with(HASHED_PREFIX));
        if !hashed {
            return Ok(None);
        }
        read_header(path, config.max_record_bytes).await
    }

    /// Recover the session id from a hex-named log file path
    pub fn session_id_from_path(path: &Path) -> Option<SessionId> {
        if path.extension()? != LOG_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        let id = String::from_utf8(bytes).ok()?;
        SessionId::new(id).ok()
    }

    /// Open (or create) the log of a session and replay its records
    ///
    /// A torn or corrupted tail is cut off so later appends start at the
    /// last intact record. New logs start with a header record naming the
    /// session; it is not among the returned records.
    #[instrument(skip(config), fields(session = %session_id))]
    pub async fn open(
        session_id: &SessionId,
        config: &SessionLogConfig,
    ) -> StorageResult<(Self, Vec<LogRecord>)> {
        tokio::fs::create_dir_all(&config.base_dir).await?;
        let path = Self::path_for(&config.base_dir, session_id);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let file_size = file.metadata().await?.len();
        let (records, valid_len) = if file_size > 0 {
            replay(&file, file_size, config.max_record_bytes).await?
        } else {
            (Vec::new(), 0)
        };

        if valid_len < file_size {
            warn!(
                path = %path.display(),
                valid_len,
                file_size,
                "Truncating torn tail of session log"
            );
            file.set_len(valid_len).await?;
        }
        file.seek(SeekFrom::Start(valid_len)).await?;

        let mut log = Self {
            session_id: session_id.clone(),
            path,
            file,
            offset: valid_len,
            sync_on_write: config.sync_on_write,
        };

        let mut records = records;
        match records.first() {
            Some(LogRecord::Session { id }) if id != session_id.as_str() => {
                return Err(StorageError::Deserialization(format!(
                    "{} belongs to session {id}",
                    log.path.display()
                )));
            }
            Some(LogRecord::Session { .. }) => {
                records.remove(0);
            }
            _ if log.offset == 0 => {
                let header = LogRecord::Session {
                    id: session_id.as_str().to_string(),
                };
                log.append(&[header]).await?;
            }
            _ => {}
        }

        debug!(records = records.len(), offset = log.offset, "Session log opened");
        Ok((log, records))
    }

    /// Append records as one write
    pub async fn append(&mut self, records: &[LogRecord]) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            let serialized = postcard::to_allocvec(record)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            buf.extend_from_slice(&(serialized.len() as u32).to_be_bytes());
            buf.extend_from_slice(&serialized);
        }

        if let Err(e) = self.write_at_offset(&buf).await {
            self.discard_unacknowledged().await;
            return Err(e);
        }
        self.offset += buf.len() as u64;
        Ok(())
    }

    async fn write_at_offset(&mut self, buf: &[u8]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(self.offset)).await?;
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        if self.sync_on_write {
            self.file.sync_data().await?;
        }
        Ok(())
    }

    /// Cut off whatever a failed write left past the last intact record
    async fn discard_unacknowledged(&mut self) {
        if let Err(e) = self.file.set_len(self.offset).await {
            warn!(
                path = %self.path.display(),
                offset = self.offset,
                error = %e,
                "Failed to truncate after failed write"
            );
        }
    }

    /// Session this log belongs to
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of intact records in the file
    pub fn len(&self) -> u64 {
        self.offset
    }

    /// Whether the log holds no records
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }
}

/// Session named by the header record of a log, if it has one
async fn read_header(path: &Path, max_record_bytes: usize) -> StorageResult<Option<SessionId>> {
    let mut file = File::open(path).await?;
    let mut len_buf = [0u8; 4];
    if file.read_exact(&mut len_buf).await.is_err() {
        return Ok(None);
    }

    let record_len = u32::from_be_bytes(len_buf) as usize;
    if record_len == 0 || record_len > max_record_bytes {
        return Ok(None);
    }
    let mut record_buf = vec![0u8; record_len];
    if file.read_exact(&mut record_buf).await.is_err() {
        return Ok(None);
    }

    match postcard::from_bytes::<LogRecord>(&record_buf) {
        Ok(LogRecord::Session { id }) => Ok(SessionId::new(id).ok()),
        _ => Ok(None),
    }
}

/// Read every intact record; returns them with the length of the intact prefix
async fn replay(
    file: &File,
    file_size: u64,
    max_record_bytes: usize,
) -> StorageResult<(Vec<LogRecord>, u64)> {
    let mut reader = BufReader::new(file.try_clone().await?);
    let mut records = Vec::new();
    let mut offset = 0u64;

    while offset < file_size {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            warn!(offset, "Truncated record length, stopping replay");
            break;
        }

        let record_len = u32::from_be_bytes(len_buf) as usize;
        if record_len == 0 || record_len > max_record_bytes {
            warn!(offset, len = record_len, "Invalid record length");
            break;
        }

        let mut record_buf = vec![0u8; record_len];
        if reader.read_exact(&mut record_buf).await.is_err() {
            warn!(offset, "Truncated record, stopping replay");
            break;
        }

        match postcard::from_bytes::<LogRecord>(&record_buf) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "Failed to deserialize record");
                break;
            }
        }

        offset += 4 + record_len as u64;
    }

    info!(records = records.len(), "Replayed session log");
    Ok((records, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::InteractionKind;
    use tempfile::TempDir;

    fn sid() -> SessionId {
        SessionId::from("session/with:odd chars")
    }

    fn config(dir: &TempDir) -> SessionLogConfig {
        SessionLogConfig::new(dir.path()).with_sync_on_write(false)
    }

    #[test]
    fn test_path_round_trip() {
        let path = SessionLog::path_for(Path::new("/tmp"), &sid());
        assert_eq!(SessionLog::session_id_from_path(&path), Some(sid()));
        assert_eq!(SessionLog::session_id_from_path(Path::new("/tmp/x.txt")), None);
        assert_eq!(SessionLog::session_id_from_path(Path::new("/tmp/zz.log")), None);
    }

    #[tokio::test]
    async fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let envelope = EventEnvelope::interaction(sid(), 0, 42, InteractionKind::Click, 7);

        {
            let (mut log, records) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
            assert!(records.is_empty());
            let record = LogRecord::event(&envelope, Utc::now()).unwrap();
            log.append(&[record, LogRecord::Finalized { at_millis: 5 }])
                .await
                .unwrap();
            assert!(!log.is_empty());
        }

        let (_, records) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].envelope().unwrap().unwrap(), envelope);
        assert_eq!(records[1], LogRecord::Finalized { at_millis: 5 });
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        let envelope = EventEnvelope::session_closed(sid(), 0, 1);

        let intact_len = {
            let (mut log, _) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
            log.append(&[LogRecord::event(&envelope, Utc::now()).unwrap()])
                .await
                .unwrap();
            log.len()
        };

        // Simulate a crash halfway through the next write
        let path = SessionLog::path_for(dir.path(), &sid());
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(&[0, 0, 0, 50, 1, 2, 3]).await.unwrap();
        file.sync_all().await.unwrap();
        drop(file);

        let (log, records) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(log.len(), intact_len);
        assert_eq!(
            tokio::fs::metadata(&path).await.unwrap().len(),
            intact_len
        );
    }

    #[tokio::test]
    async fn test_append_after_failed_write_is_replayed() {
        let dir = TempDir::new().unwrap();
        let first = EventEnvelope::interaction(sid(), 0, 1, InteractionKind::Click, 7);
        let second = EventEnvelope::interaction(sid(), 1, 2, InteractionKind::Click, 7);

        {
            let (mut log, _) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
            log.append(&[LogRecord::event(&first, Utc::now()).unwrap()])
                .await
                .unwrap();
            let intact_len = log.len();

            // Half a record left behind by a write that errored
            log.file.write_all(&[0, 0, 0, 50, 1, 2, 3]).await.unwrap();
            log.discard_unacknowledged().await;
            assert_eq!(
                tokio::fs::metadata(log.path()).await.unwrap().len(),
                intact_len
            );

            log.append(&[LogRecord::event(&second, Utc::now()).unwrap()])
                .await
                .unwrap();
        }

        let (_, records) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].envelope().unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn test_append_starts_at_last_intact_record() {
        let dir = TempDir::new().unwrap();
        let envelope = EventEnvelope::session_closed(sid(), 0, 1);

        {
            let (mut log, _) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
            log.file.write_all(&[0, 0, 0, 50, 1, 2, 3]).await.unwrap();
            log.append(&[LogRecord::event(&envelope, Utc::now()).unwrap()])
                .await
                .unwrap();
        }

        let (_, records) = SessionLog::open(&sid(), &config(&dir)).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_long_id_is_hashed_and_identified() {
        let dir = TempDir::new().unwrap();
        let long = SessionId::from("x".repeat(300).as_str());

        let path = SessionLog::path_for(dir.path(), &long);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() < 255);
        assert!(name.starts_with(HASHED_PREFIX));

        {
            let (mut log, _) = SessionLog::open(&long, &config(&dir)).await.unwrap();
            log.append(&[LogRecord::Finalized { at_millis: 1 }]).await.unwrap();
        }

        assert_eq!(
            SessionLog::identify(&path, &config(&dir)).await.unwrap(),
            Some(long.clone())
        );
        let (_, records) = SessionLog::open(&long, &config(&dir)).await.unwrap();
        assert_eq!(records, vec![LogRecord::Finalized { at_millis: 1 }]);

        let other = SessionId::from("y".repeat(300).as_str());
        assert_ne!(SessionLog::path_for(dir.path(), &other), path);
    }

    #[tokio::test]
    async fn test_identify_ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        let stray = dir.path().join("h-notes.log");
        tokio::fs::write(&stray, b"hello").await.unwrap();
        assert_eq!(SessionLog::identify(&stray, &config(&dir)).await.unwrap(), None);
        assert_eq!(
            SessionLog::identify(&dir.path().join("x.txt"), &config(&dir)).await.unwrap(),
            None
        );
    }
}
