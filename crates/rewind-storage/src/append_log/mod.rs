//! Append-only session logs
//!
//! Each session is stored in its own file, named after the hex encoding of
//! the session id, or `h-<blake3 of the id>` when that would be too long.
//! The first record names the session. Records are only ever appended; the
//! in-memory timeline is rebuilt by replaying the file on open.
//!
//! ## Storage Format
//!
//! Each log file contains length-prefixed, postcard-serialized records:
//! ```text
//! [4 bytes: len][len bytes: serialized record][4 bytes: len][...]
//! ```
//!
//! Event payloads are the JSON wire form of the envelope, so the log can be
//! inspected and re-ingested with the same decoder the queue uses.

pub mod session_log;

pub use session_log::{LogRecord, SessionLog, SessionLogConfig};
