//! # Rewind Live
//!
//! Live session support for the Rewind replay pipeline.
//!
//! - **LiveBus**: per-session broadcast channels fed by the timeline writer
//!   with envelopes as they become visible, and a final `Finalized` update
//! - **LiveTail**: a task that catches an open [`Player`] up from the store
//!   and then forwards live updates to it without interrupting playback
//!
//! A tail that lags behind its channel, or loses it, resumes from the last
//! forwarded sequence with a store read. It never restarts from zero.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rewind_live::{LiveTail, LiveTailConfig};
//!
//! player.load(session_id.clone()).await?;
//! let tail = LiveTail::spawn(store, bus, player.clone(), session_id, LiveTailConfig::default());
//! player.play(None).await?;
//! ```
//!
//! [`Player`]: rewind_replay::Player

pub mod bus;
pub mod error;
pub mod tail;

// Re-exports
pub use bus::{DEFAULT_BUS_CAPACITY, LiveBus, LiveUpdate};
pub use error::{LiveError, LiveResult};
pub use tail::{LiveTail, LiveTailConfig, TailExit};
