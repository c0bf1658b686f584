//! # Rewind Replay
//!
//! Deterministic reconstruction and timed playback of recorded sessions.
//!
//! ## Features
//!
//! - **Dom**: an id-addressed DOM built from full snapshots and patched by
//!   atomic mutations
//! - **Timeline**: a loaded session indexed by offset, with checkpoints at
//!   every valid full snapshot and the positions of useful events
//! - **Reconstructor**: seeking to any offset yields exactly the state of
//!   applying every event up to it, restarting from the nearest checkpoint
//!   when moving backwards
//! - **ReplayEngine**: the playback state machine (speed, skip-inactivity,
//!   live extension, activity feed sync), free of I/O and timers
//! - **Player**: an async task driving the engine from a [`TimelineStore`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use rewind_replay::{Player, PlayerConfig};
//!
//! let player = Player::spawn(store, PlayerConfig::default().with_skip_inactivity(true));
//! player.load(session_id).await?;
//! player.play(None).await?;
//! let mut events = player.subscribe();
//! ```
//!
//! [`TimelineStore`]: rewind_storage::TimelineStore

pub mod activity;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod events;
pub mod player;
pub mod reconstruct;
pub mod state;
pub mod timeline;

// Re-exports
pub use activity::{ActivityCache, ActivityCursor, ActivityItem, ActivityIter};
pub use config::{PlayerConfig, is_valid_speed};
pub use dom::{Dom, DomNode, DomNodeKind, InputValue};
pub use engine::{PlayerSnapshot, PlayerState, ReplayEngine};
pub use error::{ReplayError, ReplayResult};
pub use events::{PlayerEvent, PlayerEventKind};
pub use player::Player;
pub use reconstruct::{Reconstructor, Step};
pub use state::{PageContext, Pointer, ReplayState, Viewport};
pub use timeline::{Checkpoint, Timeline};
