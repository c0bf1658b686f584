//! Events emitted by the player

use rewind_core::{InteractionKind, NodeId, SessionId};
use serde::Serialize;

use crate::activity::ActivityItem;
use crate::engine::PlayerState;

/// Something observers of a player may react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The player moved between states
    StateChanged { from: PlayerState, to: PlayerState },
    /// The cursor moved forward past a useful event
    UsefulEventCrossed {
        position: usize,
        sequence: u64,
        offset: u64,
        kind: InteractionKind,
        target: NodeId,
        description: String,
    },
    /// The highlighted feed item changed
    ActiveItemChanged {
        position: Option<usize>,
        sequence: Option<u64>,
    },
    /// New events extended a live session
    TimelineExtended { added: usize, total_duration: u64 },
    /// The live session was finalized
    SessionEnded { session: SessionId },
    /// A command or load failed
    Error { message: String },
}

/// Discriminant of [`PlayerEvent`], used to register callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    StateChanged,
    UsefulEventCrossed,
    ActiveItemChanged,
    TimelineExtended,
    SessionEnded,
    Error,
}

impl PlayerEvent {
    pub fn kind(&self) -> PlayerEventKind {
        match self {
            Self::StateChanged { .. } => PlayerEventKind::StateChanged,
            Self::UsefulEventCrossed { .. } => PlayerEventKind::UsefulEventCrossed,
            Self::ActiveItemChanged { .. } => PlayerEventKind::ActiveItemChanged,
            Self::TimelineExtended { .. } => PlayerEventKind::TimelineExtended,
            Self::SessionEnded { .. } => PlayerEventKind::SessionEnded,
            Self::Error { .. } => PlayerEventKind::Error,
        }
    }

    pub(crate) fn crossed(item: &ActivityItem) -> Self {
        Self::UsefulEventCrossed {
            position: item.position,
            sequence: item.sequence,
            offset: item.offset,
            kind: item.kind,
            target: item.target,
            description: item.description.clone(),
        }
    }
}
