//! Event envelopes
//!
//! An [`EventEnvelope`] is one recorded browser occurrence: a full DOM
//! snapshot, an incremental change (mutation, pointer, scroll, input), a
//! page meta record, or the explicit end of a session.
//!
//! ## Wire format
//!
//! Envelopes travel as JSON records. Variants are internally tagged:
//!
//! ```text
//! {"session_id":"S1","sequence":1,"timestamp":1500,
//!  "data":{"type":"incremental","source":"mouse_interaction","kind":"click","id":12}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::node::{NodeId, SerializedNode};
use crate::session::SessionId;

/// One recorded, timestamped browser occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Session this event belongs to
    pub session_id: SessionId,
    /// Dense per-session sequence number starting at 0
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// What was recorded
    pub data: EventKind,
}

/// Top-level event type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Complete DOM state; a reconstruction checkpoint
    FullSnapshot { node: SerializedNode },
    /// A change relative to the previous DOM state
    Incremental(IncrementalData),
    /// Page location and viewport size
    Meta { href: String, width: u32, height: u32 },
    /// The recorder ended the session explicitly
    SessionClosed,
}

/// Incremental event payloads, tagged by their source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum IncrementalData {
    Mutation(MutationData),
    MouseMove {
        positions: Vec<PointerPosition>,
    },
    MouseInteraction {
        kind: InteractionKind,
        id: NodeId,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Scroll {
        id: NodeId,
        x: f64,
        y: f64,
    },
    ViewportResize {
        width: u32,
        height: u32,
    },
    Input {
        id: NodeId,
        text: String,
        #[serde(default)]
        is_checked: bool,
    },
}

/// Incremental source discriminant, for logging and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncrementalSource {
    Mutation,
    MouseMove,
    MouseInteraction,
    Scroll,
    ViewportResize,
    Input,
}

impl fmt::Display for IncrementalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mutation => write!(f, "mutation"),
            Self::MouseMove => write!(f, "mouse_move"),
            Self::MouseInteraction => write!(f, "mouse_interaction"),
            Self::Scroll => write!(f, "scroll"),
            Self::ViewportResize => write!(f, "viewport_resize"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Kind of a mouse/touch/focus interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    MouseUp,
    MouseDown,
    Click,
    ContextMenu,
    DblClick,
    Focus,
    Blur,
    TouchStart,
    TouchEnd,
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MouseUp => "MouseUp",
            Self::MouseDown => "MouseDown",
            Self::Click => "Click",
            Self::ContextMenu => "ContextMenu",
            Self::DblClick => "DblClick",
            Self::Focus => "Focus",
            Self::Blur => "Blur",
            Self::TouchStart => "TouchStart",
            Self::TouchEnd => "TouchEnd",
        };
        f.write_str(name)
    }
}

/// A batch of DOM changes, applied removes → adds → texts → attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationData {
    #[serde(default)]
    pub removes: Vec<RemovedNode>,
    #[serde(default)]
    pub adds: Vec<AddedNode>,
    #[serde(default)]
    pub texts: Vec<TextChange>,
    #[serde(default)]
    pub attributes: Vec<AttributeChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedNode {
    pub parent_id: NodeId,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedNode {
    pub parent_id: NodeId,
    /// Insert before this sibling; append when absent
    #[serde(default)]
    pub next_id: Option<NodeId>,
    pub node: SerializedNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChange {
    pub id: NodeId,
    pub value: String,
}

/// Attribute updates for one node; a `None` value removes the attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub id: NodeId,
    pub attributes: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub id: Option<NodeId>,
}

impl IncrementalData {
    /// The source discriminant of this payload
    pub fn source(&self) -> IncrementalSource {
        match self {
            Self::Mutation(_) => IncrementalSource::Mutation,
            Self::MouseMove { .. } => IncrementalSource::MouseMove,
            Self::MouseInteraction { .. } => IncrementalSource::MouseInteraction,
            Self::Scroll { .. } => IncrementalSource::Scroll,
            Self::ViewportResize { .. } => IncrementalSource::ViewportResize,
            Self::Input { .. } => IncrementalSource::Input,
        }
    }
}

impl EventEnvelope {
    /// Create an envelope
    pub fn new(session_id: SessionId, sequence: u64, timestamp: i64, data: EventKind) -> Self {
        Self {
            session_id,
            sequence,
            timestamp,
            data,
        }
    }

    /// Create a full snapshot envelope
    pub fn full_snapshot(
        session_id: SessionId,
        sequence: u64,
        timestamp: i64,
        node: SerializedNode,
    ) -> Self {
        Self::new(session_id, sequence, timestamp, EventKind::FullSnapshot { node })
    }

    /// Create an incremental envelope
    pub fn incremental(
        session_id: SessionId,
        sequence: u64,
        timestamp: i64,
        data: IncrementalData,
    ) -> Self {
        Self::new(session_id, sequence, timestamp, EventKind::Incremental(data))
    }

    /// Create a mouse interaction envelope targeting `id`
    pub fn interaction(
        session_id: SessionId,
        sequence: u64,
        timestamp: i64,
        kind: InteractionKind,
        id: NodeId,
    ) -> Self {
        Self::incremental(
            session_id,
            sequence,
            timestamp,
            IncrementalData::MouseInteraction {
                kind,
                id,
                x: 0.0,
                y: 0.0,
            },
        )
    }

    /// Create a mutation envelope
    pub fn mutation(
        session_id: SessionId,
        sequence: u64,
        timestamp: i64,
        mutation: MutationData,
    ) -> Self {
        Self::incremental(
            session_id,
            sequence,
            timestamp,
            IncrementalData::Mutation(mutation),
        )
    }

    /// Create a session-closed marker
    pub fn session_closed(session_id: SessionId, sequence: u64, timestamp: i64) -> Self {
        Self::new(session_id, sequence, timestamp, EventKind::SessionClosed)
    }

    /// Parse an envelope from a JSON string
    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether this envelope is a reconstruction checkpoint
    pub fn is_full_snapshot(&self) -> bool {
        matches!(self.data, EventKind::FullSnapshot { .. })
    }

    /// Whether this envelope ends its session
    pub fn is_session_closed(&self) -> bool {
        matches!(self.data, EventKind::SessionClosed)
    }

    /// Incremental source, if this is an incremental event
    pub fn source(&self) -> Option<IncrementalSource> {
        match &self.data {
            EventKind::Incremental(data) => Some(data.source()),
            _ => None,
        }
    }

    /// Interaction kind and target, if this is a mouse interaction
    pub fn interaction_kind(&self) -> Option<(InteractionKind, NodeId)> {
        match &self.data {
            EventKind::Incremental(IncrementalData::MouseInteraction { kind, id, .. }) => {
                Some((*kind, *id))
            }
            _ => None,
        }
    }

    /// Short name of the event type, for logs
    pub fn type_name(&self) -> &'static str {
        match &self.data {
            EventKind::FullSnapshot { .. } => "full_snapshot",
            EventKind::Incremental(_) => "incremental",
            EventKind::Meta { .. } => "meta",
            EventKind::SessionClosed => "session_closed",
        }
    }

    /// Check the invariants an envelope must satisfy on its own
    ///
    /// Node references are checked during reconstruction, not here.
    pub fn validate_for(&self, session_id: &SessionId) -> Result<(), EnvelopeError> {
        if self.session_id.is_empty() {
            return Err(EnvelopeError::EmptySessionId);
        }
        if &self.session_id != session_id {
            return Err(EnvelopeError::SessionMismatch {
                expected: session_id.clone(),
                actual: self.session_id.clone(),
            });
        }
        if self.timestamp < 0 {
            return Err(EnvelopeError::NegativeTimestamp(self.timestamp));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::from("S1")
    }

    #[test]
    fn test_parse_click() {
        let json = r#"{"session_id":"S1","sequence":1,"timestamp":500,"data":{"type":"incremental","source":"mouse_interaction","kind":"click","id":12,"x":4.0,"y":8.0}}"#;
        let env = EventEnvelope::from_json(json).unwrap();
        assert_eq!(env.sequence, 1);
        assert_eq!(env.source(), Some(IncrementalSource::MouseInteraction));
        assert_eq!(env.interaction_kind(), Some((InteractionKind::Click, 12)));
    }

    #[test]
    fn test_parse_full_snapshot() {
        let json = r#"{"session_id":"S1","sequence":0,"timestamp":0,"data":{"type":"full_snapshot","node":{"node_type":"document","id":1,"children":[{"node_type":"element","id":2,"tag":"html"}]}}}"#;
        let env = EventEnvelope::from_json(json).unwrap();
        assert!(env.is_full_snapshot());
        assert_eq!(env.source(), None);
    }

    #[test]
    fn test_parse_mutation_with_defaults() {
        let json = r#"{"session_id":"S1","sequence":4,"timestamp":900,"data":{"type":"incremental","source":"mutation","texts":[{"id":4,"value":"hi"}]}}"#;
        let env = EventEnvelope::from_json(json).unwrap();
        match env.data {
            EventKind::Incremental(IncrementalData::Mutation(m)) => {
                assert!(m.adds.is_empty());
                assert_eq!(m.texts.len(), 1);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_parse_session_closed() {
        let json = r#"{"session_id":"S1","sequence":9,"timestamp":9000,"data":{"type":"session_closed"}}"#;
        assert!(EventEnvelope::from_json(json).unwrap().is_session_closed());
    }

    #[test]
    fn test_unknown_type_is_decode_error() {
        let json = r#"{"session_id":"S1","sequence":0,"timestamp":0,"data":{"type":"plugin"}}"#;
        assert!(matches!(
            EventEnvelope::from_json(json),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_tags() {
        let env = EventEnvelope::interaction(sid(), 3, 100, InteractionKind::Focus, 9);
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"incremental""#));
        assert!(json.contains(r#""source":"mouse_interaction""#));
        assert!(json.contains(r#""kind":"focus""#));
        assert_eq!(EventEnvelope::from_json(&json).unwrap(), env);
    }

    #[test]
    fn test_validate_for() {
        let env = EventEnvelope::session_closed(sid(), 0, 10);
        assert!(env.validate_for(&sid()).is_ok());
        assert!(matches!(
            env.validate_for(&SessionId::from("S2")),
            Err(EnvelopeError::SessionMismatch { .. })
        ));

        let negative = EventEnvelope::session_closed(sid(), 0, -1);
        assert_eq!(
            negative.validate_for(&sid()),
            Err(EnvelopeError::NegativeTimestamp(-1))
        );
    }
}
