//! Replay state: everything a viewer needs to render one instant

use rewind_core::{EnvelopeError, EventEnvelope, EventKind, IncrementalData, InteractionKind, NodeId};
use serde::Serialize;

use crate::dom::Dom;

/// Last known pointer position
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
    pub target: Option<NodeId>,
}

/// Browser viewport size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Page-level state that survives a full snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageContext {
    pub href: Option<String>,
    pub viewport: Option<Viewport>,
}

impl PageContext {
    /// Fold an event into the context; returns whether it changed
    pub fn observe(&mut self, envelope: &EventEnvelope) -> bool {
        match &envelope.data {
            EventKind::Meta {
                href,
                width,
                height,
            } => {
                self.href = Some(href.clone());
                self.viewport = Some(Viewport {
                    width: *width,
                    height: *height,
                });
                true
            }
            EventKind::Incremental(IncrementalData::ViewportResize { width, height }) => {
                self.viewport = Some(Viewport {
                    width: *width,
                    height: *height,
                });
                true
            }
            _ => false,
        }
    }
}

/// Reconstructed state at a point of the timeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayState {
    /// Document; `None` until the first full snapshot
    pub dom: Option<Dom>,
    pub page: PageContext,
    pub pointer: Option<Pointer>,
    /// Most recent mouse interaction since the last snapshot
    pub last_interaction: Option<(InteractionKind, NodeId)>,
}

impl ReplayState {
    /// Empty state carrying over page context from before a checkpoint
    pub fn with_page(page: PageContext) -> Self {
        Self {
            page,
            ..Default::default()
        }
    }

    /// Apply one event
    ///
    /// On error the state is unchanged.
    pub fn apply(&mut self, envelope: &EventEnvelope) -> Result<(), EnvelopeError> {
        match &envelope.data {
            EventKind::FullSnapshot { node } => {
                self.dom = Some(Dom::from_snapshot(node)?);
                self.pointer = None;
                self.last_interaction = None;
            }
            EventKind::Meta { .. } => {
                self.page.observe(envelope);
            }
            EventKind::SessionClosed => {}
            EventKind::Incremental(data) => self.apply_incremental(envelope, data)?,
        }
        Ok(())
    }

    fn apply_incremental(
        &mut self,
        envelope: &EventEnvelope,
        data: &IncrementalData,
    ) -> Result<(), EnvelopeError> {
        if let IncrementalData::ViewportResize { .. } = data {
            self.page.observe(envelope);
            return Ok(());
        }

        let dom = self.dom.as_mut().ok_or(EnvelopeError::UnknownNode(
            referenced_node(data).unwrap_or_default(),
        ))?;

        match data {
            IncrementalData::Mutation(mutation) => dom.apply_mutation(mutation)?,
            IncrementalData::MouseMove { positions } => {
                if let Some(target) = positions.iter().find_map(|p| p.id)
                    && !dom.contains(target)
                {
                    return Err(EnvelopeError::UnknownNode(target));
                }
                if let Some(last) = positions.last() {
                    self.pointer = Some(Pointer {
                        x: last.x,
                        y: last.y,
                        target: last.id,
                    });
                }
            }
            IncrementalData::MouseInteraction { kind, id, x, y } => {
                if !dom.contains(*id) {
                    return Err(EnvelopeError::UnknownNode(*id));
                }
                self.pointer = Some(Pointer {
                    x: *x,
                    y: *y,
                    target: Some(*id),
                });
                self.last_interaction = Some((*kind, *id));
            }
            IncrementalData::Scroll { id, x, y } => dom.scroll(*id, *x, *y)?,
            IncrementalData::Input {
                id,
                text,
                is_checked,
            } => dom.input(*id, text, *is_checked)?,
            IncrementalData::ViewportResize { .. } => {}
        }
        Ok(())
    }

    /// Describe a node of the current document
    pub fn describe(&self, id: NodeId) -> String {
        match &self.dom {
            Some(dom) => dom.describe(id),
            None => format!("unknown node {id}"),
        }
    }
}

/// First node id an incremental payload refers to
fn referenced_node(data: &IncrementalData) -> Option<NodeId> {
    match data {
        IncrementalData::Mutation(m) => m
            .removes
            .first()
            .map(|r| r.parent_id)
            .or_else(|| m.adds.first().map(|a| a.parent_id))
            .or_else(|| m.texts.first().map(|t| t.id))
            .or_else(|| m.attributes.first().map(|a| a.id)),
        IncrementalData::MouseMove { positions } => positions.iter().find_map(|p| p.id),
        IncrementalData::MouseInteraction { id, .. }
        | IncrementalData::Scroll { id, .. }
        | IncrementalData::Input { id, .. } => Some(*id),
        IncrementalData::ViewportResize { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::{PointerPosition, SerializedNode, SessionId};

    fn sid() -> SessionId {
        SessionId::from("S1")
    }

    fn snapshot(seq: u64) -> EventEnvelope {
        EventEnvelope::full_snapshot(
            sid(),
            seq,
            0,
            SerializedNode::Document {
                id: 1,
                children: vec![SerializedNode::element(2, "a", vec![], vec![])],
            },
        )
    }

    #[test]
    fn test_event_before_snapshot_is_malformed() {
        let mut state = ReplayState::default();
        let click = EventEnvelope::interaction(sid(), 0, 0, InteractionKind::Click, 2);
        assert_eq!(state.apply(&click), Err(EnvelopeError::UnknownNode(2)));
        assert_eq!(state, ReplayState::default());
    }

    #[test]
    fn test_snapshot_resets_pointer_keeps_page() {
        let mut state = ReplayState::default();
        state
            .apply(&EventEnvelope::new(
                sid(),
                0,
                0,
                EventKind::Meta {
                    href: "https://example.com".into(),
                    width: 800,
                    height: 600,
                },
            ))
            .unwrap();
        state.apply(&snapshot(1)).unwrap();
        state
            .apply(&EventEnvelope::interaction(sid(), 2, 5, InteractionKind::Click, 2))
            .unwrap();
        assert_eq!(state.last_interaction, Some((InteractionKind::Click, 2)));

        state.apply(&snapshot(3)).unwrap();
        assert!(state.pointer.is_none());
        assert!(state.last_interaction.is_none());
        assert_eq!(state.page.href.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_mouse_move_tracks_last_position() {
        let mut state = ReplayState::default();
        state.apply(&snapshot(0)).unwrap();
        let moved = EventEnvelope::incremental(
            sid(),
            1,
            10,
            IncrementalData::MouseMove {
                positions: vec![
                    PointerPosition { x: 1.0, y: 1.0, id: None },
                    PointerPosition { x: 5.0, y: 6.0, id: Some(2) },
                ],
            },
        );
        state.apply(&moved).unwrap();
        assert_eq!(
            state.pointer,
            Some(Pointer {
                x: 5.0,
                y: 6.0,
                target: Some(2)
            })
        );
    }

    #[test]
    fn test_viewport_resize_without_dom() {
        let mut state = ReplayState::default();
        let resize = EventEnvelope::incremental(
            sid(),
            0,
            0,
            IncrementalData::ViewportResize {
                width: 1024,
                height: 768,
            },
        );
        state.apply(&resize).unwrap();
        assert_eq!(
            state.page.viewport,
            Some(Viewport {
                width: 1024,
                height: 768
            })
        );
    }
}
