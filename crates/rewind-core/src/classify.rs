//! Useful event classification
//!
//! A "useful" event is a user interaction worth surfacing in the activity
//! feed next to the player. Classification is a pure function of the
//! envelope; which interaction kinds count is configurable.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::envelope::{EventEnvelope, InteractionKind};

/// Predicate deciding which envelopes are useful events
///
/// Only mouse interaction events can be useful. The default filter accepts
/// `Click` and `Focus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsefulEventFilter {
    kinds: BTreeSet<InteractionKind>,
}

impl UsefulEventFilter {
    /// Filter accepting exactly the given interaction kinds
    pub fn new(kinds: impl IntoIterator<Item = InteractionKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Add an interaction kind
    pub fn with_kind(mut self, kind: InteractionKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// The accepted interaction kinds, in order
    pub fn kinds(&self) -> impl Iterator<Item = InteractionKind> + '_ {
        self.kinds.iter().copied()
    }

    /// Whether the envelope is a useful event
    pub fn is_useful(&self, envelope: &EventEnvelope) -> bool {
        envelope
            .interaction_kind()
            .is_some_and(|(kind, _)| self.kinds.contains(&kind))
    }
}

impl Default for UsefulEventFilter {
    fn default() -> Self {
        Self::new([InteractionKind::Click, InteractionKind::Focus])
    }
}

/// Classify with the default filter
pub fn is_useful_event(envelope: &EventEnvelope) -> bool {
    UsefulEventFilter::default().is_useful(envelope)
}
