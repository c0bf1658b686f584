//! # Rewind Core
//!
//! Core types, envelopes, and errors for the Rewind session replay pipeline.
//!
//! Every other crate in the workspace speaks in terms of the types defined
//! here: the recorder produces [`EventEnvelope`]s, the ingestion queue moves
//! them, the timeline store orders them and the replay engine applies them.
//!
//! ## Key Types
//!
//! - [`SessionId`]: Opaque identifier of a recording session
//! - [`EventEnvelope`]: One recorded, timestamped browser occurrence
//! - [`EventKind`] / [`IncrementalData`]: What the envelope records
//! - [`SerializedNode`]: A DOM subtree as captured by the recorder
//! - [`SessionMeta`]: Summary of a stored session (duration, liveness)
//! - [`UsefulEventFilter`]: Which interactions count as useful events
//!
//! ## Errors
//!
//! [`PipelineError`] is the shared error taxonomy. Each crate has its own
//! error enum and converts into it at the boundaries.

pub mod classify;
pub mod envelope;
pub mod error;
pub mod node;
pub mod session;

// Re-export main types
pub use classify::*;
pub use envelope::*;
pub use error::*;
pub use node::*;
pub use session::*;
