//! Error types for capy-events

use crate::EventKind;

/// Event decoding errors
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A payload was read as a type that does not belong to the event's kind.
    #[error("payload mismatch: expected {expected}, event is {found}")]
    PayloadMismatch {
        expected: &'static str,
        found: EventKind,
    },

    /// The wire form named one kind but carried the payload of another.
    #[error("kind mismatch: tagged {tagged}, payload is {actual}")]
    KindMismatch { tagged: EventKind, actual: EventKind },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
