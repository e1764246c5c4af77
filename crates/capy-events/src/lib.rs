//! capy-events: typed events shared by the CapyHost orchestrator and its panels.
//!
//! Every event is an immutable [`Event`] pairing an [`EventKind`] tag with the
//! matching [`EventPayload`]. Events are produced by host-side integrations,
//! broadcast to every live panel, and decoded on the panel side with
//! [`Event::decode`].

mod error;
mod event;
mod types;

pub use error::EventError;
pub use event::{Event, EventKind, EventPayload, Payload};
pub use types::*;
