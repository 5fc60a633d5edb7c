//! cast-core: shared domain types for CornerCast.
//!
//! This crate is the leaf of the workspace: it contains the tolerant PSS
//! frame decoder, the single-writer match state aggregator, and the bounded
//! event log.  It has no async runtime dependency so it can be exercised from
//! plain unit tests and reused by any front end.

pub mod log;
pub mod protocol;
pub mod state;

pub use protocol::events::{Athlete, DecodedEvent, EventKind};
pub use protocol::frame::{decode_frame, DecodeError};
