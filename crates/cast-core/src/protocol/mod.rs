//! PSS wire protocol: event model and frame decoder.

pub mod events;
pub mod frame;

pub use events::{Athlete, DecodedEvent, EventKind};
pub use frame::{decode_frame, DecodeError};
