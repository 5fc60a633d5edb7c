//! Decoded PSS event model.
//!
//! A [`DecodedEvent`] is produced once per datagram by the frame decoder and
//! then fanned out to every downstream consumer (aggregator, event log,
//! dispatcher).  It is immutable after construction: consumers either copy
//! fields into their own state or store the whole value.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The competitor (or official) a PSS event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Athlete {
    Blue,
    Red,
    /// Events not tied to a corner (clock, round, referee challenges).
    Referee,
}

impl fmt::Display for Athlete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Athlete::Blue => write!(f, "blue"),
            Athlete::Red => write!(f, "red"),
            Athlete::Referee => write!(f, "referee"),
        }
    }
}

/// The category of a decoded PSS event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A scored point for one athlete.
    Point,
    /// A penalty (gam-jeom) against one athlete.
    Warning,
    /// A video-review challenge raised by a coach or the referee.
    Challenge,
    /// A match clock update.
    Clock,
    /// A round change.
    Round,
    /// An impact-sensor reading that did not necessarily score.
    HitLevel,
}

impl EventKind {
    /// Every kind the decoder can produce, in a stable order.
    ///
    /// The presentation layer uses this to populate trigger configuration
    /// drop-downs, so the order is part of the UI contract.
    pub const ALL: [EventKind; 6] = [
        EventKind::Point,
        EventKind::Warning,
        EventKind::Challenge,
        EventKind::Clock,
        EventKind::Round,
        EventKind::HitLevel,
    ];
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Point => "point",
            EventKind::Warning => "warning",
            EventKind::Challenge => "challenge",
            EventKind::Clock => "clock",
            EventKind::Round => "round",
            EventKind::HitLevel => "hit-level",
        };
        write!(f, "{s}")
    }
}

/// One decoded PSS event, stamped with its arrival time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Unique id assigned at decode time.
    pub id: Uuid,
    /// Event category.
    pub kind: EventKind,
    /// The event key exactly as it appeared on the wire (e.g. `point-blue`).
    pub code: String,
    /// Which corner the event belongs to.
    pub athlete: Athlete,
    /// Round number carried by `round` events; 0 otherwise.
    pub round: u32,
    /// Clock string carried by `clock` events (`m:ss`); empty otherwise.
    pub clock_time: String,
    /// Impact level carried by `hit-level` events, when the sensor token
    /// parsed; `None` otherwise.
    pub hit_level: Option<u32>,
    /// When the datagram was received.
    pub arrival: SystemTime,
    /// The raw frame the event was decoded from, kept for audit display.
    pub raw: String,
    /// Human-readable summary for the event log.
    pub description: String,
}
