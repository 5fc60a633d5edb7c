//! Tolerant PSS frame decoder.
//!
//! Wire format: one ASCII frame per datagram, tokens separated by `;`.
//! The first token is the event key; `clock` and `round` carry one value
//! token, everything else is fully described by the key itself:
//!
//! ```text
//! point-blue;
//! warning-red;
//! challenge-referee;
//! clock;1:23;
//! round;2;
//! hit-level-blue;47;
//! ```
//!
//! The decoder is a pure function and must never stop the pipeline: every
//! input yields either a [`DecodedEvent`] or a typed [`DecodeError`].  Scoring
//! hardware in the field emits trailing delimiters, stray whitespace, and the
//! occasional truncated frame, so all of those are handled without panicking.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::events::{Athlete, DecodedEvent, EventKind};

/// The token delimiter used by the PSS wire format.
pub const FRAME_DELIMITER: char = ';';

/// Typed decode failure.  Non-fatal by contract: callers count and log these
/// and keep processing the next frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame contained no tokens at all (empty or delimiters only).
    #[error("empty frame")]
    EmptyFrame,

    /// The first token is not part of the event-key vocabulary.
    #[error("unknown event key: {0:?}")]
    UnknownKey(String),

    /// A `clock` frame arrived without its time token.
    #[error("clock frame missing time token")]
    MissingTime,

    /// The `clock` time token was not a parseable `m:ss` string.
    #[error("invalid clock time: {0:?}")]
    InvalidTime(String),

    /// The `round` value token was missing or not a non-negative integer.
    #[error("invalid round token: {0:?}")]
    InvalidRound(String),
}

/// Decodes one raw frame into a [`DecodedEvent`].
///
/// `arrival` is the receive timestamp stamped by the listener; the decoder
/// itself never reads the clock so decoding stays deterministic.
///
/// # Errors
///
/// Returns a [`DecodeError`] for malformed input.  Decoding never panics.
pub fn decode_frame(raw: &str, arrival: SystemTime) -> Result<DecodedEvent, DecodeError> {
    let mut tokens = raw
        .split(FRAME_DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let key = tokens.next().ok_or(DecodeError::EmptyFrame)?;
    let value = tokens.next();

    let (kind, athlete) = classify_key(key)?;

    let mut round = 0u32;
    let mut clock_time = String::new();
    let mut hit_level = None;
    let description;

    match kind {
        EventKind::Clock => {
            let token = value.ok_or(DecodeError::MissingTime)?;
            if !is_valid_clock(token) {
                return Err(DecodeError::InvalidTime(token.to_string()));
            }
            clock_time = token.to_string();
            description = format!("Clock {token}");
        }
        EventKind::Round => {
            let token = value.ok_or_else(|| DecodeError::InvalidRound(String::new()))?;
            round = token
                .parse::<u32>()
                .map_err(|_| DecodeError::InvalidRound(token.to_string()))?;
            description = format!("Round {round}");
        }
        EventKind::Point => {
            description = format!("Point for {athlete}");
        }
        EventKind::Warning => {
            description = format!("Warning against {athlete}");
        }
        EventKind::Challenge => {
            description = format!("Video review challenge by {athlete}");
        }
        EventKind::HitLevel => {
            // The impact level token is optional and advisory; a garbled
            // level does not invalidate the event.
            hit_level = value.and_then(|t| t.parse::<u32>().ok());
            description = match hit_level {
                Some(level) => format!("Hit level {level} on {athlete}"),
                None => format!("Hit registered on {athlete}"),
            };
        }
    }

    Ok(DecodedEvent {
        id: Uuid::new_v4(),
        kind,
        code: key.to_string(),
        athlete,
        round,
        clock_time,
        hit_level,
        arrival,
        raw: raw.to_string(),
        description,
    })
}

/// Maps an event key to its `(kind, athlete)` pair.
fn classify_key(key: &str) -> Result<(EventKind, Athlete), DecodeError> {
    let pair = match key {
        "point-blue" => (EventKind::Point, Athlete::Blue),
        "point-red" => (EventKind::Point, Athlete::Red),
        "warning-blue" => (EventKind::Warning, Athlete::Blue),
        "warning-red" => (EventKind::Warning, Athlete::Red),
        "challenge-blue" => (EventKind::Challenge, Athlete::Blue),
        "challenge-red" => (EventKind::Challenge, Athlete::Red),
        "challenge-referee" => (EventKind::Challenge, Athlete::Referee),
        "hit-level-blue" => (EventKind::HitLevel, Athlete::Blue),
        "hit-level-red" => (EventKind::HitLevel, Athlete::Red),
        "clock" => (EventKind::Clock, Athlete::Referee),
        "round" => (EventKind::Round, Athlete::Referee),
        other => return Err(DecodeError::UnknownKey(other.to_string())),
    };
    Ok(pair)
}

/// Returns `true` for a well-formed `m:ss` clock string (seconds < 60).
fn is_valid_clock(token: &str) -> bool {
    let Some((minutes, seconds)) = token.split_once(':') else {
        return false;
    };
    if seconds.len() != 2 {
        return false;
    }
    let minutes_ok = !minutes.is_empty() && minutes.parse::<u32>().is_ok();
    let seconds_ok = seconds.parse::<u32>().map(|s| s < 60).unwrap_or(false);
    minutes_ok && seconds_ok
}

// ── Tests ─────────────────────────────────────────────────────────────────────
