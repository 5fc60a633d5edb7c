//! Canonical match state and the single-writer aggregator.
//!
//! [`MatchAggregator`] owns the one mutable [`MatchState`] value.  Exactly one
//! logical writer calls [`MatchAggregator::apply`], in arrival order, so every
//! state transition is atomic and never interleaved.  Everything else sees the
//! state only through owned [`MatchAggregator::snapshot`] copies.
//!
//! Invariants maintained here:
//! - `current_round` is monotonically non-decreasing except across `reset`,
//!   and never exceeds [`MAX_ROUND`].
//! - Scores and warning counters never go negative (unsigned throughout).
//! - While no match is loaded, events that would touch a score or an athlete
//!   card are rejected and those fields stay at their defaults.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::protocol::events::{Athlete, DecodedEvent, EventKind};

/// Number of gam-jeom after which an athlete becomes eligible for
/// disqualification under WT rules.
pub const DEFAULT_WARNING_THRESHOLD: u32 = 5;

/// Highest round number the aggregator accepts.  WT bouts run three rounds
/// plus golden point; the cap leaves generous headroom while bounding the
/// per-round score allocation a single datagram can cause.
pub const MAX_ROUND: u32 = 32;

/// A structurally valid event that cannot be applied to the current state.
///
/// The event is dropped without mutating anything; the aggregator stays
/// usable for subsequent events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateApplyError {
    /// A score-affecting event arrived before a match was loaded.
    #[error("no match loaded; dropping {kind} event")]
    NotLoaded { kind: EventKind },

    /// A round event tried to move the round number backwards.
    #[error("round regression: current {current}, requested {requested}")]
    RoundRegression { current: u32, requested: u32 },

    /// A round event carried a number beyond the supported range.
    #[error("round {requested} beyond supported maximum {max}")]
    RoundOutOfRange { requested: u32, max: u32 },
}

/// Scores for one round, one slot per corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundScore {
    pub blue: u32,
    pub red: u32,
}

/// Per-athlete card: identity plus running penalty state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AthleteCard {
    pub name: String,
    /// Accumulated gam-jeom for this athlete.
    pub warnings: u32,
    /// Set once `warnings` crosses the configured threshold.  Read-only flag
    /// for the presentation layer; the aggregator never acts on it.
    pub disqualification_eligible: bool,
    /// Most recent impact-sensor reading, if the hardware reports one.
    pub last_hit_level: Option<u32>,
}

/// Immutable snapshot of the canonical match state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub blue: AthleteCard,
    pub red: AthleteCard,
    /// Scores per round, index 0 = round 1.
    pub per_round_scores: Vec<RoundScore>,
    /// Running totals across all rounds.
    pub current_scores: RoundScore,
    /// Rounds won so far per corner (a tied round is awarded to nobody).
    pub winner_rounds: RoundScore,
    pub current_round: u32,
    pub current_clock: String,
    pub loaded: bool,
    pub review_mode: bool,
    pub last_updated: Option<SystemTime>,
}

/// Tuning knobs for the aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Gam-jeom count at which the disqualification-eligible flag is raised.
    pub warning_threshold: u32,
    /// Point value per event code.  Codes absent from the table score 1.
    pub point_values: HashMap<String, u32>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            point_values: HashMap::new(),
        }
    }
}

/// The single writer over [`MatchState`].
#[derive(Debug, Default)]
pub struct MatchAggregator {
    state: MatchState,
    config: AggregatorConfig,
}

impl MatchAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            state: MatchState::default(),
            config,
        }
    }

    /// Loads a match: names the corners and arms scoring from round 1.
    pub fn load(&mut self, blue_name: &str, red_name: &str) {
        self.state = MatchState {
            blue: AthleteCard {
                name: blue_name.to_string(),
                ..AthleteCard::default()
            },
            red: AthleteCard {
                name: red_name.to_string(),
                ..AthleteCard::default()
            },
            per_round_scores: vec![RoundScore::default()],
            current_round: 1,
            current_clock: "0:00".to_string(),
            loaded: true,
            ..MatchState::default()
        };
    }

    /// Restores the unloaded initial state.
    pub fn reset(&mut self) {
        self.state = MatchState::default();
    }

    /// Clears review mode.  Driven by an explicit operator control, never by
    /// a decoded event.
    pub fn resume(&mut self) {
        self.state.review_mode = false;
    }

    /// Returns an owned copy of the current state.
    pub fn snapshot(&self) -> MatchState {
        self.state.clone()
    }

    /// Applies one decoded event to the match state.
    ///
    /// # Errors
    ///
    /// Returns [`StateApplyError`] when the event is inapplicable; the state
    /// is left untouched in that case.
    pub fn apply(&mut self, event: &DecodedEvent) -> Result<(), StateApplyError> {
        match event.kind {
            EventKind::Point => {
                self.require_loaded(event.kind)?;
                let value = self.point_value(&event.code);
                let round_idx = self.current_round_index();
                let scores = &mut self.state.per_round_scores[round_idx];
                match event.athlete {
                    Athlete::Blue => {
                        scores.blue += value;
                        self.state.current_scores.blue += value;
                    }
                    Athlete::Red => {
                        scores.red += value;
                        self.state.current_scores.red += value;
                    }
                    Athlete::Referee => {
                        debug!("point event without a corner; ignored");
                    }
                }
            }
            EventKind::Warning => {
                self.require_loaded(event.kind)?;
                let threshold = self.config.warning_threshold;
                let card = match event.athlete {
                    Athlete::Blue => &mut self.state.blue,
                    Athlete::Red => &mut self.state.red,
                    Athlete::Referee => return Ok(()),
                };
                card.warnings += 1;
                if card.warnings >= threshold {
                    card.disqualification_eligible = true;
                }
            }
            EventKind::Round => {
                self.require_loaded(event.kind)?;
                if event.round > MAX_ROUND {
                    return Err(StateApplyError::RoundOutOfRange {
                        requested: event.round,
                        max: MAX_ROUND,
                    });
                }
                if event.round < self.state.current_round {
                    return Err(StateApplyError::RoundRegression {
                        current: self.state.current_round,
                        requested: event.round,
                    });
                }
                if event.round > self.state.current_round {
                    self.close_round();
                }
                self.state.current_round = event.round;
                while self.state.per_round_scores.len() < event.round as usize {
                    self.state.per_round_scores.push(RoundScore::default());
                }
                // New round, fresh clock display.
                self.state.current_clock = "0:00".to_string();
            }
            EventKind::Clock => {
                self.state.current_clock = event.clock_time.clone();
            }
            EventKind::Challenge => {
                self.state.review_mode = true;
            }
            EventKind::HitLevel => {
                self.require_loaded(event.kind)?;
                match event.athlete {
                    Athlete::Blue => self.state.blue.last_hit_level = event.hit_level,
                    Athlete::Red => self.state.red.last_hit_level = event.hit_level,
                    Athlete::Referee => {}
                }
            }
        }

        self.state.last_updated = Some(event.arrival);
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn require_loaded(&self, kind: EventKind) -> Result<(), StateApplyError> {
        if self.state.loaded {
            Ok(())
        } else {
            Err(StateApplyError::NotLoaded { kind })
        }
    }

    fn point_value(&self, code: &str) -> u32 {
        self.config.point_values.get(code).copied().unwrap_or(1)
    }

    fn current_round_index(&self) -> usize {
        (self.state.current_round.max(1) - 1) as usize
    }

    /// Awards the round being left to whichever corner scored more in it.
    fn close_round(&mut self) {
        let idx = self.current_round_index();
        let Some(scores) = self.state.per_round_scores.get(idx) else {
            return;
        };
        if scores.blue > scores.red {
            self.state.winner_rounds.blue += 1;
        } else if scores.red > scores.blue {
            self.state.winner_rounds.red += 1;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::decode_frame;

    fn event(raw: &str) -> DecodedEvent {
        decode_frame(raw, SystemTime::UNIX_EPOCH).expect("test frame must decode")
    }

    fn loaded_aggregator() -> MatchAggregator {
        let mut agg = MatchAggregator::new(AggregatorConfig::default());
        agg.load("KIM", "LOPEZ");
        agg
    }

    // ── Loading and reset ─────────────────────────────────────────────────────

    #[test]
    fn test_initial_state_is_unloaded_with_default_fields() {
        let agg = MatchAggregator::new(AggregatorConfig::default());
        let state = agg.snapshot();
        assert!(!state.loaded);
        assert_eq!(state.current_scores, RoundScore::default());
        assert!(state.blue.name.is_empty());
        assert_eq!(state.current_round, 0);
    }

    #[test]
    fn test_load_arms_round_one_and_names_corners() {
        let agg = loaded_aggregator();
        let state = agg.snapshot();
        assert!(state.loaded);
        assert_eq!(state.current_round, 1);
        assert_eq!(state.blue.name, "KIM");
        assert_eq!(state.red.name, "LOPEZ");
    }

    #[test]
    fn test_reset_restores_unloaded_state() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("point-blue;")).unwrap();
        agg.reset();
        assert_eq!(agg.snapshot(), MatchState::default());
    }

    // ── Points ────────────────────────────────────────────────────────────────

    #[test]
    fn test_point_increments_current_round_and_total() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("point-blue;")).unwrap();
        agg.apply(&event("point-blue;")).unwrap();
        agg.apply(&event("point-red;")).unwrap();

        let state = agg.snapshot();
        assert_eq!(state.per_round_scores[0].blue, 2);
        assert_eq!(state.per_round_scores[0].red, 1);
        assert_eq!(state.current_scores.blue, 2);
        assert_eq!(state.current_scores.red, 1);
    }

    #[test]
    fn test_point_value_table_overrides_default() {
        let mut config = AggregatorConfig::default();
        config.point_values.insert("point-blue".to_string(), 3);
        let mut agg = MatchAggregator::new(config);
        agg.load("A", "B");

        agg.apply(&event("point-blue;")).unwrap();
        assert_eq!(agg.snapshot().current_scores.blue, 3);
    }

    #[test]
    fn test_point_before_load_is_dropped_without_mutation() {
        let mut agg = MatchAggregator::new(AggregatorConfig::default());
        let err = agg.apply(&event("point-blue;")).unwrap_err();
        assert_eq!(
            err,
            StateApplyError::NotLoaded {
                kind: EventKind::Point
            }
        );
        assert_eq!(agg.snapshot(), MatchState::default());
    }

    #[test]
    fn test_aggregator_stays_usable_after_apply_error() {
        let mut agg = MatchAggregator::new(AggregatorConfig::default());
        let _ = agg.apply(&event("point-blue;"));
        agg.load("A", "B");
        agg.apply(&event("point-blue;")).unwrap();
        assert_eq!(agg.snapshot().current_scores.blue, 1);
    }

    // ── Warnings ──────────────────────────────────────────────────────────────

    #[test]
    fn test_warning_increments_penalty_counter() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("warning-red;")).unwrap();
        agg.apply(&event("warning-red;")).unwrap();
        let state = agg.snapshot();
        assert_eq!(state.red.warnings, 2);
        assert!(!state.red.disqualification_eligible);
    }

    #[test]
    fn test_warning_threshold_raises_disqualification_flag() {
        let mut agg = loaded_aggregator();
        for _ in 0..DEFAULT_WARNING_THRESHOLD {
            agg.apply(&event("warning-blue;")).unwrap();
        }
        let state = agg.snapshot();
        assert!(state.blue.disqualification_eligible);
        assert!(!state.red.disqualification_eligible);
    }

    #[test]
    fn test_warning_before_load_is_rejected() {
        let mut agg = MatchAggregator::new(AggregatorConfig::default());
        assert!(matches!(
            agg.apply(&event("warning-blue;")),
            Err(StateApplyError::NotLoaded { .. })
        ));
    }

    // ── Rounds ────────────────────────────────────────────────────────────────

    #[test]
    fn test_round_event_sets_current_round_and_resets_clock() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("clock;1:42;")).unwrap();
        agg.apply(&event("round;2;")).unwrap();
        let state = agg.snapshot();
        assert_eq!(state.current_round, 2);
        assert_eq!(state.current_clock, "0:00");
        assert_eq!(state.per_round_scores.len(), 2);
    }

    #[test]
    fn test_round_then_points_apply_in_arrival_order() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("round;2;")).unwrap();
        agg.apply(&event("point-blue;")).unwrap();
        agg.apply(&event("point-blue;")).unwrap();

        let state = agg.snapshot();
        assert_eq!(state.current_round, 2);
        assert_eq!(state.per_round_scores[1].blue, 2);
        assert_eq!(state.current_scores.blue, 2);
    }

    #[test]
    fn test_round_transition_awards_previous_round_to_leader() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("point-blue;")).unwrap();
        agg.apply(&event("round;2;")).unwrap();
        assert_eq!(agg.snapshot().winner_rounds.blue, 1);
        assert_eq!(agg.snapshot().winner_rounds.red, 0);
    }

    #[test]
    fn test_tied_round_awards_nobody() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("point-blue;")).unwrap();
        agg.apply(&event("point-red;")).unwrap();
        agg.apply(&event("round;2;")).unwrap();
        assert_eq!(agg.snapshot().winner_rounds, RoundScore::default());
    }

    #[test]
    fn test_round_regression_is_rejected() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("round;3;")).unwrap();
        let err = agg.apply(&event("round;2;")).unwrap_err();
        assert_eq!(
            err,
            StateApplyError::RoundRegression {
                current: 3,
                requested: 2
            }
        );
        assert_eq!(agg.snapshot().current_round, 3);
    }

    #[test]
    fn test_absurd_round_number_is_rejected_without_allocation() {
        let mut agg = loaded_aggregator();
        let err = agg.apply(&event("round;10000000;")).unwrap_err();
        assert_eq!(
            err,
            StateApplyError::RoundOutOfRange {
                requested: 10_000_000,
                max: MAX_ROUND
            }
        );
        let state = agg.snapshot();
        assert_eq!(state.current_round, 1);
        assert_eq!(state.per_round_scores.len(), 1);
    }

    #[test]
    fn test_round_at_maximum_is_accepted() {
        let mut agg = loaded_aggregator();
        agg.apply(&event(&format!("round;{MAX_ROUND};"))).unwrap();
        assert_eq!(agg.snapshot().current_round, MAX_ROUND);
        assert_eq!(agg.snapshot().per_round_scores.len(), MAX_ROUND as usize);
    }

    #[test]
    fn test_repeated_same_round_event_is_harmless() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("round;2;")).unwrap();
        let before = agg.snapshot().winner_rounds;
        agg.apply(&event("round;2;")).unwrap();
        assert_eq!(agg.snapshot().winner_rounds, before);
    }

    // ── Clock, challenge, hit level ───────────────────────────────────────────

    #[test]
    fn test_clock_event_sets_clock_verbatim() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("clock;0:07;")).unwrap();
        assert_eq!(agg.snapshot().current_clock, "0:07");
    }

    #[test]
    fn test_challenge_enters_review_mode_and_resume_clears_it() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("challenge-referee;")).unwrap();
        assert!(agg.snapshot().review_mode);

        // A second challenge while already reviewing keeps the flag set.
        agg.apply(&event("challenge-blue;")).unwrap();
        assert!(agg.snapshot().review_mode);

        agg.resume();
        assert!(!agg.snapshot().review_mode);
    }

    #[test]
    fn test_hit_level_records_last_reading_per_corner() {
        let mut agg = loaded_aggregator();
        agg.apply(&event("hit-level-blue;33;")).unwrap();
        agg.apply(&event("hit-level-blue;48;")).unwrap();
        let state = agg.snapshot();
        assert_eq!(state.blue.last_hit_level, Some(48));
        assert_eq!(state.red.last_hit_level, None);
    }

    #[test]
    fn test_hit_level_before_load_is_rejected_without_mutation() {
        let mut agg = MatchAggregator::new(AggregatorConfig::default());
        let err = agg.apply(&event("hit-level-blue;47;")).unwrap_err();
        assert_eq!(
            err,
            StateApplyError::NotLoaded {
                kind: EventKind::HitLevel
            }
        );
        assert_eq!(agg.snapshot(), MatchState::default());
    }

    #[test]
    fn test_last_updated_tracks_arrival_timestamp() {
        let mut agg = loaded_aggregator();
        let arrival = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1234);
        let ev = decode_frame("clock;1:00;", arrival).unwrap();
        agg.apply(&ev).unwrap();
        assert_eq!(agg.snapshot().last_updated, Some(arrival));
    }
}
