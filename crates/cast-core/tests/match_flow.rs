//! Integration tests for cast-core: frames decoded through the public API and
//! applied to the aggregator and event log together, the way the server
//! pipeline drives them.

use std::time::SystemTime;

use cast_core::log::EventLog;
use cast_core::state::{AggregatorConfig, MatchAggregator};
use cast_core::{decode_frame, Athlete, DecodeError};

fn now() -> SystemTime {
    SystemTime::now()
}

#[test]
fn test_round_then_two_blue_points_yield_expected_state() {
    let mut agg = MatchAggregator::new(AggregatorConfig::default());
    agg.load("KIM", "LOPEZ");

    for raw in ["round;2;", "point-blue;", "point-blue;"] {
        let event = decode_frame(raw, now()).expect("valid frame");
        agg.apply(&event).expect("applicable event");
    }

    let state = agg.snapshot();
    assert_eq!(state.current_round, 2);
    assert_eq!(state.per_round_scores[1].blue, 2);
    assert_eq!(state.current_scores.blue, 2);
    assert_eq!(state.current_scores.red, 0);
}

#[test]
fn test_malformed_frames_do_not_stop_the_stream() {
    let mut agg = MatchAggregator::new(AggregatorConfig::default());
    let mut log = EventLog::new(16);
    agg.load("A", "B");

    let frames = ["clock;", "round;abc;", "", "point-red;"];
    let mut failures = 0usize;

    for raw in frames {
        match decode_frame(raw, now()) {
            Ok(event) => {
                agg.apply(&event).unwrap();
                log.append(event);
            }
            Err(_) => failures += 1,
        }
    }

    assert_eq!(failures, 3);
    assert_eq!(agg.snapshot().current_scores.red, 1);
    assert_eq!(log.len(), 1);
}

#[test]
fn test_decode_failures_are_typed_per_cause() {
    assert_eq!(
        decode_frame("clock;", now()),
        Err(DecodeError::MissingTime)
    );
    assert!(matches!(
        decode_frame("round;abc;", now()),
        Err(DecodeError::InvalidRound(_))
    ));
    assert_eq!(decode_frame("", now()), Err(DecodeError::EmptyFrame));
}

#[test]
fn test_log_and_state_consume_the_same_stream_independently() {
    let mut agg = MatchAggregator::new(AggregatorConfig::default());
    let mut log = EventLog::new(100);
    agg.load("A", "B");

    let frames = [
        "point-blue;",
        "warning-red;",
        "hit-level-blue;51;",
        "point-red;",
    ];
    for raw in frames {
        let event = decode_frame(raw, now()).unwrap();
        agg.apply(&event).unwrap();
        log.append(event);
    }

    assert_eq!(log.len(), 4);
    assert_eq!(log.query(Some(Athlete::Blue), None).len(), 2);

    let state = agg.snapshot();
    assert_eq!(state.current_scores.blue, 1);
    assert_eq!(state.current_scores.red, 1);
    assert_eq!(state.red.warnings, 1);
    assert_eq!(state.blue.last_hit_level, Some(51));
}
