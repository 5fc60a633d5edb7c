//! Bounded, newest-first event log.
//!
//! The log is an independent consumer of the decoded-event stream: it stores
//! whole [`DecodedEvent`] values (plus a derived severity) in a fixed-capacity
//! ring.  Newest entries are logically first for display; once the log is
//! full, appending evicts the oldest entry.
//!
//! `VecDeque` gives O(1) amortised append at the front and O(1) eviction at
//! the back, which keeps the log off the hot path's critical section.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::protocol::events::{Athlete, DecodedEvent, EventKind};

/// Default number of entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Display severity derived from the event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
}

impl Severity {
    fn for_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::Warning | EventKind::Challenge => Severity::Warn,
            _ => Severity::Info,
        }
    }
}

/// One audit-log row: the decoded event plus its display severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event: DecodedEvent,
    pub severity: Severity,
}

/// Fixed-capacity, newest-first event log.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<EventLogEntry>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Appends an event, evicting the oldest entry when at capacity.
    ///
    /// With a capacity of zero the log stays empty; the event is discarded.
    pub fn append(&mut self, event: DecodedEvent) {
        if self.capacity == 0 {
            return;
        }
        let severity = Severity::for_kind(event.kind);
        self.entries.push_front(EventLogEntry { event, severity });
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Removes all entries; the capacity is unchanged.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes the capacity, trimming excess oldest entries immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_back();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns entries newest-first, filtered by the optional criteria.
    ///
    /// No filter means pass-through; both filters combine with AND.
    pub fn query(&self, athlete: Option<Athlete>, code: Option<&str>) -> Vec<EventLogEntry> {
        self.entries
            .iter()
            .filter(|entry| athlete.map_or(true, |a| entry.event.athlete == a))
            .filter(|entry| code.map_or(true, |c| entry.event.code == c))
            .cloned()
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::decode_frame;
    use std::time::SystemTime;

    fn event(raw: &str) -> DecodedEvent {
        decode_frame(raw, SystemTime::UNIX_EPOCH).unwrap()
    }

    #[test]
    fn test_append_stores_newest_first() {
        let mut log = EventLog::new(10);
        log.append(event("point-blue;"));
        log.append(event("point-red;"));

        let entries = log.query(None, None);
        assert_eq!(entries[0].event.code, "point-red");
        assert_eq!(entries[1].event.code, "point-blue");
    }

    #[test]
    fn test_capacity_overflow_evicts_oldest_and_preserves_order() {
        let mut log = EventLog::new(3);
        log.append(event("point-blue;"));
        log.append(event("warning-blue;"));
        log.append(event("point-red;"));
        log.append(event("warning-red;")); // evicts point-blue

        assert_eq!(log.len(), 3);
        let codes: Vec<_> = log
            .query(None, None)
            .into_iter()
            .map(|e| e.event.code)
            .collect();
        assert_eq!(codes, vec!["warning-red", "point-red", "warning-blue"]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut log = EventLog::new(5);
        for _ in 0..20 {
            log.append(event("point-blue;"));
            assert!(log.len() <= 5);
        }
    }

    #[test]
    fn test_zero_capacity_log_stays_empty() {
        let mut log = EventLog::new(0);
        log.append(event("point-blue;"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_set_capacity_trims_oldest_immediately() {
        let mut log = EventLog::new(10);
        log.append(event("point-blue;"));
        log.append(event("point-red;"));
        log.append(event("warning-blue;"));

        log.set_capacity(1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.query(None, None)[0].event.code, "warning-blue");
    }

    #[test]
    fn test_set_capacity_zero_then_raise_allows_appends_again() {
        let mut log = EventLog::new(5);
        log.append(event("point-blue;"));
        log.set_capacity(0);
        assert!(log.is_empty());

        log.append(event("point-red;"));
        assert!(log.is_empty(), "capacity zero must stay empty");

        log.set_capacity(2);
        log.append(event("point-red;"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_clear_empties_but_keeps_capacity() {
        let mut log = EventLog::new(2);
        log.append(event("point-blue;"));
        log.clear();
        assert!(log.is_empty());
        log.append(event("point-red;"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_query_filters_by_athlete() {
        let mut log = EventLog::new(10);
        log.append(event("point-blue;"));
        log.append(event("point-red;"));
        log.append(event("warning-blue;"));

        let blue = log.query(Some(Athlete::Blue), None);
        assert_eq!(blue.len(), 2);
        assert!(blue.iter().all(|e| e.event.athlete == Athlete::Blue));
    }

    #[test]
    fn test_query_filters_by_code() {
        let mut log = EventLog::new(10);
        log.append(event("point-blue;"));
        log.append(event("warning-blue;"));

        let warnings = log.query(None, Some("warning-blue"));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].event.code, "warning-blue");
    }

    #[test]
    fn test_query_combines_filters_with_and() {
        let mut log = EventLog::new(10);
        log.append(event("point-blue;"));
        log.append(event("point-red;"));

        let hits = log.query(Some(Athlete::Red), Some("point-red"));
        assert_eq!(hits.len(), 1);
        let misses = log.query(Some(Athlete::Blue), Some("point-red"));
        assert!(misses.is_empty());
    }

    #[test]
    fn test_severity_derived_from_kind() {
        let mut log = EventLog::new(10);
        log.append(event("warning-blue;"));
        log.append(event("challenge-referee;"));
        log.append(event("point-blue;"));

        let entries = log.query(None, None);
        assert_eq!(entries[0].severity, Severity::Info); // point
        assert_eq!(entries[1].severity, Severity::Warn); // challenge
        assert_eq!(entries[2].severity, Severity::Warn); // warning
    }
}
