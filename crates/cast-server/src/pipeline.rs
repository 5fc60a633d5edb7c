//! Decode/apply pipeline: raw frames in, fanned-out decoded events.
//!
//! Exactly one task runs this loop, so events reach the aggregator in
//! arrival order and state transitions never interleave.  For each raw
//! frame the task:
//!
//! 1. decodes it (failures counted, never fatal),
//! 2. applies it to the match aggregator (the single logical writer),
//! 3. appends it to the bounded event log,
//! 4. offers it to the dispatcher's drop-oldest queue.
//!
//! The log and the dispatcher are independent consumers: a slow dispatcher
//! evicts its own oldest entries and never delays the log or the aggregator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cast_core::log::EventLog;
use cast_core::state::MatchAggregator;
use cast_core::{decode_frame, DecodedEvent};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatch::DropOldestQueue;
use crate::ingest::RawFrame;

/// Monotonic pipeline accounting, readable from any thread.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub received: AtomicU64,
    pub decoded: AtomicU64,
    pub decode_failures: AtomicU64,
    pub applied: AtomicU64,
    pub apply_errors: AtomicU64,
    pub logged: AtomicU64,
    pub dispatch_enqueued: AtomicU64,
    pub dispatch_evicted: AtomicU64,
}

/// Plain-value snapshot of [`PipelineCounters`] for the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CountersSnapshot {
    pub received: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub applied: u64,
    pub apply_errors: u64,
    pub logged: u64,
    pub dispatch_enqueued: u64,
    pub dispatch_evicted: u64,
    pub dispatch_delivered: u64,
    pub dispatch_failed: u64,
    pub ingest_dropped: u64,
}

impl PipelineCounters {
    pub fn snapshot(
        &self,
        dispatch_delivered: u64,
        dispatch_failed: u64,
        ingest_dropped: u64,
    ) -> CountersSnapshot {
        CountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            apply_errors: self.apply_errors.load(Ordering::Relaxed),
            logged: self.logged.load(Ordering::Relaxed),
            dispatch_enqueued: self.dispatch_enqueued.load(Ordering::Relaxed),
            dispatch_evicted: self.dispatch_evicted.load(Ordering::Relaxed),
            dispatch_delivered,
            dispatch_failed,
            ingest_dropped,
        }
    }
}

/// Shared pipeline state: the aggregator and log behind their own locks.
///
/// The pipeline task is the only writer; the command surface takes short
/// read locks for snapshots and queries.
#[derive(Clone)]
pub struct PipelineState {
    pub aggregator: Arc<Mutex<MatchAggregator>>,
    pub event_log: Arc<Mutex<EventLog>>,
}

/// Runs the decode/apply loop until the frame channel closes or shutdown
/// fires.  A closed channel means the listener (and every injector) is gone.
pub async fn run_pipeline(
    mut frames: mpsc::Receiver<RawFrame>,
    state: PipelineState,
    dispatch_queue: Arc<DropOldestQueue<DecodedEvent>>,
    counters: Arc<PipelineCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => {
                    info!("frame channel closed; pipeline stopped");
                    return;
                }
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("pipeline stopped");
                    return;
                }
                continue;
            }
        };

        counters.received.fetch_add(1, Ordering::Relaxed);
        process_frame(&frame, &state, &dispatch_queue, &counters);
    }
}

/// Decodes and fans out one frame.  Synchronous: all three sinks are
/// non-blocking, so the hot path never awaits.
fn process_frame(
    frame: &RawFrame,
    state: &PipelineState,
    dispatch_queue: &DropOldestQueue<DecodedEvent>,
    counters: &PipelineCounters,
) {
    let event = match decode_frame(&frame.text, frame.arrival) {
        Ok(event) => event,
        Err(e) => {
            counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            debug!(frame = %frame.text, error = %e, "frame discarded");
            return;
        }
    };
    counters.decoded.fetch_add(1, Ordering::Relaxed);

    // 1. Aggregator: the one serialized writer.
    {
        let mut aggregator = match state.aggregator.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match aggregator.apply(&event) {
            Ok(()) => {
                counters.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.apply_errors.fetch_add(1, Ordering::Relaxed);
                warn!(kind = %event.kind, error = %e, "event not applied");
            }
        }
    }

    // 2. Event log: appended regardless of apply outcome — the log is an
    //    audit trail of what arrived, not of what changed state.
    {
        let mut log = match state.event_log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.append(event.clone());
        counters.logged.fetch_add(1, Ordering::Relaxed);
    }

    // 3. Dispatcher queue: drop-oldest, never blocks.
    counters.dispatch_enqueued.fetch_add(1, Ordering::Relaxed);
    if dispatch_queue.push(event) {
        counters.dispatch_evicted.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
