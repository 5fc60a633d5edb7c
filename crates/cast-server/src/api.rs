//! In-process command surface for the presentation layer.
//!
//! [`CommandSurface`] bundles every operator-facing operation behind one
//! handle: trigger editing, match-state snapshots, log queries, counters,
//! OBS status, and synthetic frame injection.  It holds only shared handles,
//! so cloning it is cheap and the presentation layer can keep one per view.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use cast_core::log::EventLogEntry;
use cast_core::state::MatchState;
use cast_core::{Athlete, DecodedEvent, EventKind};
use cast_obs::{ConnectionError, ObsClient, ObsStatusSnapshot};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::dispatch::{DispatchCounters, DropOldestQueue};
use crate::ingest::{IngestCounters, RawFrame};
use crate::pipeline::{CountersSnapshot, PipelineCounters, PipelineState};
use crate::triggers::{PersistenceError, TriggerPatch, TriggerRule, TriggerTable};

/// Errors surfaced by the command surface itself.
///
/// Trigger persistence and OBS errors pass through with their own types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("ingest queue is full")]
    IngestQueueFull,

    #[error("pipeline is not running")]
    PipelineStopped,
}

/// Shared handles behind the operator-facing API.
#[derive(Clone)]
pub struct CommandSurface {
    state: PipelineState,
    counters: Arc<PipelineCounters>,
    dispatch_counters: Arc<DispatchCounters>,
    dispatch_queue: Arc<DropOldestQueue<DecodedEvent>>,
    ingest_counters: Arc<IngestCounters>,
    triggers: Arc<Mutex<TriggerTable>>,
    obs: Arc<ObsClient>,
    frame_tx: mpsc::Sender<RawFrame>,
    program_connection: String,
    overlay_templates: Vec<String>,
}

impl CommandSurface {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: PipelineState,
        counters: Arc<PipelineCounters>,
        dispatch_counters: Arc<DispatchCounters>,
        dispatch_queue: Arc<DropOldestQueue<DecodedEvent>>,
        ingest_counters: Arc<IngestCounters>,
        triggers: Arc<Mutex<TriggerTable>>,
        obs: Arc<ObsClient>,
        frame_tx: mpsc::Sender<RawFrame>,
        program_connection: String,
        overlay_templates: Vec<String>,
    ) -> Self {
        Self {
            state,
            counters,
            dispatch_counters,
            dispatch_queue,
            ingest_counters,
            triggers,
            obs,
            frame_tx,
            program_connection,
            overlay_templates,
        }
    }

    // ── Enumerations ──────────────────────────────────────────────────────────

    /// Every event kind the decoder can produce.
    pub fn event_kinds(&self) -> &'static [EventKind] {
        &EventKind::ALL
    }

    /// Overlay templates offered in configuration.
    pub fn overlay_templates(&self) -> &[String] {
        &self.overlay_templates
    }

    /// Scene names known to the program connection, freshly queried.
    pub async fn list_scenes(&self) -> Result<Vec<String>, ConnectionError> {
        self.obs.list_scenes(&self.program_connection).await
    }

    // ── Trigger editing ───────────────────────────────────────────────────────

    /// All trigger rows for a scope, as stored.
    pub fn trigger_rows(&self, scope: &str) -> Vec<TriggerRule> {
        self.lock_triggers().load(scope)
    }

    /// Merges a partial edit into the `(scope, kind)` row.
    pub fn upsert_trigger(&self, scope: &str, kind: EventKind, patch: TriggerPatch) {
        self.lock_triggers().upsert(scope, kind, patch);
    }

    /// Persists a scope's rows; a failure leaves the edits and dirty flag.
    pub fn save_triggers(&self, scope: &str) -> Result<(), PersistenceError> {
        self.lock_triggers().save(scope)
    }

    /// Whether a scope has unsaved edits.
    pub fn triggers_dirty(&self, scope: &str) -> bool {
        self.lock_triggers().is_dirty(scope)
    }

    // ── Match state ───────────────────────────────────────────────────────────

    /// Current match state, copied out under a short lock.
    pub fn match_snapshot(&self) -> MatchState {
        match self.state.aggregator.lock() {
            Ok(guard) => guard.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    /// Arms the aggregator for a new match.
    pub fn load_match(&self, blue_name: &str, red_name: &str) {
        match self.state.aggregator.lock() {
            Ok(mut guard) => guard.load(blue_name, red_name),
            Err(poisoned) => poisoned.into_inner().load(blue_name, red_name),
        }
        info!(blue = blue_name, red = red_name, "match loaded");
    }

    /// Clears review mode after a challenge is resolved.
    pub fn resume(&self) {
        match self.state.aggregator.lock() {
            Ok(mut guard) => guard.resume(),
            Err(poisoned) => poisoned.into_inner().resume(),
        }
    }

    /// Discards all match state (scores, rounds, cards).
    pub fn reset_match(&self) {
        match self.state.aggregator.lock() {
            Ok(mut guard) => guard.reset(),
            Err(poisoned) => poisoned.into_inner().reset(),
        }
        info!("match state reset");
    }

    // ── Event log ─────────────────────────────────────────────────────────────

    /// Filtered view of the bounded event log, newest first.
    pub fn query_log(&self, athlete: Option<Athlete>, code: Option<&str>) -> Vec<EventLogEntry> {
        match self.state.event_log.lock() {
            Ok(guard) => guard.query(athlete, code),
            Err(poisoned) => poisoned.into_inner().query(athlete, code),
        }
    }

    // ── Observability ─────────────────────────────────────────────────────────

    /// Point-in-time pipeline and dispatch accounting.
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot(
            self.dispatch_counters.delivered.load(Ordering::Relaxed),
            self.dispatch_counters.failed.load(Ordering::Relaxed),
            self.ingest_counters.dropped_full.load(Ordering::Relaxed),
        )
    }

    /// Depth of the dispatcher queue right now.
    pub fn dispatch_backlog(&self) -> usize {
        self.dispatch_queue.len()
    }

    /// Merged production-system status across connections.
    pub fn obs_status(&self) -> ObsStatusSnapshot {
        self.obs.status_snapshot()
    }

    // ── Synthetic injection ───────────────────────────────────────────────────

    /// Feeds a raw frame into the live pipeline, exactly as if it had
    /// arrived from the scoring device.  Used to validate the full path
    /// without hardware.
    pub fn inject_frame(&self, raw: &str) -> Result<(), ApiError> {
        self.ingest_counters.received.fetch_add(1, Ordering::Relaxed);
        self.frame_tx
            .try_send(RawFrame {
                text: raw.trim().to_string(),
                arrival: SystemTime::now(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    self.ingest_counters
                        .dropped_full
                        .fetch_add(1, Ordering::Relaxed);
                    ApiError::IngestQueueFull
                }
                mpsc::error::TrySendError::Closed(_) => ApiError::PipelineStopped,
            })
    }

    fn lock_triggers(&self) -> std::sync::MutexGuard<'_, TriggerTable> {
        match self.triggers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::run_pipeline;
    use crate::triggers::TriggerType;
    use cast_core::log::EventLog;
    use cast_core::state::{AggregatorConfig, MatchAggregator};
    use std::time::Duration;
    use tokio::sync::watch;
    use uuid::Uuid;

    fn surface_with_queue(queue_depth: usize) -> (CommandSurface, mpsc::Receiver<RawFrame>) {
        let state = PipelineState {
            aggregator: Arc::new(Mutex::new(MatchAggregator::new(AggregatorConfig::default()))),
            event_log: Arc::new(Mutex::new(EventLog::new(100))),
        };
        let dir = std::env::temp_dir().join(format!("cornercast_api_{}", Uuid::new_v4()));
        let triggers = TriggerTable::open(&dir.join("triggers.toml")).expect("open");
        let (frame_tx, frame_rx) = mpsc::channel(queue_depth);

        let surface = CommandSurface::new(
            state,
            Arc::new(PipelineCounters::default()),
            Arc::new(DispatchCounters::default()),
            Arc::new(DropOldestQueue::new(16)),
            Arc::new(IngestCounters::default()),
            Arc::new(Mutex::new(triggers)),
            Arc::new(ObsClient::spawn(Vec::new())),
            frame_tx,
            "program".to_string(),
            vec!["point-banner".to_string()],
        );
        (surface, frame_rx)
    }

    #[tokio::test]
    async fn test_event_kinds_enumerates_all_six() {
        let (surface, _rx) = surface_with_queue(16);
        assert_eq!(surface.event_kinds().len(), 6);
        assert!(surface.event_kinds().contains(&EventKind::HitLevel));
    }

    #[tokio::test]
    async fn test_overlay_templates_come_from_config() {
        let (surface, _rx) = surface_with_queue(16);
        assert_eq!(surface.overlay_templates(), ["point-banner".to_string()]);
    }

    #[tokio::test]
    async fn test_trigger_edit_save_lifecycle() {
        // Arrange
        let (surface, _rx) = surface_with_queue(16);
        assert!(!surface.triggers_dirty("day1"));

        // Act
        surface.upsert_trigger(
            "day1",
            EventKind::Point,
            TriggerPatch {
                trigger_type: Some(TriggerType::Overlay),
                overlay_template: Some("point-banner".to_string()),
                ..TriggerPatch::default()
            },
        );

        // Assert
        assert!(surface.triggers_dirty("day1"));
        let rows = surface.trigger_rows("day1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trigger_type, TriggerType::Overlay);

        surface.save_triggers("day1").expect("save");
        assert!(!surface.triggers_dirty("day1"));
    }

    #[tokio::test]
    async fn test_match_lifecycle_via_surface() {
        let (surface, _rx) = surface_with_queue(16);

        surface.load_match("Blue Corner", "Red Corner");
        let snapshot = surface.match_snapshot();
        assert!(snapshot.loaded);
        assert_eq!(snapshot.blue.name, "Blue Corner");
        assert_eq!(snapshot.current_round, 1);

        surface.reset_match();
        assert!(!surface.match_snapshot().loaded);
    }

    #[tokio::test]
    async fn test_inject_frame_reaches_pipeline_end_to_end() {
        // Arrange — a real pipeline task consuming the injection channel
        let (surface, frame_rx) = surface_with_queue(16);
        let state = PipelineState {
            aggregator: Arc::clone(&surface.state.aggregator),
            event_log: Arc::clone(&surface.state.event_log),
        };
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = tokio::spawn(run_pipeline(
            frame_rx,
            state,
            Arc::clone(&surface.dispatch_queue),
            Arc::clone(&surface.counters),
            shutdown_rx,
        ));

        surface.load_match("Blue", "Red");

        // Act
        surface.inject_frame("point-blue;").expect("inject");

        // Assert — the synthetic frame lands in state and log
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if surface.match_snapshot().current_scores.blue == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event applied within 2s");
        assert_eq!(surface.query_log(None, None).len(), 1);

        drop(surface);
        pipeline.await.expect("pipeline join");
    }

    #[tokio::test]
    async fn test_inject_frame_reports_full_queue() {
        let (surface, _rx) = surface_with_queue(1);
        surface.inject_frame("point-blue;").expect("first fits");
        let err = surface.inject_frame("point-red;").unwrap_err();
        assert!(matches!(err, ApiError::IngestQueueFull));
        assert_eq!(surface.counters().ingest_dropped, 1);
    }

    #[tokio::test]
    async fn test_counters_snapshot_merges_all_sources() {
        let (surface, _rx) = surface_with_queue(16);
        surface
            .dispatch_counters
            .delivered
            .fetch_add(3, Ordering::Relaxed);
        surface
            .counters
            .decoded
            .fetch_add(5, Ordering::Relaxed);

        let snapshot = surface.counters();
        assert_eq!(snapshot.dispatch_delivered, 3);
        assert_eq!(snapshot.decoded, 5);
        assert_eq!(snapshot.dispatch_failed, 0);
    }

    #[tokio::test]
    async fn test_obs_status_answers_without_connections() {
        let (surface, _rx) = surface_with_queue(16);
        let status = surface.obs_status();
        assert!(!status.is_recording);
        assert!(status.connections.is_empty());
    }
}
