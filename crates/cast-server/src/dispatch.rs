//! Action dispatch: decoded events to production-system commands.
//!
//! The dispatcher is decoupled from ingestion by [`DropOldestQueue`]: the
//! pipeline pushes decoded events without ever blocking, and when the
//! dispatcher falls behind the OLDEST queued event is evicted (the newest
//! action is the one worth taking on a live broadcast) and a counter bumped.
//!
//! Production calls go through the [`ProductionClient`] trait so tests can
//! substitute a recording double for the real OBS client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cast_core::DecodedEvent;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::triggers::{TriggerRule, TriggerTable, TriggerType};

// ── Drop-oldest queue ─────────────────────────────────────────────────────────

/// Bounded MPSC queue that evicts the oldest entry on overflow.
///
/// `push` is synchronous and never blocks; `pop` awaits until an entry is
/// available.  Tokio's stock channels block or reject the NEWEST item when
/// full, which is the wrong policy here.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    evicted: AtomicU64,
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            notify: Notify::new(),
            evicted: AtomicU64::new(0),
        }
    }

    /// Enqueues `item`, evicting the oldest entry when full.
    ///
    /// Returns `true` when an eviction happened.
    pub fn push(&self, item: T) -> bool {
        let evicted = {
            let mut queue = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(item);
            evicted
        };
        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Awaits the next entry.
    pub async fn pop(&self) -> T {
        loop {
            {
                let mut queue = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries evicted since creation.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

// ── Production client seam ────────────────────────────────────────────────────

/// The subset of production-system operations the dispatcher needs.
#[async_trait]
pub trait ProductionClient: Send + Sync {
    async fn switch_scene(&self, connection: &str, scene: &str) -> Result<(), String>;
    async fn activate_overlay(&self, connection: &str, template: &str) -> Result<(), String>;
}

#[async_trait]
impl ProductionClient for cast_obs::ObsClient {
    async fn switch_scene(&self, connection: &str, scene: &str) -> Result<(), String> {
        cast_obs::ObsClient::switch_scene(self, connection, scene)
            .await
            .map_err(|e| e.to_string())
    }

    async fn activate_overlay(&self, connection: &str, template: &str) -> Result<(), String> {
        cast_obs::ObsClient::activate_overlay(self, connection, template)
            .await
            .map_err(|e| e.to_string())
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Delivered/failed accounting, shared with the counters snapshot.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
}

/// Static dispatcher behaviour, taken from configuration.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Connection that receives scene switches and overlay broadcasts.
    pub program_connection: String,
    /// When set, a failed scene switch on a `both` rule skips the overlay.
    pub fail_fast: bool,
    /// Scope whose trigger rows are consulted.
    pub active_scope: String,
}

/// Consumes decoded events and fires configured production actions.
///
/// Runs until `shutdown_rx` fires.  Rule lookup misses are a normal outcome
/// and produce no log noise.
pub async fn run_dispatcher(
    queue: Arc<DropOldestQueue<DecodedEvent>>,
    triggers: Arc<Mutex<TriggerTable>>,
    client: Arc<dyn ProductionClient>,
    settings: DispatcherSettings,
    counters: Arc<DispatchCounters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = queue.pop() => event,
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("dispatcher stopped");
                    return;
                }
                continue;
            }
        };

        let rules = {
            let table = match triggers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            table.rules_for(&settings.active_scope, event.kind)
        };
        if rules.is_empty() {
            // No action configured for this kind; not an error.
            continue;
        }

        for rule in rules {
            fire_rule(&*client, &settings, &event, &rule, &counters).await;
        }
    }
}

/// Executes one rule against the production client.
async fn fire_rule(
    client: &dyn ProductionClient,
    settings: &DispatcherSettings,
    event: &DecodedEvent,
    rule: &TriggerRule,
    counters: &DispatchCounters,
) {
    let connection = settings.program_connection.as_str();

    let scene_result = match (rule.trigger_type, rule.scene.as_deref()) {
        (TriggerType::Scene | TriggerType::Both, Some(scene)) => {
            let result = client.switch_scene(connection, scene).await;
            record(counters, &result);
            match &result {
                Ok(()) => debug!(kind = %event.kind, scene, "scene switched"),
                Err(e) => warn!(kind = %event.kind, scene, error = %e, "scene switch failed"),
            }
            Some(result)
        }
        (TriggerType::Scene | TriggerType::Both, None) => {
            warn!(kind = %event.kind, "scene rule has no scene configured");
            None
        }
        (TriggerType::Overlay, _) => None,
    };

    let wants_overlay = matches!(rule.trigger_type, TriggerType::Overlay | TriggerType::Both);
    if !wants_overlay {
        return;
    }

    // On `both` rules a failed scene switch only suppresses the overlay
    // under fail-fast; otherwise the overlay is still attempted.
    if settings.fail_fast && matches!(scene_result, Some(Err(_))) {
        info!(kind = %event.kind, "fail-fast: overlay skipped after scene failure");
        return;
    }

    match rule.overlay_template.as_deref() {
        Some(template) => {
            let result = client.activate_overlay(connection, template).await;
            record(counters, &result);
            match result {
                Ok(()) => debug!(kind = %event.kind, template, "overlay activated"),
                Err(e) => warn!(kind = %event.kind, template, error = %e, "overlay failed"),
            }
        }
        None => warn!(kind = %event.kind, "overlay rule has no template configured"),
    }
}

fn record(counters: &DispatchCounters, result: &Result<(), String>) {
    match result {
        Ok(()) => counters.delivered.fetch_add(1, Ordering::Relaxed),
        Err(_) => counters.failed.fetch_add(1, Ordering::Relaxed),
    };
}

// ── Tests ─────────────────────────────────────────────────────────────────────
