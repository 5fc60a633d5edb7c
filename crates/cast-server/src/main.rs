//! CornerCast server entry point.
//!
//! Wires together all services and starts the Tokio async runtime.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()
//!  └─ start services
//!       ├─ ingest listener   (UDP background thread)
//!       ├─ pipeline          (Tokio task, single writer)
//!       ├─ dispatcher        (Tokio task)
//!       └─ ObsClient         (one Tokio task per connection)
//! ```
//!
//! Shutdown order on Ctrl-C: stop the listener, stop the pipeline and
//! dispatcher, flush dirty trigger rows, close the OBS connections.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cast_core::log::EventLog;
use cast_core::state::{AggregatorConfig, MatchAggregator};
use cast_obs::ObsClient;
use cast_server::api::CommandSurface;
use cast_server::config::{load_config, AppConfig};
use cast_server::dispatch::{
    run_dispatcher, DispatchCounters, DispatcherSettings, DropOldestQueue, ProductionClient,
};
use cast_server::ingest::{start_listener, IngestCounters};
use cast_server::pipeline::{run_pipeline, PipelineCounters, PipelineState};
use cast_server::triggers::TriggerTable;

#[derive(Debug, Parser)]
#[command(name = "cast-server", about = "CornerCast broadcast automation server")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CORNERCAST_CONFIG", default_value = "cornercast.toml")]
    config: PathBuf,

    /// Trigger scope to serve (tournament day, mat, ...).
    #[arg(short, long, env = "CORNERCAST_SCOPE", default_value = "default")]
    scope: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    // Initialise structured logging.  `RUST_LOG` overrides the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    info!("CornerCast server starting (scope: {})", args.scope);
    run(config, args.scope).await
}

async fn run(config: AppConfig, scope: String) -> anyhow::Result<()> {
    // ── Shared state ──────────────────────────────────────────────────────────
    let state = PipelineState {
        aggregator: Arc::new(Mutex::new(MatchAggregator::new(AggregatorConfig {
            warning_threshold: config.pipeline.warning_threshold,
            point_values: config.pipeline.point_values.clone(),
        }))),
        event_log: Arc::new(Mutex::new(EventLog::new(config.pipeline.log_capacity))),
    };
    let triggers = Arc::new(Mutex::new(
        TriggerTable::open(&config.triggers.store_path)
            .with_context(|| {
                format!(
                    "opening trigger store at {}",
                    config.triggers.store_path.display()
                )
            })?,
    ));
    let pipeline_counters = Arc::new(PipelineCounters::default());
    let dispatch_counters = Arc::new(DispatchCounters::default());
    let ingest_counters = Arc::new(IngestCounters::default());
    let dispatch_queue = Arc::new(DropOldestQueue::new(config.pipeline.dispatch_queue));

    // ── OBS control plane ─────────────────────────────────────────────────────
    if config.obs.connections.is_empty() {
        warn!("no OBS connections configured; triggers will have nothing to drive");
    }
    let obs = Arc::new(ObsClient::spawn(config.obs.connections.clone()));

    // ── Ingest listener ───────────────────────────────────────────────────────
    let listener_running = Arc::new(AtomicBool::new(true));
    let (frame_tx, frame_rx) = mpsc::channel(config.pipeline.ingest_queue.max(1));
    start_listener(
        &config.listener.bind_address,
        config.listener.port,
        frame_tx.clone(),
        Arc::clone(&listener_running),
        Arc::clone(&ingest_counters),
    )
    .context("starting UDP ingest listener")?;

    // ── Pipeline and dispatcher tasks ─────────────────────────────────────────
    let (shutdown_tx, _) = watch::channel(false);

    let pipeline_task = tokio::spawn(run_pipeline(
        frame_rx,
        state.clone(),
        Arc::clone(&dispatch_queue),
        Arc::clone(&pipeline_counters),
        shutdown_tx.subscribe(),
    ));

    let dispatcher_task = tokio::spawn(run_dispatcher(
        Arc::clone(&dispatch_queue),
        Arc::clone(&triggers),
        Arc::clone(&obs) as Arc<dyn ProductionClient>,
        DispatcherSettings {
            program_connection: config.dispatch.program_connection.clone(),
            fail_fast: config.dispatch.fail_fast,
            active_scope: scope.clone(),
        },
        Arc::clone(&dispatch_counters),
        shutdown_tx.subscribe(),
    ));

    // ── Command surface ───────────────────────────────────────────────────────
    // Held here for the embedding presentation layer; the headless binary
    // keeps it alive so injected frames and trigger edits work over it.
    let surface = CommandSurface::new(
        state,
        Arc::clone(&pipeline_counters),
        Arc::clone(&dispatch_counters),
        Arc::clone(&dispatch_queue),
        Arc::clone(&ingest_counters),
        Arc::clone(&triggers),
        Arc::clone(&obs),
        frame_tx,
        config.dispatch.program_connection.clone(),
        config.dispatch.overlay_templates.clone(),
    );

    info!("CornerCast server ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    // ── Ordered shutdown ──────────────────────────────────────────────────────
    // 1. Stop the listener so no new datagrams enter.
    listener_running.store(false, Ordering::Relaxed);

    // 2. Stop the pipeline and dispatcher.
    drop(surface); // releases the injection sender
    if shutdown_tx.send(true).is_err() {
        warn!("pipeline tasks already stopped");
    }
    if let Err(e) = pipeline_task.await {
        error!("pipeline task join failed: {e}");
    }
    if let Err(e) = dispatcher_task.await {
        error!("dispatcher task join failed: {e}");
    }

    // 3. Flush unsaved trigger edits so no configuration is lost.
    {
        let mut table = match triggers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if table.has_unsaved_edits() {
            table
                .save_all()
                .context("flushing trigger table on shutdown")?;
        }
    }

    // 4. Close the production-system connections last.
    match Arc::try_unwrap(obs) {
        Ok(client) => client.shutdown().await,
        Err(_) => warn!("OBS client still shared at shutdown; connections close on drop"),
    }

    info!("CornerCast server stopped");
    Ok(())
}
