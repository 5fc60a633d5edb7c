//! cast-server: the CornerCast application crate.
//!
//! Wires the ingest listener, the decode/apply pipeline, the trigger table,
//! the action dispatcher, and the OBS control-plane client into one running
//! service, and exposes the in-process [`api::CommandSurface`] for the
//! presentation layer.
//!
//! ```text
//! UDP datagram ──► ingest (thread) ──► pipeline (task) ──┬─► aggregator
//!                                                        ├─► event log
//!                                                        └─► dispatch queue
//!                                                               │
//!                                          triggers ──► dispatcher (task)
//!                                                               │
//!                                                        cast_obs::ObsClient
//! ```

pub mod api;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod pipeline;
pub mod triggers;
