//! Multi-connection OBS client facade.
//!
//! [`ObsClient`] owns one spawned session task per configured connection and
//! exposes a name-addressed command API over them.  Submitting a command
//! never waits on the network: it enqueues onto the target connection's
//! bounded queue and returns immediately (or with [`ConnectionError::QueueFull`]).
//! `request` additionally awaits the oneshot reply for callers that need the
//! response body.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::{
    run_connection, ConnectionError, ConnectionHealth, ConnectionParams, QueuedCommand,
};
use crate::protocol::{ObsRequest, ProtocolVersion, ResponsePayload};
use crate::state_machine::ConnectionStatus;

/// Commands waiting per connection before submission is refused.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Static description of one OBS connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsConnectionConfig {
    /// Unique name, used to address commands ("program", "replay", ...).
    pub name: String,
    pub host: String,
    /// Defaults to the protocol version's conventional port when absent.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password: String,
    pub version: ProtocolVersion,
    /// Seconds between status polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds a single command may wait for its response.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_command_timeout_secs() -> u64 {
    5
}

impl ObsConnectionConfig {
    /// WebSocket URL for this connection.
    pub fn url(&self) -> String {
        let port = self.port.unwrap_or_else(|| self.version.default_port());
        format!("ws://{}:{}", self.host, port)
    }
}

/// Point-in-time view of one connection, as reported by [`ObsClient::status_snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub name: String,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub recording: Option<bool>,
    pub streaming: Option<bool>,
    pub cpu_usage: Option<f64>,
}

/// Merged status across every managed connection.
#[derive(Debug, Clone, Serialize)]
pub struct ObsStatusSnapshot {
    /// True when any connection reports an active recording.
    pub is_recording: bool,
    /// True when any connection reports an active stream.
    pub is_streaming: bool,
    /// Highest CPU usage reported across connections, if any answered.
    pub cpu_usage: Option<f64>,
    /// Name of a connection currently recording, if any.
    pub recording_connection: Option<String>,
    /// Name of a connection currently streaming, if any.
    pub streaming_connection: Option<String>,
    pub connections: Vec<ConnectionReport>,
}

struct ConnectionHandle {
    cmd_tx: mpsc::Sender<QueuedCommand>,
    health_rx: watch::Receiver<ConnectionHealth>,
    task: JoinHandle<()>,
}

/// Owns every configured connection task.
pub struct ObsClient {
    connections: HashMap<String, ConnectionHandle>,
    shutdown_tx: watch::Sender<bool>,
}

impl ObsClient {
    /// Spawns one session task per config entry.  Connections begin dialing
    /// immediately; callers may submit commands right away and they will be
    /// served once the handshake completes.
    pub fn spawn(configs: Vec<ObsConnectionConfig>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut client = Self {
            connections: HashMap::with_capacity(configs.len()),
            shutdown_tx,
        };
        for config in configs {
            client.add_connection(config);
        }
        client
    }

    /// Starts one more named connection; replaces an existing one with the
    /// same name (the old session stops once its queue senders are gone).
    pub fn add_connection(&mut self, config: ObsConnectionConfig) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (health_tx, health_rx) = watch::channel(ConnectionHealth::default());
        let params = ConnectionParams {
            name: config.name.clone(),
            url: config.url(),
            password: config.password.clone(),
            version: config.version,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            command_timeout: Duration::from_secs(config.command_timeout_secs.max(1)),
        };
        info!(connection = %config.name, url = %params.url, version = ?config.version, "starting connection");
        let task = tokio::spawn(run_connection(
            params,
            cmd_rx,
            health_tx,
            self.shutdown_tx.subscribe(),
        ));
        self.connections.insert(
            config.name,
            ConnectionHandle {
                cmd_tx,
                health_rx,
                task,
            },
        );
    }

    /// Configured connection names.
    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Enqueues a fire-and-forget command.  Returns without waiting for the
    /// network; a full queue or unknown name is reported synchronously.
    pub fn submit(&self, connection: &str, request: ObsRequest) -> Result<(), ConnectionError> {
        let handle = self
            .connections
            .get(connection)
            .ok_or_else(|| ConnectionError::UnknownConnection(connection.to_string()))?;
        handle
            .cmd_tx
            .try_send(QueuedCommand {
                request,
                respond_to: None,
            })
            .map_err(|_| ConnectionError::QueueFull(connection.to_string()))
    }

    /// Enqueues a command and awaits its response payload.
    pub async fn request(
        &self,
        connection: &str,
        request: ObsRequest,
    ) -> Result<ResponsePayload, ConnectionError> {
        let handle = self
            .connections
            .get(connection)
            .ok_or_else(|| ConnectionError::UnknownConnection(connection.to_string()))?;
        let (tx, rx) = oneshot::channel();
        handle
            .cmd_tx
            .try_send(QueuedCommand {
                request,
                respond_to: Some(tx),
            })
            .map_err(|_| ConnectionError::QueueFull(connection.to_string()))?;
        rx.await.map_err(|_| ConnectionError::NotConnected)?
    }

    // ── Convenience commands ──────────────────────────────────────────────────

    /// Switches the program scene on the named connection.
    pub async fn switch_scene(
        &self,
        connection: &str,
        scene: &str,
    ) -> Result<(), ConnectionError> {
        self.request(
            connection,
            ObsRequest::SwitchScene {
                scene: scene.to_string(),
            },
        )
        .await
        .map(|_| ())
    }

    /// Broadcasts an overlay template activation on the named connection.
    pub async fn activate_overlay(
        &self,
        connection: &str,
        template: &str,
    ) -> Result<(), ConnectionError> {
        self.request(
            connection,
            ObsRequest::ActivateOverlay {
                template: template.to_string(),
            },
        )
        .await
        .map(|_| ())
    }

    pub async fn start_recording(&self, connection: &str) -> Result<(), ConnectionError> {
        self.request(connection, ObsRequest::StartRecording)
            .await
            .map(|_| ())
    }

    pub async fn stop_recording(&self, connection: &str) -> Result<(), ConnectionError> {
        self.request(connection, ObsRequest::StopRecording)
            .await
            .map(|_| ())
    }

    /// Scene names known to the named connection.
    pub async fn list_scenes(&self, connection: &str) -> Result<Vec<String>, ConnectionError> {
        match self.request(connection, ObsRequest::GetSceneList).await? {
            ResponsePayload::Scenes(scenes) => Ok(scenes),
            _ => Ok(Vec::new()),
        }
    }

    /// Merges the latest health of every connection without blocking.
    pub fn status_snapshot(&self) -> ObsStatusSnapshot {
        let mut connections = Vec::with_capacity(self.connections.len());
        let mut recording_connection = None;
        let mut streaming_connection = None;
        let mut cpu_usage: Option<f64> = None;

        for (name, handle) in &self.connections {
            let health = handle.health_rx.borrow().clone();
            if health.recording == Some(true) && recording_connection.is_none() {
                recording_connection = Some(name.clone());
            }
            if health.streaming == Some(true) && streaming_connection.is_none() {
                streaming_connection = Some(name.clone());
            }
            if let Some(cpu) = health.cpu_usage {
                cpu_usage = Some(cpu_usage.map_or(cpu, |c: f64| c.max(cpu)));
            }
            connections.push(ConnectionReport {
                name: name.clone(),
                status: health.status,
                last_error: health.last_error,
                recording: health.recording,
                streaming: health.streaming,
                cpu_usage: health.cpu_usage,
            });
        }
        connections.sort_by(|a, b| a.name.cmp(&b.name));

        ObsStatusSnapshot {
            is_recording: recording_connection.is_some(),
            is_streaming: streaming_connection.is_some(),
            cpu_usage,
            recording_connection,
            streaming_connection,
            connections,
        }
    }

    /// Signals every session task to stop and waits for them to finish.
    ///
    /// Commands still queued when shutdown fires are dropped; the sessions
    /// close their sockets cleanly before exiting.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(true).is_err() {
            // No live sessions; nothing to wait for.
            return;
        }
        for (name, handle) in self.connections {
            if let Err(e) = handle.task.await {
                warn!(connection = %name, error = %e, "session task join failed");
            }
        }
        info!("all connections closed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
