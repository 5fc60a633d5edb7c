//! One managed OBS connection: socket lifecycle, handshake, command queue.
//!
//! Each connection runs as a single tokio task (`run_connection`) that owns
//! the WebSocket end to end.  The task cycles through the lifecycle driven by
//! [`ConnectionStateMachine`]: connect, handshake, serve commands, and on any
//! socket failure tear down and retry after the capped backoff.
//!
//! Commands arrive on a bounded mpsc queue and are executed strictly in
//! order, one in flight at a time.  A command that times out or is rejected
//! by the server is reported as a dispatch failure but does NOT tear down the
//! session; only socket-level errors trigger a reconnect.
//!
//! Health (status plus the latest polled recording/streaming/cpu figures) is
//! published on a `watch` channel so readers never block the session.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    HandshakeStep, ObsRequest, ProtocolCodec, ProtocolVersion, ResponsePayload,
};
use crate::state_machine::{ConnectionStateMachine, ConnectionStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the full handshake may take before the attempt is abandoned.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by the connection layer.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("command timed out")]
    CommandTimeout,

    #[error("request rejected: {0}")]
    RequestRejected(String),

    #[error("socket closed: {0}")]
    SocketClosed(String),

    #[error("connection is not established")]
    NotConnected,

    #[error("no connection named '{0}'")]
    UnknownConnection(String),

    #[error("command queue for '{0}' is full")]
    QueueFull(String),
}

/// A request queued for a connection, with an optional reply slot.
///
/// Fire-and-forget callers (the dispatcher) leave `respond_to` empty; the
/// command surface attaches a oneshot to read the result.
#[derive(Debug)]
pub struct QueuedCommand {
    pub request: ObsRequest,
    pub respond_to: Option<oneshot::Sender<Result<ResponsePayload, ConnectionError>>>,
}

/// Latest known health of one connection, published over `watch`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub recording: Option<bool>,
    pub streaming: Option<bool>,
    pub cpu_usage: Option<f64>,
}

/// Everything `run_connection` needs, resolved from the connection config.
pub(crate) struct ConnectionParams {
    pub name: String,
    pub url: String,
    pub password: String,
    pub version: ProtocolVersion,
    pub poll_interval: Duration,
    pub command_timeout: Duration,
}

// ── Session task ──────────────────────────────────────────────────────────────

/// Drives one connection for its whole life.
///
/// Returns only when `shutdown_rx` fires (or every command sender is gone).
/// All failures are absorbed into the reconnect loop.
pub(crate) async fn run_connection(
    params: ConnectionParams,
    mut cmd_rx: mpsc::Receiver<QueuedCommand>,
    health_tx: watch::Sender<ConnectionHealth>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut machine = ConnectionStateMachine::default();

    loop {
        machine.on_connect_started();
        publish(&health_tx, &machine);

        // Fresh codec per attempt: handshake phase state must not leak
        // across reconnects.
        let mut codec = params.version.codec();

        let establish_result =
            establish(&params, codec.as_mut(), &mut machine, &health_tx).await;
        let backoff = match establish_result {
            Ok(mut ws) => {
                machine.on_authenticated();
                publish(&health_tx, &machine);
                info!(connection = %params.name, url = %params.url, "connected and authenticated");

                let end = serve(
                    &mut ws,
                    &params,
                    codec.as_ref(),
                    &mut cmd_rx,
                    &health_tx,
                    &mut shutdown_rx,
                )
                .await;
                // Best-effort close; the peer may already be gone.
                let _ = ws.close(None).await;

                match end {
                    SessionEnd::Shutdown => {
                        publish_status(&health_tx, ConnectionStatus::Disconnected, None);
                        return;
                    }
                    SessionEnd::SocketError(e) => {
                        warn!(connection = %params.name, error = %e, "session ended");
                        machine.on_failure(Instant::now(), e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(connection = %params.name, error = %e, "connection attempt failed");
                machine.on_failure(Instant::now(), e.to_string())
            }
        };

        publish(&health_tx, &machine);
        debug!(
            connection = %params.name,
            delay_ms = backoff.as_millis() as u64,
            "reconnecting after backoff"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    publish_status(&health_tx, ConnectionStatus::Disconnected, None);
                    return;
                }
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    SocketError(ConnectionError),
}

/// Opens the socket and completes the protocol handshake.
async fn establish(
    params: &ConnectionParams,
    codec: &mut dyn ProtocolCodec,
    machine: &mut ConnectionStateMachine,
    health_tx: &watch::Sender<ConnectionHealth>,
) -> Result<WsStream, ConnectionError> {
    let (mut ws, _) = connect_async(&params.url)
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    machine.on_socket_open();
    publish(health_tx, machine);

    let handshake = async {
        if let Some(first) = codec.on_open_request() {
            ws.send(Message::Text(first))
                .await
                .map_err(|e| ConnectionError::SocketClosed(e.to_string()))?;
        }
        loop {
            let frame = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    // v5 rejects bad credentials by closing the socket.
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed during handshake".to_string());
                    return Err(ConnectionError::AuthFailed(reason));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectionError::SocketClosed(e.to_string())),
                None => {
                    return Err(ConnectionError::SocketClosed(
                        "closed during handshake".to_string(),
                    ))
                }
            };
            match codec.handle_handshake(&frame, &params.password) {
                HandshakeStep::Reply(reply) => {
                    ws.send(Message::Text(reply))
                        .await
                        .map_err(|e| ConnectionError::SocketClosed(e.to_string()))?;
                }
                HandshakeStep::Pending => {}
                HandshakeStep::Authenticated => return Ok(()),
                HandshakeStep::Failed(reason) => {
                    return Err(ConnectionError::AuthFailed(reason))
                }
            }
        }
    };

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
        Ok(Ok(())) => Ok(ws),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ConnectionError::HandshakeTimeout),
    }
}

/// Serves commands and status polls until shutdown or a socket error.
async fn serve(
    ws: &mut WsStream,
    params: &ConnectionParams,
    codec: &dyn ProtocolCodec,
    cmd_rx: &mut mpsc::Receiver<QueuedCommand>,
    health_tx: &watch::Sender<ConnectionHealth>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let mut poll = tokio::time::interval(params.poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return SessionEnd::Shutdown;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // All senders dropped; the client is gone.
                    return SessionEnd::Shutdown;
                };
                let result = execute_request(ws, codec, &cmd.request, params.command_timeout).await;
                if let Err(e) = &result {
                    warn!(connection = %params.name, request = ?cmd.request, error = %e, "command failed");
                }
                let fatal = matches!(&result, Err(ConnectionError::SocketClosed(_)));
                let socket_error = result.as_ref().err().cloned();
                if let Some(respond_to) = cmd.respond_to {
                    let _ = respond_to.send(result);
                }
                if fatal {
                    if let Some(e) = socket_error {
                        return SessionEnd::SocketError(e);
                    }
                }
            }

            _ = poll.tick() => {
                if let Err(e) = poll_status(ws, params, codec, health_tx).await {
                    if matches!(e, ConnectionError::SocketClosed(_)) {
                        return SessionEnd::SocketError(e);
                    }
                    // A slow poll is not fatal; skip this cycle.
                    debug!(connection = %params.name, error = %e, "status poll skipped");
                }
            }
        }
    }
}

/// Runs the periodic status poll and merges the answers into the health watch.
///
/// On v4 both status requests answer from the same `GetStreamingStatus`
/// frame, so each answer may fill more than one field; `or` keeps the first
/// value seen.
async fn poll_status(
    ws: &mut WsStream,
    params: &ConnectionParams,
    codec: &dyn ProtocolCodec,
    health_tx: &watch::Sender<ConnectionHealth>,
) -> Result<(), ConnectionError> {
    let mut recording = None;
    let mut streaming = None;
    let mut cpu_usage = None;

    for request in [
        ObsRequest::GetRecordingStatus,
        ObsRequest::GetStreamingStatus,
        ObsRequest::GetStats,
    ] {
        match execute_request(ws, codec, &request, params.command_timeout).await {
            Ok(ResponsePayload::Status {
                recording: r,
                streaming: s,
                cpu_usage: c,
            }) => {
                recording = recording.or(r);
                streaming = streaming.or(s);
                cpu_usage = cpu_usage.or(c);
            }
            Ok(_) => {}
            Err(e @ ConnectionError::SocketClosed(_)) => return Err(e),
            Err(_) => {} // one poll request failed; keep the rest
        }
    }

    health_tx.send_modify(|h| {
        h.status = ConnectionStatus::Connected;
        h.recording = recording;
        h.streaming = streaming;
        h.cpu_usage = cpu_usage;
    });
    Ok(())
}

/// Sends one request and waits for its correlated response.
///
/// Frames that are not the awaited response (server events, stale answers to
/// timed-out requests) are skipped.  One request is in flight at a time, so
/// skipping is safe: nothing else is waiting on those frames.
async fn execute_request(
    ws: &mut WsStream,
    codec: &dyn ProtocolCodec,
    request: &ObsRequest,
    timeout: Duration,
) -> Result<ResponsePayload, ConnectionError> {
    let id = Uuid::new_v4().to_string();
    let frame = codec.encode_request(&id, request);
    ws.send(Message::Text(frame))
        .await
        .map_err(|e| ConnectionError::SocketClosed(e.to_string()))?;

    let await_response = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(resp) = codec.parse_response(&text, request) {
                        if resp.id == id {
                            return resp.result.map_err(ConnectionError::RequestRejected);
                        }
                        debug!(stale_id = %resp.id, "discarding stale response");
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ConnectionError::SocketClosed(
                        "closed mid-request".to_string(),
                    ))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ConnectionError::SocketClosed(e.to_string())),
            }
        }
    };

    match tokio::time::timeout(timeout, await_response).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::CommandTimeout),
    }
}

fn publish(health_tx: &watch::Sender<ConnectionHealth>, machine: &ConnectionStateMachine) {
    publish_status(
        health_tx,
        machine.status(),
        machine.last_error().map(str::to_string),
    );
}

fn publish_status(
    health_tx: &watch::Sender<ConnectionHealth>,
    status: ConnectionStatus,
    last_error: Option<String>,
) {
    health_tx.send_modify(|h| {
        h.status = status;
        h.last_error = last_error;
        if status != ConnectionStatus::Connected {
            h.recording = None;
            h.streaming = None;
            h.cpu_usage = None;
        }
    });
}
