//! UDP ingest of scoring-device datagrams.
//!
//! The scoring device sends one semicolon-delimited frame per UDP datagram.
//! The listener runs as a blocking loop on a dedicated thread so synchronous
//! socket I/O never touches the Tokio runtime.
//!
//! # Read timeout
//!
//! The socket is configured with a 500 ms read timeout.  `recv_from` blocks
//! for at most that long before returning a timeout error; on each timeout
//! the loop checks the `running` flag and exits cleanly when the application
//! is shutting down.
//!
//! # Overflow policy
//!
//! Frames are forwarded into a bounded channel with a non-blocking
//! `try_send`.  A full channel means the decode stage is behind; the datagram
//! is dropped and a counter bumped.  The listener itself never blocks, so a
//! stalled consumer cannot back-pressure the socket into the OS dropping
//! packets silently instead of us dropping them accountably.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Error type for listener startup.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The UDP socket could not be bound.
    #[error("failed to bind ingest socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The listener bind address could not be parsed.
    #[error("invalid listener address '{0}'")]
    InvalidAddress(String),
}

/// One raw frame as received off the wire, stamped on arrival.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub text: String,
    pub arrival: SystemTime,
}

/// Datagrams dropped because the ingest channel was full.
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub received: AtomicU64,
    pub dropped_full: AtomicU64,
}

/// Binds the UDP socket and spawns the listener thread.
///
/// The caller owns the channel: the receive end feeds the pipeline, and
/// extra senders may inject synthetic frames alongside the listener.  The
/// thread exits when `running` is cleared or the receiver is dropped.
pub fn start_listener(
    bind_address: &str,
    port: u16,
    tx: mpsc::Sender<RawFrame>,
    running: Arc<AtomicBool>,
    counters: Arc<IngestCounters>,
) -> Result<(), IngestError> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|_| IngestError::InvalidAddress(format!("{bind_address}:{port}")))?;
    let socket =
        UdpSocket::bind(addr).map_err(|source| IngestError::BindFailed { addr, source })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .ok();

    std::thread::Builder::new()
        .name("cast-ingest".to_string())
        .spawn(move || {
            listener_loop(socket, tx, running, counters);
        })
        .map_err(|source| IngestError::BindFailed { addr, source })?;

    info!("ingest listener on UDP {addr}");
    Ok(())
}

/// The receive loop executed on the listener thread.
fn listener_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<RawFrame>,
    running: Arc<AtomicBool>,
    counters: Arc<IngestCounters>,
) {
    let mut buf = vec![0u8; 2048];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("ingest recv error: {e}");
                continue;
            }
        };

        let arrival = SystemTime::now();
        counters.received.fetch_add(1, Ordering::Relaxed);

        // Non-UTF-8 datagrams cannot be frames; note and move on.
        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(s) => s.trim().to_string(),
            Err(_) => {
                debug!("non-UTF-8 datagram from {src} ({len} bytes)");
                continue;
            }
        };

        match tx.try_send(RawFrame { text, arrival }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = counters.dropped_full.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("ingest queue full; dropped datagram from {src} (total dropped: {dropped})");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver dropped – application is shutting down.
                break;
            }
        }
    }

    info!("ingest listener stopped");
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_timeout_error_recognises_timed_out_and_would_block() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let would_block = std::io::Error::new(std::io::ErrorKind::WouldBlock, "would block");
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");

        assert!(is_timeout_error(&timed_out));
        assert!(is_timeout_error(&would_block));
        assert!(!is_timeout_error(&refused));
    }

    #[test]
    fn test_invalid_bind_address_is_reported() {
        let running = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(IngestCounters::default());
        let (tx, _rx) = mpsc::channel(16);
        let result = start_listener("not-an-ip", 6000, tx, running, counters);
        assert!(matches!(result, Err(IngestError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_listener_binds_and_forwards_a_datagram() {
        // Arrange: bind port 0 probe to find a free port
        let probe = UdpSocket::bind("127.0.0.1:0").expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(IngestCounters::default());
        let (tx, mut rx) = mpsc::channel(16);
        start_listener(
            "127.0.0.1",
            port,
            tx,
            Arc::clone(&running),
            Arc::clone(&counters),
        )
        .expect("listener must bind");

        // Act: send one frame at the listener
        let sender = UdpSocket::bind("127.0.0.1:0").expect("sender bind");
        sender
            .send_to(b"point-blue;", ("127.0.0.1", port))
            .expect("send");

        // Assert: the frame arrives on the channel
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within 2s")
            .expect("channel open");
        assert_eq!(frame.text, "point-blue;");
        assert_eq!(counters.received.load(Ordering::Relaxed), 1);

        // Cleanup: stop the thread
        running.store(false, Ordering::Relaxed);
    }

    #[tokio::test]
    async fn test_listener_stops_when_running_cleared() {
        let probe = UdpSocket::bind("127.0.0.1:0").expect("probe bind");
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let running = Arc::new(AtomicBool::new(false)); // stopped immediately
        let counters = Arc::new(IngestCounters::default());
        let (tx, _rx) = mpsc::channel(16);
        let result = start_listener("127.0.0.1", port, tx, running, counters);
        assert!(result.is_ok(), "listener must bind even when already stopped");
    }
}
