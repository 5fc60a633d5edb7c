//! Version-independent protocol surface.
//!
//! The rest of the system speaks [`ObsRequest`] / [`ResponsePayload`]; the
//! two wire dialects are encapsulated behind [`ProtocolCodec`], chosen once
//! per connection from its configured [`ProtocolVersion`].

use serde::{Deserialize, Serialize};

pub mod v4;
pub mod v5;

pub use v4::V4Codec;
pub use v5::V5Codec;

// ── Version selection ─────────────────────────────────────────────────────────

/// The obs-websocket major protocol version a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V4,
    V5,
}

impl ProtocolVersion {
    /// Default server port when the connection config omits one.
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolVersion::V4 => 4444,
            ProtocolVersion::V5 => 4455,
        }
    }

    /// Builds the codec for this version.
    pub fn codec(self) -> Box<dyn ProtocolCodec> {
        match self {
            ProtocolVersion::V4 => Box::new(V4Codec::new()),
            ProtocolVersion::V5 => Box::new(V5Codec::new()),
        }
    }
}

// ── Requests and responses ────────────────────────────────────────────────────

/// Version-neutral request vocabulary.
///
/// Each codec maps these onto its own wire request types.  Note the status
/// cardinality mismatch: v5 has separate record/stream status requests while
/// v4 answers both from a single `GetStreamingStatus`, so [`ResponsePayload::Status`]
/// carries optional fields and the caller takes what is present.
#[derive(Debug, Clone, PartialEq)]
pub enum ObsRequest {
    /// Switch the program scene.
    SwitchScene { scene: String },
    /// Fire an overlay template via the custom-message broadcast channel.
    ActivateOverlay { template: String },
    StartRecording,
    StopRecording,
    GetSceneList,
    GetRecordingStatus,
    GetStreamingStatus,
    GetStats,
}

/// Decoded response body, already matched to its request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// The request succeeded and carries no data.
    Ack,
    /// Scene names, program order.
    Scenes(Vec<String>),
    /// Whichever status fields this version/request pair can answer.
    Status {
        recording: Option<bool>,
        streaming: Option<bool>,
        cpu_usage: Option<f64>,
    },
}

/// One fully decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ObsResponse {
    /// Correlation id, echoed from the request.
    pub id: String,
    pub result: Result<ResponsePayload, String>,
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Outcome of feeding one server frame into the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    /// Send this text frame and keep reading.
    Reply(String),
    /// More server frames are needed before we can reply.
    Pending,
    /// The handshake finished; the connection is usable.
    Authenticated,
    /// The server rejected us; do not retry with the same credentials blindly.
    Failed(String),
}

/// Version-specific wire dialect.
///
/// A codec is stateful only for the handshake phase; request encoding and
/// response parsing are pure.
pub trait ProtocolCodec: Send + Sync {
    /// Text frame to send immediately after the socket opens, if the dialect
    /// requires the client to speak first (v4's `GetAuthRequired`).  v5
    /// returns `None` and waits for the server's `Hello`.
    fn on_open_request(&mut self) -> Option<String>;

    /// Advances the handshake with one received text frame.
    fn handle_handshake(&mut self, text: &str, password: &str) -> HandshakeStep;

    /// Encodes a request under the given correlation id.
    fn encode_request(&self, id: &str, request: &ObsRequest) -> String;

    /// Parses a text frame received after the handshake.  Returns `None` for
    /// frames that are not request responses (events, unrelated broadcasts).
    fn parse_response(&self, text: &str, request: &ObsRequest) -> Option<ObsResponse>;
}
