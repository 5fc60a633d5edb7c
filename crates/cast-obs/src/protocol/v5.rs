//! obs-websocket protocol 5.x dialect.
//!
//! Envelope framing: every frame is `{ "op": <code>, "d": { ... } }`.
//!
//! | op | meaning           |
//! |----|-------------------|
//! | 0  | Hello (server)    |
//! | 1  | Identify (client) |
//! | 2  | Identified        |
//! | 5  | Event             |
//! | 6  | Request           |
//! | 7  | RequestResponse   |
//!
//! Handshake (server speaks first): Hello carries an optional
//! `authentication { challenge, salt }`; the client answers with Identify,
//! and Identified confirms.  On a bad password the server closes the socket
//! instead of replying, which the connection layer reports as a handshake
//! failure.

use serde_json::{json, Value};

use crate::auth::auth_token;
use crate::protocol::v4::OVERLAY_REALM;
use crate::protocol::{HandshakeStep, ObsRequest, ObsResponse, ProtocolCodec, ResponsePayload};

const OP_HELLO: u64 = 0;
const OP_IDENTIFY: u64 = 1;
const OP_IDENTIFIED: u64 = 2;
const OP_REQUEST: u64 = 6;
const OP_REQUEST_RESPONSE: u64 = 7;

const RPC_VERSION: u64 = 1;

#[derive(Debug, Default)]
enum Phase {
    #[default]
    AwaitHello,
    AwaitIdentified,
    Done,
}

#[derive(Debug, Default)]
pub struct V5Codec {
    phase: Phase,
}

impl V5Codec {
    pub fn new() -> Self {
        Self::default()
    }

    fn request_type(request: &ObsRequest) -> &'static str {
        match request {
            ObsRequest::SwitchScene { .. } => "SetCurrentProgramScene",
            ObsRequest::ActivateOverlay { .. } => "BroadcastCustomEvent",
            ObsRequest::StartRecording => "StartRecord",
            ObsRequest::StopRecording => "StopRecord",
            ObsRequest::GetSceneList => "GetSceneList",
            ObsRequest::GetRecordingStatus => "GetRecordStatus",
            ObsRequest::GetStreamingStatus => "GetStreamStatus",
            ObsRequest::GetStats => "GetStats",
        }
    }
}

impl ProtocolCodec for V5Codec {
    fn on_open_request(&mut self) -> Option<String> {
        // v5 servers speak first with Hello.
        None
    }

    fn handle_handshake(&mut self, text: &str, password: &str) -> HandshakeStep {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return HandshakeStep::Failed(format!("malformed handshake frame: {e}")),
        };
        let op = frame.get("op").and_then(Value::as_u64);

        match self.phase {
            Phase::AwaitHello => {
                if op != Some(OP_HELLO) {
                    return HandshakeStep::Pending;
                }
                let mut identify = json!({ "rpcVersion": RPC_VERSION });
                if let Some(auth) = frame.get("d").and_then(|d| d.get("authentication")) {
                    let salt = auth.get("salt").and_then(Value::as_str).unwrap_or("");
                    let challenge = auth.get("challenge").and_then(Value::as_str).unwrap_or("");
                    identify["authentication"] = json!(auth_token(password, salt, challenge));
                }
                self.phase = Phase::AwaitIdentified;
                HandshakeStep::Reply(json!({ "op": OP_IDENTIFY, "d": identify }).to_string())
            }
            Phase::AwaitIdentified => {
                if op != Some(OP_IDENTIFIED) {
                    return HandshakeStep::Pending;
                }
                self.phase = Phase::Done;
                HandshakeStep::Authenticated
            }
            Phase::Done => HandshakeStep::Authenticated,
        }
    }

    fn encode_request(&self, id: &str, request: &ObsRequest) -> String {
        let data = match request {
            ObsRequest::SwitchScene { scene } => json!({ "sceneName": scene }),
            ObsRequest::ActivateOverlay { template } => json!({
                "eventData": { "realm": OVERLAY_REALM, "template": template },
            }),
            _ => json!({}),
        };
        json!({
            "op": OP_REQUEST,
            "d": {
                "requestType": Self::request_type(request),
                "requestId": id,
                "requestData": data,
            },
        })
        .to_string()
    }

    fn parse_response(&self, text: &str, request: &ObsRequest) -> Option<ObsResponse> {
        let frame: Value = serde_json::from_str(text).ok()?;
        if frame.get("op").and_then(Value::as_u64) != Some(OP_REQUEST_RESPONSE) {
            return None;
        }
        let d = frame.get("d")?;
        let id = d.get("requestId").and_then(Value::as_str)?.to_string();

        let status = d.get("requestStatus")?;
        if status.get("result").and_then(Value::as_bool) != Some(true) {
            let reason = status
                .get("comment")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Some(ObsResponse {
                id,
                result: Err(reason),
            });
        }

        let data = d.get("responseData").cloned().unwrap_or(json!({}));
        let payload = match request {
            ObsRequest::GetSceneList => {
                let scenes = data
                    .get("scenes")
                    .and_then(Value::as_array)
                    .map(|scenes| {
                        scenes
                            .iter()
                            .filter_map(|s| s.get("sceneName").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                ResponsePayload::Scenes(scenes)
            }
            ObsRequest::GetRecordingStatus => ResponsePayload::Status {
                recording: data.get("outputActive").and_then(Value::as_bool),
                streaming: None,
                cpu_usage: None,
            },
            ObsRequest::GetStreamingStatus => ResponsePayload::Status {
                recording: None,
                streaming: data.get("outputActive").and_then(Value::as_bool),
                cpu_usage: None,
            },
            ObsRequest::GetStats => ResponsePayload::Status {
                recording: None,
                streaming: None,
                cpu_usage: data.get("cpuUsage").and_then(Value::as_f64),
            },
            _ => ResponsePayload::Ack,
        };
        Some(ObsResponse {
            id,
            result: Ok(payload),
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
