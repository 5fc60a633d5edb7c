//! obs-websocket protocol 4.x dialect.
//!
//! Flat JSON framing: requests carry `request-type` + `message-id`, responses
//! echo `message-id` with `status: "ok" | "error"`, and server-push events
//! carry `update-type` instead of `message-id`.
//!
//! Handshake (client speaks first):
//!
//! 1. → `GetAuthRequired`
//! 2. ← `{ authRequired, challenge?, salt? }`
//! 3. → `Authenticate { auth }` (skipped when `authRequired` is false)
//! 4. ← `{ status: "ok" }`

use serde_json::{json, Value};

use crate::auth::auth_token;
use crate::protocol::{HandshakeStep, ObsRequest, ObsResponse, ProtocolCodec, ResponsePayload};

const AUTH_CHECK_ID: &str = "cornercast-auth-check";
const AUTH_ID: &str = "cornercast-auth";

/// Realm tag for overlay broadcasts, shared with the browser-source listener.
pub const OVERLAY_REALM: &str = "cornercast-overlay";

#[derive(Debug, Default)]
enum Phase {
    #[default]
    AwaitAuthRequired,
    AwaitAuthResult,
    Done,
}

#[derive(Debug, Default)]
pub struct V4Codec {
    phase: Phase,
}

impl V4Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProtocolCodec for V4Codec {
    fn on_open_request(&mut self) -> Option<String> {
        Some(
            json!({
                "request-type": "GetAuthRequired",
                "message-id": AUTH_CHECK_ID,
            })
            .to_string(),
        )
    }

    fn handle_handshake(&mut self, text: &str, password: &str) -> HandshakeStep {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return HandshakeStep::Failed(format!("malformed handshake frame: {e}")),
        };

        match self.phase {
            Phase::AwaitAuthRequired => {
                if frame.get("message-id").and_then(Value::as_str) != Some(AUTH_CHECK_ID) {
                    // Early event frames are possible; keep waiting.
                    return HandshakeStep::Pending;
                }
                if frame.get("status").and_then(Value::as_str) == Some("error") {
                    let reason = frame
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("GetAuthRequired rejected");
                    return HandshakeStep::Failed(reason.to_string());
                }
                if frame.get("authRequired").and_then(Value::as_bool) != Some(true) {
                    self.phase = Phase::Done;
                    return HandshakeStep::Authenticated;
                }
                let salt = frame.get("salt").and_then(Value::as_str).unwrap_or("");
                let challenge = frame.get("challenge").and_then(Value::as_str).unwrap_or("");
                let token = auth_token(password, salt, challenge);
                self.phase = Phase::AwaitAuthResult;
                HandshakeStep::Reply(
                    json!({
                        "request-type": "Authenticate",
                        "message-id": AUTH_ID,
                        "auth": token,
                    })
                    .to_string(),
                )
            }
            Phase::AwaitAuthResult => {
                if frame.get("message-id").and_then(Value::as_str) != Some(AUTH_ID) {
                    return HandshakeStep::Pending;
                }
                if frame.get("status").and_then(Value::as_str) == Some("ok") {
                    self.phase = Phase::Done;
                    HandshakeStep::Authenticated
                } else {
                    let reason = frame
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("authentication failed");
                    HandshakeStep::Failed(reason.to_string())
                }
            }
            Phase::Done => HandshakeStep::Authenticated,
        }
    }

    fn encode_request(&self, id: &str, request: &ObsRequest) -> String {
        let body = match request {
            ObsRequest::SwitchScene { scene } => json!({
                "request-type": "SetCurrentScene",
                "scene-name": scene,
            }),
            ObsRequest::ActivateOverlay { template } => json!({
                "request-type": "BroadcastCustomMessage",
                "realm": OVERLAY_REALM,
                "data": { "template": template },
            }),
            ObsRequest::StartRecording => json!({ "request-type": "StartRecording" }),
            ObsRequest::StopRecording => json!({ "request-type": "StopRecording" }),
            ObsRequest::GetSceneList => json!({ "request-type": "GetSceneList" }),
            // v4 answers recording and streaming status from the same request.
            ObsRequest::GetRecordingStatus | ObsRequest::GetStreamingStatus => {
                json!({ "request-type": "GetStreamingStatus" })
            }
            ObsRequest::GetStats => json!({ "request-type": "GetStats" }),
        };
        let mut body = body;
        body["message-id"] = json!(id);
        body.to_string()
    }

    fn parse_response(&self, text: &str, request: &ObsRequest) -> Option<ObsResponse> {
        let frame: Value = serde_json::from_str(text).ok()?;
        // Event frames carry "update-type" and no "message-id".
        let id = frame.get("message-id").and_then(Value::as_str)?.to_string();

        if frame.get("status").and_then(Value::as_str) != Some("ok") {
            let reason = frame
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Some(ObsResponse {
                id,
                result: Err(reason),
            });
        }

        let payload = match request {
            ObsRequest::GetSceneList => {
                let scenes = frame
                    .get("scenes")
                    .and_then(Value::as_array)
                    .map(|scenes| {
                        scenes
                            .iter()
                            .filter_map(|s| s.get("name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                ResponsePayload::Scenes(scenes)
            }
            ObsRequest::GetRecordingStatus | ObsRequest::GetStreamingStatus => {
                ResponsePayload::Status {
                    recording: frame.get("recording").and_then(Value::as_bool),
                    streaming: frame.get("streaming").and_then(Value::as_bool),
                    cpu_usage: None,
                }
            }
            ObsRequest::GetStats => ResponsePayload::Status {
                recording: None,
                streaming: None,
                cpu_usage: frame
                    .get("stats")
                    .and_then(|s| s.get("cpu-usage"))
                    .and_then(Value::as_f64),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_request_is_get_auth_required() {
        let mut codec = V4Codec::new();
        let frame: Value = serde_json::from_str(&codec.on_open_request().unwrap()).unwrap();
        assert_eq!(frame["request-type"], "GetAuthRequired");
        assert_eq!(frame["message-id"], AUTH_CHECK_ID);
    }

    #[test]
    fn test_handshake_without_auth_completes_immediately() {
        let mut codec = V4Codec::new();
        codec.on_open_request();
        let reply = format!(
            r#"{{"message-id":"{AUTH_CHECK_ID}","status":"ok","authRequired":false}}"#
        );
        assert_eq!(codec.handle_handshake(&reply, ""), HandshakeStep::Authenticated);
    }

    #[test]
    fn test_handshake_with_auth_sends_token_then_completes() {
        // Arrange
        let mut codec = V4Codec::new();
        codec.on_open_request();
        let challenge_frame = format!(
            r#"{{"message-id":"{AUTH_CHECK_ID}","status":"ok","authRequired":true,"salt":"s","challenge":"c"}}"#
        );

        // Act — server demands auth
        let step = codec.handle_handshake(&challenge_frame, "hunter2");
        let reply = match step {
            HandshakeStep::Reply(r) => r,
            other => panic!("expected Reply, got {other:?}"),
        };
        let frame: Value = serde_json::from_str(&reply).unwrap();

        // Assert — the Authenticate request carries the computed token
        assert_eq!(frame["request-type"], "Authenticate");
        assert_eq!(frame["auth"], auth_token("hunter2", "s", "c"));

        // Act — server accepts
        let ok = format!(r#"{{"message-id":"{AUTH_ID}","status":"ok"}}"#);
        assert_eq!(codec.handle_handshake(&ok, "hunter2"), HandshakeStep::Authenticated);
    }

    #[test]
    fn test_handshake_wrong_password_fails_with_server_reason() {
        let mut codec = V4Codec::new();
        codec.on_open_request();
        let challenge_frame = format!(
            r#"{{"message-id":"{AUTH_CHECK_ID}","status":"ok","authRequired":true,"salt":"s","challenge":"c"}}"#
        );
        codec.handle_handshake(&challenge_frame, "wrong");
        let rejected =
            format!(r#"{{"message-id":"{AUTH_ID}","status":"error","error":"Authentication Failed."}}"#);

        let step = codec.handle_handshake(&rejected, "wrong");
        assert_eq!(step, HandshakeStep::Failed("Authentication Failed.".to_string()));
    }

    #[test]
    fn test_handshake_ignores_interleaved_event_frames() {
        let mut codec = V4Codec::new();
        codec.on_open_request();
        let event = r#"{"update-type":"TransitionBegin"}"#;
        assert_eq!(codec.handle_handshake(event, "pw"), HandshakeStep::Pending);
    }

    #[test]
    fn test_encode_switch_scene() {
        let codec = V4Codec::new();
        let text = codec.encode_request(
            "id-1",
            &ObsRequest::SwitchScene {
                scene: "Mat A Wide".to_string(),
            },
        );
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["request-type"], "SetCurrentScene");
        assert_eq!(frame["scene-name"], "Mat A Wide");
        assert_eq!(frame["message-id"], "id-1");
    }

    #[test]
    fn test_encode_overlay_uses_custom_message_broadcast() {
        let codec = V4Codec::new();
        let text = codec.encode_request(
            "id-2",
            &ObsRequest::ActivateOverlay {
                template: "point-banner".to_string(),
            },
        );
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["request-type"], "BroadcastCustomMessage");
        assert_eq!(frame["realm"], OVERLAY_REALM);
        assert_eq!(frame["data"]["template"], "point-banner");
    }

    #[test]
    fn test_both_status_requests_map_to_get_streaming_status() {
        let codec = V4Codec::new();
        for req in [ObsRequest::GetRecordingStatus, ObsRequest::GetStreamingStatus] {
            let frame: Value =
                serde_json::from_str(&codec.encode_request("id", &req)).unwrap();
            assert_eq!(frame["request-type"], "GetStreamingStatus");
        }
    }

    #[test]
    fn test_parse_scene_list() {
        let codec = V4Codec::new();
        let text = r#"{"message-id":"id-3","status":"ok","scenes":[{"name":"Mat A"},{"name":"Replay"}]}"#;
        let resp = codec.parse_response(text, &ObsRequest::GetSceneList).unwrap();
        assert_eq!(resp.id, "id-3");
        assert_eq!(
            resp.result,
            Ok(ResponsePayload::Scenes(vec![
                "Mat A".to_string(),
                "Replay".to_string()
            ]))
        );
    }

    #[test]
    fn test_parse_streaming_status_carries_both_flags() {
        let codec = V4Codec::new();
        let text = r#"{"message-id":"id-4","status":"ok","streaming":true,"recording":false}"#;
        let resp = codec
            .parse_response(text, &ObsRequest::GetStreamingStatus)
            .unwrap();
        assert_eq!(
            resp.result,
            Ok(ResponsePayload::Status {
                recording: Some(false),
                streaming: Some(true),
                cpu_usage: None,
            })
        );
    }

    #[test]
    fn test_parse_stats_cpu_usage() {
        let codec = V4Codec::new();
        let text = r#"{"message-id":"id-5","status":"ok","stats":{"cpu-usage":12.5}}"#;
        let resp = codec.parse_response(text, &ObsRequest::GetStats).unwrap();
        assert_eq!(
            resp.result,
            Ok(ResponsePayload::Status {
                recording: None,
                streaming: None,
                cpu_usage: Some(12.5),
            })
        );
    }

    #[test]
    fn test_parse_error_response() {
        let codec = V4Codec::new();
        let text = r#"{"message-id":"id-6","status":"error","error":"no such scene"}"#;
        let resp = codec
            .parse_response(text, &ObsRequest::SwitchScene { scene: "x".into() })
            .unwrap();
        assert_eq!(resp.result, Err("no such scene".to_string()));
    }

    #[test]
    fn test_parse_ignores_event_frames() {
        let codec = V4Codec::new();
        let text = r#"{"update-type":"SwitchScenes","scene-name":"Mat A"}"#;
        assert!(codec.parse_response(text, &ObsRequest::StartRecording).is_none());
    }
}
