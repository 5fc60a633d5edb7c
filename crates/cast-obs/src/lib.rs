//! cast-obs: the control-plane client for the production system.
//!
//! Manages a small set of named OBS connections.  Each connection is an
//! independent tokio task owning one WebSocket, its own reconnect timer with
//! capped exponential backoff, and a strictly ordered command queue, so one
//! broken connection can never stall another.
//!
//! Two wire protocol versions are supported concurrently across different
//! connections:
//!
//! - **v4** (obs-websocket 4.x, default port 4444): `request-type` /
//!   `message-id` JSON framing, `GetAuthRequired`/`Authenticate` handshake.
//! - **v5** (obs-websocket 5.x, default port 4455): op-coded envelopes,
//!   `Hello`/`Identify`/`Identified` handshake.
//!
//! Both versions share the same SHA-256/base64 auth token computation (see
//! [`auth`]).  The per-version logic lives behind the [`protocol::ProtocolCodec`]
//! trait, selected at connection-establishment time.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod connection;
pub mod protocol;
pub mod state_machine;

pub use client::{ObsClient, ObsConnectionConfig, ObsStatusSnapshot};
pub use connection::ConnectionError;
pub use protocol::{ObsRequest, ProtocolVersion, ResponsePayload};
pub use state_machine::ConnectionStatus;
