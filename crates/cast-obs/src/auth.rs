//! obs-websocket authentication token computation.
//!
//! Both protocol versions use the same scheme: the server supplies a `salt`
//! and a `challenge`, and the client must answer with
//!
//! ```text
//! base64( sha256( base64( sha256( password + salt ) ) + challenge ) )
//! ```
//!
//! v4 sends the result in an `Authenticate` request; v5 sends it in the
//! `authentication` field of `Identify`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Computes the challenge/response token for the given credentials.
pub fn auth_token(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}")));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
