//! Deterministic wallet challenge text.
//!
//! The challenge is rendered identically when the browser link is issued and
//! when the callback is verified, so it is never stored and a signature
//! obtained under one handshake cannot be replayed under another: changing
//! any bound field changes the signed bytes.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

const BANNER: &str = "Solink Wallet Verification";
const INSTRUCTION: &str = "Sign this message to verify wallet ownership.";

/// Fields a challenge binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeBinding {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub chat_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Render the text a wallet must sign.
///
/// One labeled field per line; the expiry is RFC-3339 at whole seconds so
/// both render sites agree regardless of sub-second noise in the source
/// timestamp.
pub fn render_challenge(binding: &ChallengeBinding) -> String {
    format!(
        "{BANNER}\n\nConnection: {}\nUser: {}\nChat: {}\nExpires: {}\n\n{INSTRUCTION}",
        binding.connection_id,
        binding.user_id,
        binding.chat_id,
        binding
            .expires_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}
