//! Signed, expiring connection tokens.
//!
//! A token binds `{connection_id, user_id, chat_id}` to an expiry so that
//! learning a connection id (URL leakage, guessing) is not enough to finish
//! someone else's handshake. Tokens are self-contained: nothing is stored,
//! authenticity rests on recomputing the MAC at verification time.
//!
//! Wire format: `base64url(JSON claims) "." base64url(HMAC-SHA256)`, both
//! segments unpadded. The MAC covers the encoded payload segment exactly as
//! transmitted.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<sha2::Sha256>;

/// Claims carried inside a connection token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub chat_id: i64,
    /// Unix seconds.
    pub exp: i64,
}

/// The binding a presented token must match exactly.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedBinding {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub chat_id: i64,
}

/// Issues and verifies connection tokens with a keyed MAC.
pub struct TokenCodec {
    key: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: &SecretString) -> Self {
        Self {
            key: secret.expose_secret().as_bytes().to_vec(),
        }
    }

    /// Build a token for the given binding and expiry.
    pub fn issue(
        &self,
        connection_id: Uuid,
        user_id: i64,
        chat_id: i64,
        expires_at: DateTime<Utc>,
    ) -> String {
        let claims = TokenClaims {
            connection_id,
            user_id,
            chat_id,
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims).expect("token claims serialization is infallible");
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let mac = self.mac(encoded.as_bytes());
        format!("{}.{}", encoded, URL_SAFE_NO_PAD.encode(mac))
    }

    /// Verify a presented token against the expected binding.
    ///
    /// Returns the decoded claims only when the shape, encoding, MAC, expiry,
    /// and the full `{connection_id, user_id, chat_id}` triple all check out.
    /// Every failure yields `None`; nothing distinguishes a forged MAC from a
    /// stale expiry to the caller.
    pub fn verify(
        &self,
        token: &str,
        expected: &ExpectedBinding,
        now: DateTime<Utc>,
    ) -> Option<TokenClaims> {
        let (encoded_payload, encoded_mac) = token.split_once('.')?;
        let provided = URL_SAFE_NO_PAD.decode(encoded_mac).ok()?;
        let computed = self.mac(encoded_payload.as_bytes());
        if provided.len() != computed.len() {
            return None;
        }
        if !bool::from(computed.as_slice().ct_eq(&provided)) {
            return None;
        }

        let payload = URL_SAFE_NO_PAD.decode(encoded_payload).ok()?;
        let claims: TokenClaims = serde_json::from_slice(&payload).ok()?;
        if now.timestamp() >= claims.exp {
            return None;
        }
        if claims.connection_id != expected.connection_id
            || claims.user_id != expected.user_id
            || claims.chat_id != expected.chat_id
        {
            return None;
        }
        Some(claims)
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}
