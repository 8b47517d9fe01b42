//! Wallet signature verification.
//!
//! Wallet extensions hand their signature bytes back in whatever text
//! encoding they prefer, so decoding tries standard base64, then base58,
//! then hex. Only a decode yielding exactly 64 raw bytes is accepted; the
//! address must be a base58 32-byte ed25519 public key. Every malformed
//! input verifies as false; nothing in here throws.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use ed25519_dalek::{Signature, VerifyingKey};

/// Raw length of an ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Raw length of an ed25519 public key.
pub const PUBKEY_LEN: usize = 32;

/// Decode a signature presented as base64, base58, or (optionally
/// 0x-prefixed) hex. First decode producing exactly 64 bytes wins.
pub fn decode_signature(signature: &str) -> Option<[u8; SIGNATURE_LEN]> {
    let trimmed = signature.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(bytes) = BASE64_STANDARD.decode(trimmed)
        && let Ok(sig) = <[u8; SIGNATURE_LEN]>::try_from(bytes.as_slice())
    {
        return Some(sig);
    }

    if let Ok(bytes) = bs58::decode(trimmed).into_vec()
        && let Ok(sig) = <[u8; SIGNATURE_LEN]>::try_from(bytes.as_slice())
    {
        return Some(sig);
    }

    let hex_body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if let Ok(bytes) = hex::decode(hex_body)
        && let Ok(sig) = <[u8; SIGNATURE_LEN]>::try_from(bytes.as_slice())
    {
        return Some(sig);
    }

    None
}

/// Parse a base58 wallet address into its ed25519 verifying key.
pub fn parse_wallet_address(address: &str) -> Option<VerifyingKey> {
    let bytes = bs58::decode(address.trim()).into_vec().ok()?;
    let raw: [u8; PUBKEY_LEN] = bytes.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&raw).ok()
}

/// Check the wallet's signature over the exact challenge bytes.
///
/// Fails closed: malformed address, undecodable signature, or a signature
/// over different bytes all return `false`.
pub fn verify_wallet_signature(wallet_address: &str, signature: &str, challenge: &str) -> bool {
    let Some(key) = parse_wallet_address(wallet_address) else {
        return false;
    };
    let Some(sig_bytes) = decode_signature(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify_strict(challenge.as_bytes(), &signature).is_ok()
}
