//! Cryptographic building blocks for the handshake.
//!
//! Token codec, deterministic challenge rendering, and wallet signature
//! verification. Everything here is pure: no store or network access, and
//! every failure path fails closed instead of propagating.

pub mod challenge;
pub mod signature;
pub mod token;

pub use challenge::{ChallengeBinding, render_challenge};
pub use signature::verify_wallet_signature;
pub use token::{ExpectedBinding, TokenClaims, TokenCodec};
