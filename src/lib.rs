//! Wallet-linking handshake and proof protocol for chat-assistant runtimes.
//!
//! A chat-assistant runtime starts a handshake on behalf of a user, hands the
//! user a browser link, and later receives a callback from the browser context
//! holding the user's wallet. This crate owns everything between those two
//! edges: ephemeral connection records with a pending → completed / expired /
//! cancelled lifecycle, signed short-lived tokens binding each handshake to a
//! `{user, chat}` pair, a deterministic challenge the wallet signs, ed25519
//! verification of that signature, and the durable-or-volatile store (with a
//! periodic expiry sweep) backing it all.
//!
//! The chat command layer, the browser UI, and the HTTP transport are callers
//! of this crate, not part of it.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handshake;
pub mod store;

pub use crate::config::Config;
pub use crate::error::{ConfigError, Error, HandshakeError, Result, StoreError};
pub use crate::handshake::HandshakeService;
