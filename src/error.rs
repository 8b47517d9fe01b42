//! Error types for solink.

use std::time::Duration;

/// Top-level error type for the handshake core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Connection/wallet store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

impl StoreError {
    /// Whether the caller may reasonably retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Pool(_)
                | Self::Timeout(_)
                | Self::Unavailable(_)
                | Self::PoolRuntime(_)
                | Self::Postgres(_)
        )
    }
}

/// Handshake failures surfaced to the chat-facing caller.
///
/// Every verification step fails closed into one of these variants; none of
/// them panics or escapes as a raw error across the orchestrator boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    #[error("Connection token is invalid or expired")]
    TokenInvalid,

    #[error("Callback payload does not match the connection record")]
    PayloadMismatch,

    #[error("Connection not found")]
    ConnectionNotFound,

    #[error("Connection expired")]
    ConnectionExpired,

    #[error("Connection already used")]
    ConnectionAlreadyUsed,

    #[error("Wallet address is not a valid public key")]
    InvalidWalletAddress,

    #[error("Wallet signature verification failed")]
    SignatureInvalid,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl HandshakeError {
    /// Category string safe to show an end user.
    ///
    /// Cryptographic failures collapse into generic buckets so the message
    /// never reveals which verification step rejected the attempt; internal
    /// logs carry the detail.
    pub fn user_facing(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_request",
            Self::TokenInvalid | Self::PayloadMismatch | Self::SignatureInvalid => {
                "verification_failed"
            }
            Self::ConnectionNotFound => "connection_not_found",
            Self::ConnectionExpired => "connection_expired",
            Self::ConnectionAlreadyUsed => "connection_already_used",
            Self::InvalidWalletAddress => "invalid_wallet_address",
            Self::Store(_) => "temporarily_unavailable",
        }
    }

    /// Whether requesting a fresh connection could succeed without any
    /// caller-side change. Only store trouble qualifies; verification
    /// failures require a new handshake.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}

/// Result type alias for the handshake core.
pub type Result<T> = std::result::Result<T, Error>;
