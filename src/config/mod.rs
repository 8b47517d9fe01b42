//! Configuration for solink.
//!
//! Settings are loaded from env vars with sensible defaults. The token
//! signing secret is the one hard requirement: it comes from
//! `SOLINK_TOKEN_SECRET`, falling back to `SESSION_SECRET`, and is never
//! defaulted. A handshake core with a well-known MAC key authenticates
//! nothing.

pub(crate) mod helpers;

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::ConfigError;
use self::helpers::{bool_env, first_non_empty_env, optional_env, u64_env};

/// Default lifetime of a pending connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 300;
/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// Default retention of terminal records before the sweep purges them.
pub const DEFAULT_RETENTION_SECS: u64 = 21_600;
/// Default bound on a single store operation.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Main configuration for the handshake core.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub handshake: HandshakeConfig,
    pub browser: BrowserConfig,
}

/// Which connection-store backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "volatile" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'postgres' or 'memory', got '{value}'"),
            }),
        }
    }
}

/// Connection/wallet store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub pool_size: usize,
    /// Bound applied to each store operation; overruns surface as a distinct
    /// timeout error, never as a verification failure.
    pub operation_timeout: Duration,
    /// Fall back to the volatile in-memory store when the durable backend
    /// cannot be reached at construction time.
    pub memory_fallback: bool,
    pub sweep_interval: Duration,
    /// How long terminal (completed/expired/cancelled) records are kept
    /// before the sweep purges them.
    pub terminal_retention: Duration,
}

/// Handshake protocol configuration.
#[derive(Clone)]
pub struct HandshakeConfig {
    /// HMAC key material for connection tokens.
    pub token_secret: SecretString,
    /// Lifetime of a pending connection and its token/challenge.
    pub connect_timeout: Duration,
    /// Fail callbacks closed when no pending record exists, instead of the
    /// lenient default that still verifies the token against caller-claimed
    /// ids to produce a meaningful error.
    pub strict_callback: bool,
}

impl std::fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("token_secret", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("strict_callback", &self.strict_callback)
            .finish()
    }
}

/// URLs baked into the browser-facing connect link.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Page hosting the wallet-connect UI; handshake parameters are appended
    /// as query parameters.
    pub connect_url: Url,
    /// Endpoint the browser posts the signed callback payload to.
    pub callback_url: Url,
    /// Where the browser sends the user after completion (e.g. a chat deep
    /// link). Defaults to the connect page.
    pub return_url: Url,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store: StoreConfig::resolve()?,
            handshake: HandshakeConfig::resolve()?,
            browser: BrowserConfig::resolve()?,
        })
    }
}

impl StoreConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let database_url = first_non_empty_env(&["SOLINK_DATABASE_URL", "DATABASE_URL"])?;

        let backend = match optional_env("SOLINK_STORE_BACKEND")? {
            Some(value) => StoreBackend::parse(&value, "SOLINK_STORE_BACKEND")?,
            // Auto-detect: durable when a database is configured.
            None if database_url.is_some() => StoreBackend::Postgres,
            None => StoreBackend::Memory,
        };

        let pool_size = u64_env("SOLINK_DB_POOL_SIZE", 8)?;
        if pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOLINK_DB_POOL_SIZE".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let operation_timeout_ms = u64_env("SOLINK_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        if operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOLINK_STORE_TIMEOUT_MS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let sweep_interval_secs =
            u64_env("SOLINK_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOLINK_SWEEP_INTERVAL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            backend,
            database_url,
            pool_size: pool_size as usize,
            operation_timeout: Duration::from_millis(operation_timeout_ms),
            memory_fallback: bool_env("SOLINK_MEMORY_FALLBACK", true)?,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            terminal_retention: Duration::from_secs(u64_env(
                "SOLINK_RETENTION_SECS",
                DEFAULT_RETENTION_SECS,
            )?),
        })
    }
}

impl HandshakeConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let secret = first_non_empty_env(&["SOLINK_TOKEN_SECRET", "SESSION_SECRET"])?.ok_or(
            ConfigError::MissingRequired {
                key: "SOLINK_TOKEN_SECRET".to_string(),
                hint: "Set SOLINK_TOKEN_SECRET (or SESSION_SECRET) to a random string; \
                       connection tokens are HMAC-signed with it."
                    .to_string(),
            },
        )?;

        let connect_timeout_secs =
            u64_env("SOLINK_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        if connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SOLINK_CONNECT_TIMEOUT_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            token_secret: SecretString::from(secret),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            strict_callback: bool_env("SOLINK_STRICT_CALLBACK", false)?,
        })
    }
}

impl BrowserConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let connect_url = require_url("SOLINK_CONNECT_URL")?;
        let callback_url = require_url("SOLINK_CALLBACK_URL")?;
        let return_url = match optional_env("SOLINK_RETURN_URL")? {
            Some(raw) => parse_url("SOLINK_RETURN_URL", &raw)?,
            None => connect_url.clone(),
        };

        Ok(Self {
            connect_url,
            callback_url,
            return_url,
        })
    }
}

fn require_url(key: &str) -> Result<Url, ConfigError> {
    let raw = optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: "Set it to an absolute https URL.".to_string(),
    })?;
    parse_url(key, &raw)
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be an absolute URL: {e}"),
    })
}
