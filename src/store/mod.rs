//! Connection and wallet stores.
//!
//! One contract, two backends: a durable PostgreSQL store and a volatile
//! in-process map. The orchestrator depends only on the [`HandshakeStore`]
//! trait object; callers observe no behavioral difference between backends
//! beyond durability across restarts.
//!
//! Expiry is enforced twice. Reads pre-expire by filtering on `expires_at`,
//! so correctness never depends on the sweep; the periodic sweep then marks
//! overdue pending records expired and purges records that have sat in a
//! terminal state past the retention window.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;

/// Lifecycle states of a connection record.
///
/// Transitions are forward-only: `pending` may become any terminal state,
/// and nothing leaves `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Pending,
    Completed,
    Expired,
    Cancelled,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A handshake record. Owned exclusively by the store; the orchestrator
/// mutates it only through store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub chat_id: i64,
    pub status: ConnectionStatus,
    /// Proven public key, set only on completion.
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Actionable means pending and unexpired.
    pub fn is_actionable(&self, now: DateTime<Utc>) -> bool {
        self.status == ConnectionStatus::Pending && now < self.expires_at
    }
}

/// Parameters for creating a pending record.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub connection_id: Uuid,
    pub user_id: i64,
    pub chat_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// A wallet linked to a chat user by a completed handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedWallet {
    pub user_id: i64,
    pub wallet_address: String,
    pub wallet_type: Option<String>,
    pub is_active: bool,
    pub linked_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Handshake connection records through their lifecycle.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn create_pending(&self, new: NewConnection) -> Result<ConnectionRecord, StoreError>;

    /// Fetch a record regardless of state.
    async fn get(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Fetch a record only while it is pending and unexpired.
    async fn get_pending(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    /// The user's active pending record, if any. At most one exists at a
    /// time; callers reuse it instead of creating duplicates.
    async fn get_pending_by_user(
        &self,
        user_id: i64,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Atomic pending → completed transition. Returns `None` when the record
    /// is missing, no longer pending, or already past its expiry. The losing
    /// side of a completion race sees `None`, never a second success.
    async fn complete(
        &self,
        connection_id: Uuid,
        wallet_address: &str,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Atomic pending → cancelled transition; `None` if not pending.
    async fn cancel(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Mark overdue pending records expired and purge long-terminal ones.
    /// Idempotent and safe to run concurrently with reads and writes.
    /// Returns the number of records newly marked expired.
    async fn sweep_expired(&self) -> Result<u64, StoreError>;
}

/// Linked wallets per chat user.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<Option<LinkedWallet>, StoreError>;

    /// All wallets for a user, oldest link first.
    async fn list_wallets(&self, user_id: i64) -> Result<Vec<LinkedWallet>, StoreError>;

    /// Insert or reactivate a wallet link. Re-linking an existing wallet
    /// makes it the active one; a user's first wallet is active immediately.
    async fn link_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
        wallet_type: Option<&str>,
    ) -> Result<LinkedWallet, StoreError>;
}

/// Unified store surface the orchestrator depends on.
pub trait HandshakeStore: ConnectionStore + WalletStore {}

impl<T: ConnectionStore + WalletStore> HandshakeStore for T {}

/// Construct the configured store backend.
///
/// Postgres is preferred when configured; if it cannot be reached at
/// construction time and fallback is allowed, the volatile store takes over
/// with the same contract. Without fallback the error propagates as
/// retryable.
pub async fn connect_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn HandshakeStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(
            clock,
            config.terminal_retention,
        ))),
        StoreBackend::Postgres => match PgStore::connect(config, Arc::clone(&clock)).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(e) if config.memory_fallback => {
                tracing::warn!(
                    "Durable connection store unavailable, using volatile in-memory store: {}",
                    e
                );
                Ok(Arc::new(MemoryStore::new(
                    clock,
                    config.terminal_retention,
                )))
            }
            Err(e) => Err(e),
        },
    }
}

/// Spawn the periodic expiry sweep as a background task owned by the store
/// layer. Sweep errors are logged and never crash the process.
pub fn spawn_sweeper(
    store: Arc<dyn HandshakeStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the sweep runs on
        // the configured cadence from startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => {
                    tracing::debug!("Expired {} overdue pending connection(s)", swept);
                }
                Err(e) => tracing::warn!("Connection sweep failed: {}", e),
            }
        }
    })
}
