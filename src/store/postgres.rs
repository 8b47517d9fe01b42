//! PostgreSQL backend for the handshake store.
//!
//! Transitions ride on conditional UPDATEs (`... WHERE status = 'pending'`),
//! so atomicity per connection id comes from the database rather than any
//! application-level lock. Reads carry an `expires_at` predicate, which is
//! the durable backend's self-expiry: a record past its deadline is invisible
//! to `get_pending*` before the sweep ever touches it.
//!
//! Every operation runs under the configured timeout and surfaces overruns
//! as `StoreError::Timeout`, a category distinct from verification failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::{
    ConnectionRecord, ConnectionStatus, ConnectionStore, LinkedWallet, NewConnection, WalletStore,
};

const CONNECTION_COLUMNS: &str =
    "connection_id, user_id, chat_id, status, wallet_address, created_at, expires_at, updated_at";

const WALLET_COLUMNS: &str =
    "user_id, wallet_address, wallet_type, is_active, linked_at, last_used_at";

/// Durable PostgreSQL store.
pub struct PgStore {
    pool: Pool,
    clock: Arc<dyn Clock>,
    op_timeout: Duration,
    terminal_retention: chrono::Duration,
}

impl PgStore {
    /// Connect, probe, and migrate. Any failure here is the signal for the
    /// caller to fall back to the volatile store.
    pub async fn connect(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not configured".to_string()))?;
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e| StoreError::Pool(format!("invalid database URL: {e}")))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager).max_size(config.pool_size).build()?;

        let store = Self {
            pool,
            clock,
            op_timeout: config.operation_timeout,
            terminal_retention: chrono::Duration::from_std(config.terminal_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(6)),
        };
        store.probe().await?;
        store.run_migrations().await?;
        Ok(store)
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.timed(async {
            let conn = self.pool.get().await?;
            conn.simple_query("SELECT 1").await?;
            Ok(())
        })
        .await
    }

    /// Create the handshake tables if they do not exist yet.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        self.timed(async {
            let conn = self.pool.get().await?;
            conn.batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS wallet_connections (
                    connection_id UUID PRIMARY KEY,
                    user_id BIGINT NOT NULL,
                    chat_id BIGINT NOT NULL,
                    status TEXT NOT NULL,
                    wallet_address TEXT,
                    created_at TIMESTAMPTZ NOT NULL,
                    expires_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_wallet_connections_pending_user
                    ON wallet_connections(user_id) WHERE status = 'pending';
                CREATE INDEX IF NOT EXISTS idx_wallet_connections_expires
                    ON wallet_connections(expires_at);

                CREATE TABLE IF NOT EXISTS linked_wallets (
                    user_id BIGINT NOT NULL,
                    wallet_address TEXT NOT NULL,
                    wallet_type TEXT,
                    is_active BOOLEAN NOT NULL DEFAULT FALSE,
                    linked_at TIMESTAMPTZ NOT NULL,
                    last_used_at TIMESTAMPTZ,
                    PRIMARY KEY (user_id, wallet_address)
                );
                "#,
            )
            .await?;
            Ok(())
        })
        .await
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn row_to_connection(row: &Row) -> Result<ConnectionRecord, StoreError> {
    let status: String = row.get("status");
    let status = ConnectionStatus::parse(&status)
        .ok_or_else(|| StoreError::Serialization(format!("unknown connection status '{status}'")))?;
    Ok(ConnectionRecord {
        connection_id: row.get("connection_id"),
        user_id: row.get("user_id"),
        chat_id: row.get("chat_id"),
        status,
        wallet_address: row.get("wallet_address"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_wallet(row: &Row) -> LinkedWallet {
    LinkedWallet {
        user_id: row.get("user_id"),
        wallet_address: row.get("wallet_address"),
        wallet_type: row.get("wallet_type"),
        is_active: row.get("is_active"),
        linked_at: row.get("linked_at"),
        last_used_at: row.get("last_used_at"),
    }
}

#[async_trait]
impl ConnectionStore for PgStore {
    async fn create_pending(&self, new: NewConnection) -> Result<ConnectionRecord, StoreError> {
        let now = self.now();
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_one(
                    format!(
                        "INSERT INTO wallet_connections ({CONNECTION_COLUMNS})
                         VALUES ($1, $2, $3, 'pending', NULL, $4, $5, $4)
                         RETURNING {CONNECTION_COLUMNS}"
                    ).as_str(),
                    &[
                        &new.connection_id,
                        &new.user_id,
                        &new.chat_id,
                        &now,
                        &new.expires_at,
                    ],
                )
                .await?;
            row_to_connection(&row)
        })
        .await
    }

    async fn get(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError> {
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_opt(
                    format!(
                        "SELECT {CONNECTION_COLUMNS} FROM wallet_connections
                         WHERE connection_id = $1"
                    ).as_str(),
                    &[&connection_id],
                )
                .await?;
            row.as_ref().map(row_to_connection).transpose()
        })
        .await
    }

    async fn get_pending(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_opt(
                    format!(
                        "SELECT {CONNECTION_COLUMNS} FROM wallet_connections
                         WHERE connection_id = $1 AND status = 'pending' AND expires_at > $2"
                    ).as_str(),
                    &[&connection_id, &now],
                )
                .await?;
            row.as_ref().map(row_to_connection).transpose()
        })
        .await
    }

    async fn get_pending_by_user(
        &self,
        user_id: i64,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_opt(
                    format!(
                        "SELECT {CONNECTION_COLUMNS} FROM wallet_connections
                         WHERE user_id = $1 AND status = 'pending' AND expires_at > $2
                         ORDER BY created_at DESC
                         LIMIT 1"
                    ).as_str(),
                    &[&user_id, &now],
                )
                .await?;
            row.as_ref().map(row_to_connection).transpose()
        })
        .await
    }

    async fn complete(
        &self,
        connection_id: Uuid,
        wallet_address: &str,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        self.timed(async {
            let conn = self.pool.get().await?;
            // The conditional UPDATE is the whole concurrency story: of two
            // racing completions, exactly one matches `status = 'pending'`.
            let row = conn
                .query_opt(
                    format!(
                        "UPDATE wallet_connections
                         SET status = 'completed', wallet_address = $2, updated_at = $3
                         WHERE connection_id = $1 AND status = 'pending' AND expires_at > $3
                         RETURNING {CONNECTION_COLUMNS}"
                    ).as_str(),
                    &[&connection_id, &wallet_address, &now],
                )
                .await?;
            row.as_ref().map(row_to_connection).transpose()
        })
        .await
    }

    async fn cancel(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_opt(
                    format!(
                        "UPDATE wallet_connections
                         SET status = 'cancelled', updated_at = $2
                         WHERE connection_id = $1 AND status = 'pending'
                         RETURNING {CONNECTION_COLUMNS}"
                    ).as_str(),
                    &[&connection_id, &now],
                )
                .await?;
            row.as_ref().map(row_to_connection).transpose()
        })
        .await
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = self.now();
        let purge_cutoff = now - self.terminal_retention;
        self.timed(async {
            let conn = self.pool.get().await?;
            let swept = conn
                .execute(
                    "UPDATE wallet_connections
                     SET status = 'expired', updated_at = $1
                     WHERE status = 'pending' AND expires_at <= $1",
                    &[&now],
                )
                .await?;
            conn.execute(
                "DELETE FROM wallet_connections
                 WHERE status <> 'pending' AND expires_at < $1",
                &[&purge_cutoff],
            )
            .await?;
            Ok(swept)
        })
        .await
    }
}

#[async_trait]
impl WalletStore for PgStore {
    async fn get_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<Option<LinkedWallet>, StoreError> {
        self.timed(async {
            let conn = self.pool.get().await?;
            let row = conn
                .query_opt(
                    format!(
                        "SELECT {WALLET_COLUMNS} FROM linked_wallets
                         WHERE user_id = $1 AND wallet_address = $2"
                    ).as_str(),
                    &[&user_id, &wallet_address],
                )
                .await?;
            Ok(row.as_ref().map(row_to_wallet))
        })
        .await
    }

    async fn list_wallets(&self, user_id: i64) -> Result<Vec<LinkedWallet>, StoreError> {
        self.timed(async {
            let conn = self.pool.get().await?;
            let rows = conn
                .query(
                    format!(
                        "SELECT {WALLET_COLUMNS} FROM linked_wallets
                         WHERE user_id = $1
                         ORDER BY linked_at ASC"
                    ).as_str(),
                    &[&user_id],
                )
                .await?;
            Ok(rows.iter().map(row_to_wallet).collect())
        })
        .await
    }

    async fn link_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
        wallet_type: Option<&str>,
    ) -> Result<LinkedWallet, StoreError> {
        let now = self.now();
        self.timed(async {
            let mut conn = self.pool.get().await?;
            let tx = conn.transaction().await?;

            let existing = tx
                .query_opt(
                    format!(
                        "UPDATE linked_wallets
                         SET is_active = TRUE,
                             last_used_at = $3,
                             wallet_type = COALESCE($4, wallet_type)
                         WHERE user_id = $1 AND wallet_address = $2
                         RETURNING {WALLET_COLUMNS}"
                    ).as_str(),
                    &[&user_id, &wallet_address, &now, &wallet_type],
                )
                .await?;

            let wallet = match existing {
                Some(row) => {
                    tx.execute(
                        "UPDATE linked_wallets
                         SET is_active = FALSE
                         WHERE user_id = $1 AND wallet_address <> $2",
                        &[&user_id, &wallet_address],
                    )
                    .await?;
                    row_to_wallet(&row)
                }
                None => {
                    let row = tx
                        .query_one(
                            format!(
                                "INSERT INTO linked_wallets ({WALLET_COLUMNS})
                                 VALUES (
                                     $1, $2, $3,
                                     NOT EXISTS (
                                         SELECT 1 FROM linked_wallets WHERE user_id = $1
                                     ),
                                     $4, $4
                                 )
                                 RETURNING {WALLET_COLUMNS}"
                            ).as_str(),
                            &[&user_id, &wallet_address, &wallet_type, &now],
                        )
                        .await?;
                    row_to_wallet(&row)
                }
            };

            tx.commit().await?;
            Ok(wallet)
        })
        .await
    }
}
