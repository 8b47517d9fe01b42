//! Volatile in-process store.
//!
//! Backs the same contract as the PostgreSQL store with a map behind an
//! async `RwLock`. Every mutation holds the write guard for its whole
//! check-then-transition, which is what makes per-record transitions atomic
//! here: two racing completions serialize on the guard and the loser finds
//! the record no longer pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::{
    ConnectionRecord, ConnectionStatus, ConnectionStore, LinkedWallet, NewConnection, WalletStore,
};

#[derive(Default)]
struct MemoryState {
    connections: HashMap<Uuid, ConnectionRecord>,
    wallets: HashMap<i64, Vec<LinkedWallet>>,
}

/// In-memory store; contents are lost on restart.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    terminal_retention: chrono::Duration,
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>, terminal_retention: Duration) -> Self {
        Self {
            clock,
            terminal_retention: chrono::Duration::from_std(terminal_retention)
                .unwrap_or_else(|_| chrono::Duration::hours(6)),
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn create_pending(&self, new: NewConnection) -> Result<ConnectionRecord, StoreError> {
        let now = self.now();
        let record = ConnectionRecord {
            connection_id: new.connection_id,
            user_id: new.user_id,
            chat_id: new.chat_id,
            status: ConnectionStatus::Pending,
            wallet_address: None,
            created_at: now,
            expires_at: new.expires_at,
            updated_at: now,
        };
        let mut state = self.state.write().await;
        state.connections.insert(new.connection_id, record.clone());
        Ok(record)
    }

    async fn get(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.connections.get(&connection_id).cloned())
    }

    async fn get_pending(
        &self,
        connection_id: Uuid,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        let state = self.state.read().await;
        Ok(state
            .connections
            .get(&connection_id)
            .filter(|record| record.is_actionable(now))
            .cloned())
    }

    async fn get_pending_by_user(
        &self,
        user_id: i64,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        let state = self.state.read().await;
        Ok(state
            .connections
            .values()
            .filter(|record| record.user_id == user_id && record.is_actionable(now))
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn complete(
        &self,
        connection_id: Uuid,
        wallet_address: &str,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        let mut state = self.state.write().await;
        let Some(record) = state.connections.get_mut(&connection_id) else {
            return Ok(None);
        };
        if !record.is_actionable(now) {
            return Ok(None);
        }
        record.status = ConnectionStatus::Completed;
        record.wallet_address = Some(wallet_address.to_string());
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn cancel(&self, connection_id: Uuid) -> Result<Option<ConnectionRecord>, StoreError> {
        let now = self.now();
        let mut state = self.state.write().await;
        let Some(record) = state.connections.get_mut(&connection_id) else {
            return Ok(None);
        };
        if record.status != ConnectionStatus::Pending {
            return Ok(None);
        }
        record.status = ConnectionStatus::Cancelled;
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let now = self.now();
        let purge_cutoff = now - self.terminal_retention;
        let mut state = self.state.write().await;

        let mut swept = 0u64;
        for record in state.connections.values_mut() {
            if record.status == ConnectionStatus::Pending && record.expires_at <= now {
                record.status = ConnectionStatus::Expired;
                record.updated_at = now;
                swept += 1;
            }
        }
        state
            .connections
            .retain(|_, record| !(record.status.is_terminal() && record.expires_at < purge_cutoff));

        Ok(swept)
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn get_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
    ) -> Result<Option<LinkedWallet>, StoreError> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user_id).and_then(|wallets| {
            wallets
                .iter()
                .find(|w| w.wallet_address == wallet_address)
                .cloned()
        }))
    }

    async fn list_wallets(&self, user_id: i64) -> Result<Vec<LinkedWallet>, StoreError> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&user_id).cloned().unwrap_or_default())
    }

    async fn link_wallet(
        &self,
        user_id: i64,
        wallet_address: &str,
        wallet_type: Option<&str>,
    ) -> Result<LinkedWallet, StoreError> {
        let now = self.now();
        let mut state = self.state.write().await;
        let wallets = state.wallets.entry(user_id).or_default();

        if let Some(position) = wallets
            .iter()
            .position(|w| w.wallet_address == wallet_address)
        {
            for (i, wallet) in wallets.iter_mut().enumerate() {
                wallet.is_active = i == position;
            }
            let wallet = &mut wallets[position];
            wallet.last_used_at = Some(now);
            if wallet_type.is_some() {
                wallet.wallet_type = wallet_type.map(str::to_string);
            }
            return Ok(wallet.clone());
        }

        let wallet = LinkedWallet {
            user_id,
            wallet_address: wallet_address.to_string(),
            wallet_type: wallet_type.map(str::to_string),
            is_active: wallets.is_empty(),
            linked_at: now,
            last_used_at: Some(now),
        };
        wallets.push(wallet.clone());
        Ok(wallet)
    }
}
