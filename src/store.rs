use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::AggregateAccountState;

/// Raised by store backends; the in-memory store never fails.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account store unavailable: {0}")]
    Unavailable(String),
}

/// Owns the persisted per-account aggregate.
///
/// `load` returns an empty state for accounts it has never seen.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self, account_id: &str) -> Result<AggregateAccountState, StoreError>;

    async fn save(&self, account_id: &str, state: &AggregateAccountState) -> Result<(), StoreError>;
}

/// In-process store; clones share the same accounts.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<Mutex<HashMap<String, AggregateAccountState>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known state for `account_id`.
    pub async fn seed(&self, account_id: &str, state: AggregateAccountState) {
        self.accounts.lock().await.insert(account_id.to_string(), state);
    }

    pub async fn len(&self) -> usize {
        self.accounts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.lock().await.is_empty()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self, account_id: &str) -> Result<AggregateAccountState, StoreError> {
        Ok(self
            .accounts
            .lock()
            .await
            .get(account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, account_id: &str, state: &AggregateAccountState) -> Result<(), StoreError> {
        self.accounts
            .lock()
            .await
            .insert(account_id.to_string(), state.clone());
        Ok(())
    }
}
