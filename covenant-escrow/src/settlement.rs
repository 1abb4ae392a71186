//! Settlement - external value transfer rail
//!
//! Moving value to an account is an external collaborator's job. The
//! engine only requires the `Settlement` trait; the in-memory
//! implementation here records transfers and stands in for a real rail
//! in tests and simulation.

use crate::models::AccountId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Failure reported by the external rail
///
/// The engine maps this to `EscrowError::TransferFailed` and rolls the
/// ledger back; the rail never sees partial state.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct TransferError(pub String);

/// External value transfer interface
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Move `amount` to `to`; all-or-nothing from the engine's view
    async fn transfer(&self, to: &AccountId, amount: u64) -> Result<(), TransferError>;
}

/// In-memory settlement rail
pub struct MemorySettlement {
    transfers: RwLock<Vec<(AccountId, u64)>>,
    reject: AtomicBool,
}

impl MemorySettlement {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(Vec::new()),
            reject: AtomicBool::new(false),
        }
    }

    /// Make subsequent transfers fail, to exercise rollback paths
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// All transfers performed so far, in order
    pub async fn transfers(&self) -> Vec<(AccountId, u64)> {
        self.transfers.read().await.clone()
    }

    /// Total value transferred to one account
    pub async fn total_transferred(&self, account: &AccountId) -> u64 {
        self.transfers
            .read()
            .await
            .iter()
            .filter(|(to, _)| to == account)
            .map(|(_, amount)| amount)
            .sum()
    }
}

impl Default for MemorySettlement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Settlement for MemorySettlement {
    async fn transfer(&self, to: &AccountId, amount: u64) -> Result<(), TransferError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(TransferError("transfer rejected by rail".to_string()));
        }

        self.transfers.write().await.push((to.clone(), amount));
        info!("Transferred {} to {}", amount, to);

        Ok(())
    }
}
